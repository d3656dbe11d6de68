//! Per-step results and the aggregated run document.
//!
//! A [`StepResult`] is an open map of string keys to JSON scalars. Two keys
//! are reserved: `result` (the step verdict, starts out `false`) and `image`
//! (absent, `null`, or the base64-encoded final image). Everything else comes
//! straight from the driver — stdout JSON for synchronous devices, parsed
//! telemetry entries for dual-channel ones.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::RunError;

/// Reserved key carrying the step verdict.
pub const RESULT_KEY: &str = "result";

/// Reserved key carrying the captured image (or a driver-reported file path
/// while acquisition is still running).
pub const IMAGE_KEY: &str = "image";

/// One finalized inspection step outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct StepResult {
    values: Map<String, Value>,
}

impl StepResult {
    /// A fresh result with the verdict defaulted to `false`.
    pub fn new() -> Self {
        let mut values = Map::new();
        values.insert(RESULT_KEY.to_string(), Value::Bool(false));
        Self { values }
    }

    /// Merge a driver-reported JSON object into the result, overwriting
    /// reserved keys if the driver set them.
    pub fn merge_object(&mut self, object: Map<String, Value>) {
        for (key, value) in object {
            self.values.insert(key, value);
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// The step verdict. Anything other than an explicit `true` is a fail.
    pub fn verdict(&self) -> bool {
        matches!(self.values.get(RESULT_KEY), Some(Value::Bool(true)))
    }

    /// A driver-reported image source path, if the driver returned one
    /// directly instead of dropping the file over the ingress.
    pub fn reported_image_path(&self) -> Option<&str> {
        match self.values.get(IMAGE_KEY) {
            Some(Value::String(path)) if has_image_extension(path) => Some(path),
            _ => None,
        }
    }

    /// Reset `image` to `null`. Acquisition does this up front (the reported
    /// path is not part of the document) and again before propagating any
    /// finalization failure.
    pub fn clear_image(&mut self) {
        self.values.insert(IMAGE_KEY.to_string(), Value::Null);
    }

    /// Embed the finalized image bytes as base64.
    pub fn embed_image(&mut self, bytes: &[u8]) {
        self.values.insert(
            IMAGE_KEY.to_string(),
            Value::String(BASE64_STANDARD.encode(bytes)),
        );
    }

    /// Drop the `image` key entirely. Used when the bytes were persisted to
    /// the configured destination file and the path stands as the reference.
    pub fn omit_image(&mut self) {
        self.values.remove(IMAGE_KEY);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

impl Default for StepResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks a driver-reported path for a raw capture extension.
fn has_image_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".bmp") || lower.ends_with(".jpg")
}

/// The aggregated outcome of a whole run. Built exactly once, at the end.
#[derive(Debug)]
pub enum RunOutcome {
    Success {
        judgement: bool,
        steps: Vec<StepResult>,
    },
    Failure(RunError),
}

impl RunOutcome {
    /// Aggregate settled step results: the judgement is the AND of every
    /// step verdict.
    pub fn success(steps: Vec<StepResult>) -> Self {
        let judgement = steps.iter().all(StepResult::verdict);
        Self::Success { judgement, steps }
    }

    pub fn failure(error: RunError) -> Self {
        Self::Failure(error)
    }

    /// The single JSON document written to stdout.
    pub fn to_document(&self) -> Value {
        match self {
            Self::Success { judgement, steps } => json!({
                "result": "success",
                "judgement": judgement,
                "steps": steps,
            }),
            Self::Failure(error) => json!({
                "result": "failure",
                "error": error.code.as_str(),
            }),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success { .. } => 0,
            Self::Failure(_) => 1,
        }
    }
}
