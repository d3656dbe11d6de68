//! Run input document: the ordered list of inspection steps.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ErrorCode, RunError};

/// `{ steps: [ { device?, program? } ] }` — the sole invocation argument.
#[derive(Debug, Deserialize)]
pub struct RunInput {
    pub steps: Vec<StepConfig>,
}

impl RunInput {
    /// Read and validate the input document. A missing or unparseable file
    /// and an empty step list are both `ERR_INVALID_INPUT`.
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RunError::new(
                ErrorCode::InvalidInput,
                format!("Failed to read the input JSON: {err}"),
            )
        })?;

        let input: Self = serde_json::from_str(&raw).map_err(|err| {
            RunError::new(
                ErrorCode::InvalidInput,
                format!("Failed to read the input JSON: {err}"),
            )
        })?;

        if input.steps.is_empty() {
            return Err(RunError::new(
                ErrorCode::InvalidInput,
                "No steps in the input JSON.",
            ));
        }

        Ok(input)
    }
}

/// One configured inspection step.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    /// Device id; may be omitted when exactly one device is configured.
    #[serde(default)]
    pub device: Option<String>,

    /// Device-specific program selector, a name or a numeric slot.
    #[serde(default)]
    pub program: Option<ProgramSelector>,

    /// Dispatch timestamp, stamped just before the driver is invoked.
    /// Anchors artifact staleness filtering: any file at or before this
    /// instant belongs to an earlier run.
    #[serde(skip)]
    pub started_at: Option<DateTime<Utc>>,
}

impl StepConfig {
    /// The program argument passed to the driver, or the driver's default.
    pub fn program_arg(&self, default: &str) -> String {
        match &self.program {
            Some(selector) => selector.to_string(),
            None => default.to_string(),
        }
    }
}

/// Program selectors arrive as either strings or numbers in the input JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProgramSelector {
    Name(String),
    Slot(i64),
}

impl std::fmt::Display for ProgramSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Slot(slot) => write!(f, "{slot}"),
        }
    }
}
