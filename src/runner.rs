//! Sequential step execution and run-level aggregation.
//!
//! Steps run strictly one at a time — every device shares the same physical
//! inspection cell, so two concurrent steps would fight over the camera and
//! the telemetry port. The first failure aborts the remainder of the run and
//! becomes the run's error verbatim.

use std::path::PathBuf;

use tracing::info;

use crate::artifact::{self, codec::{ImageCodec, ProcessCodec}};
use crate::config::Config;
use crate::devices;
use crate::error::RunError;
use crate::input::{RunInput, StepConfig};
use crate::report::{RunOutcome, StepResult};

/// Everything a step needs to execute: the run root (anchors `bin/` and
/// path placeholders), the loaded config, the image codec, and the results
/// accumulated so far. Passed explicitly into every stage; only the runner
/// mutates it, and only between steps.
pub struct RunContext {
    pub root: PathBuf,
    pub config: Config,
    pub codec: Box<dyn ImageCodec>,
    step_results: Vec<StepResult>,
}

impl RunContext {
    pub fn new(root: PathBuf, config: Config) -> Self {
        let codec = Box::new(ProcessCodec::new(&root));
        Self::with_codec(root, config, codec)
    }

    /// Substitute the image codec (tests use a mock).
    pub fn with_codec(root: PathBuf, config: Config, codec: Box<dyn ImageCodec>) -> Self {
        Self {
            root,
            config,
            codec,
            step_results: Vec::new(),
        }
    }

    /// Path of a bundled external tool or driver.
    pub fn bin_path(&self, name: &str) -> PathBuf {
        self.root.join("bin").join(name)
    }
}

/// Execute every step in input order, strictly sequentially, and aggregate
/// the outcome. A step's result is appended only once that step has fully
/// settled (driver result and artifact, if any); the next step never starts
/// before then.
pub async fn run(mut ctx: RunContext, mut input: RunInput) -> RunOutcome {
    info!("Running {} steps...", input.steps.len());

    for (index, step) in input.steps.iter_mut().enumerate() {
        info!("Step {}...", index + 1);

        match run_step(&ctx, step).await {
            Ok(result) => ctx.step_results.push(result),
            Err(err) => return RunOutcome::failure(err),
        }
    }

    RunOutcome::success(ctx.step_results)
}

async fn run_step(ctx: &RunContext, step: &mut StepConfig) -> Result<StepResult, RunError> {
    let mut result = devices::dispatch(ctx, step).await?;
    artifact::acquire(ctx, step, &mut result).await?;
    Ok(result)
}
