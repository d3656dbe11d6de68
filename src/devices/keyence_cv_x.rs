//! Keyence CV-X driver: synchronous report shape.
//!
//! The driver talks to the controller, writes one JSON result object to
//! stdout, and exits. No side channel, no arbitration — exit code 0 plus a
//! parseable report settles the step.

use serde_json::{Map, Value};
use tracing::info;

use crate::config::DeviceConfig;
use crate::devices::process;
use crate::error::{ErrorCode, RunError};
use crate::input::StepConfig;
use crate::report::StepResult;
use crate::runner::RunContext;

pub const TYPE_TAG: &str = "keyence-cv-x";

const DRIVER_BIN: &str = "keyence-cv-x-test";
const DEFAULT_PORT: u16 = 8502;

pub async fn run(
    ctx: &RunContext,
    step: &StepConfig,
    device: &DeviceConfig,
) -> Result<StepResult, RunError> {
    info!("Running {TYPE_TAG} step...");

    let command = ctx.bin_path(DRIVER_BIN);
    let args = vec![
        "--host".to_string(),
        device.host.clone(),
        "--port".to_string(),
        device.port.unwrap_or(DEFAULT_PORT).to_string(),
        "--program".to_string(),
        step.program_arg("0"),
    ];

    let exit = process::run_driver(&command, &args, DRIVER_BIN).await?;
    if !exit.success() {
        return Err(exit.step_error(DRIVER_BIN));
    }

    let report: Map<String, Value> = serde_json::from_str(&exit.stdout).map_err(|err| {
        RunError::new(
            ErrorCode::InvalidStepResult,
            format!("Invalid step result JSON: {err}"),
        )
    })?;

    let mut result = StepResult::new();
    result.merge_object(report);
    Ok(result)
}
