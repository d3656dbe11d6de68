//! Cognex IS-2000 driver: dual-channel shape.
//!
//! The driver reports over two independent channels — its exit code and a
//! telemetry datagram pushed over UDP. The listener is bound before the
//! process spawns so a message racing the startup is never lost; the
//! arbiter joins both channels into one settled outcome.

use std::time::Duration;

use tracing::info;

use crate::config::DeviceConfig;
use crate::devices::arbiter::{self, DEFAULT_WAIT_FOR_RESULTS_MS};
use crate::devices::process;
use crate::devices::telemetry::TelemetryListener;
use crate::error::{ErrorCode, RunError};
use crate::input::StepConfig;
use crate::report::StepResult;
use crate::runner::RunContext;

pub const TYPE_TAG: &str = "cognex-is2000";

const DRIVER_BIN: &str = "cognex-test";

pub async fn run(
    ctx: &RunContext,
    step: &StepConfig,
    device: &DeviceConfig,
) -> Result<StepResult, RunError> {
    info!("Running {TYPE_TAG} step...");

    let udp_host = device.udp_host.as_deref().unwrap_or("0.0.0.0");
    let udp_port = device.udp_port.ok_or_else(|| {
        RunError::new(
            ErrorCode::UdpBind,
            format!("No UDP port configured for the {TYPE_TAG} device."),
        )
    })?;

    info!("Binding UDP to {udp_host}:{udp_port}...");
    let listener = TelemetryListener::bind(udp_host, udp_port).await?;
    let telemetry = listener.listen();

    let command = ctx.bin_path(DRIVER_BIN);
    let args = vec![
        "--host".to_string(),
        device.host.clone(),
        "--user".to_string(),
        device.user.clone().unwrap_or_else(|| "admin".to_string()),
        "--pass".to_string(),
        device.pass.clone().unwrap_or_default(),
        "--program".to_string(),
        step.program_arg(""),
    ];

    let wait_budget = Duration::from_millis(
        device
            .wait_for_results
            .or(ctx.config.wait_for_results)
            .unwrap_or(DEFAULT_WAIT_FOR_RESULTS_MS),
    );

    let values = arbiter::settle(
        process::run_driver(&command, &args, DRIVER_BIN),
        telemetry,
        wait_budget,
        DRIVER_BIN,
    )
    .await?;

    let mut result = StepResult::new();
    result.merge_object(values);
    Ok(result)
}
