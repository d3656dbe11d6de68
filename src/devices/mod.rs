//! Device drivers and step dispatch.
//!
//! Each supported driver type is a variant of the closed [`DriverKind`] set;
//! the config carries the type as an open string tag so an unrecognized tag
//! fails the step (`ERR_UNSUPPORTED_DEVICE`) instead of the config load.

pub mod arbiter;
pub mod cognex_is2000;
pub mod keyence_cv_x;
pub mod process;
pub mod telemetry;

use chrono::Utc;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::{ErrorCode, RunError};
use crate::input::StepConfig;
use crate::report::StepResult;
use crate::runner::RunContext;

/// The closed set of supported driver types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    KeyenceCvX,
    CognexIs2000,
}

impl DriverKind {
    /// Map a config type tag onto a driver variant.
    pub fn from_type(tag: &str) -> Option<Self> {
        match tag {
            keyence_cv_x::TYPE_TAG => Some(Self::KeyenceCvX),
            cognex_is2000::TYPE_TAG => Some(Self::CognexIs2000),
            _ => None,
        }
    }
}

/// Resolve the step's device, stamp the dispatch timestamp, and run the
/// driver. The timestamp is stamped before invocation: it anchors artifact
/// staleness filtering, so anything modified at or before it is ignored.
pub async fn dispatch(ctx: &RunContext, step: &mut StepConfig) -> Result<StepResult, RunError> {
    let (device_id, device) = resolve_device(ctx, step)?;

    let kind = DriverKind::from_type(&device.driver_type).ok_or_else(|| {
        RunError::new(
            ErrorCode::UnsupportedDevice,
            format!("Unsupported device: {}", device.driver_type),
        )
    })?;

    step.started_at = Some(Utc::now());
    debug!(device = device_id, "Dispatching to {}", device.driver_type);

    match kind {
        DriverKind::KeyenceCvX => keyence_cv_x::run(ctx, step, device).await,
        DriverKind::CognexIs2000 => cognex_is2000::run(ctx, step, device).await,
    }
}

/// Look up the step's device; a step naming no device defaults to the only
/// configured one.
fn resolve_device<'a>(
    ctx: &'a RunContext,
    step: &StepConfig,
) -> Result<(&'a str, &'a DeviceConfig), RunError> {
    let requested = match &step.device {
        Some(id) => Some(id.as_str()),
        None if ctx.config.devices.len() == 1 => {
            ctx.config.devices.keys().next().map(String::as_str)
        }
        None => None,
    };

    let id = requested.ok_or_else(|| unknown_device(None))?;
    let (id, device) = ctx
        .config
        .devices
        .get_key_value(id)
        .ok_or_else(|| unknown_device(Some(id)))?;
    Ok((id.as_str(), device))
}

fn unknown_device(id: Option<&str>) -> RunError {
    RunError::new(
        ErrorCode::UnknownDevice,
        format!("Unknown device: {}", id.unwrap_or("<none>")),
    )
}
