//! Completion arbitration for dual-channel devices.
//!
//! A dual-channel step finishes over two independent channels: the driver
//! process exit and a pushed telemetry datagram. The join runs as an
//! explicit state machine:
//!
//! ```text
//! WaitingBoth -> WaitingTelemetry -> Settled{Success|Failure}
//! ```
//!
//! Precedence: a non-zero exit fails the step immediately and discards any
//! telemetry outcome. A zero exit settles success if telemetry has already
//! arrived, otherwise enters a bounded wait for it; expiry of the window is
//! a missing-result failure. Each channel fires its half of the join at most
//! once — the telemetry half is a oneshot, so a message landing after the
//! window has expired hits a dropped receiver and cannot re-trigger
//! completion.

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::info;

use crate::devices::process::DriverExit;
use crate::error::{ErrorCode, RunError};

/// Default bounded wait for a telemetry message after a clean exit.
pub const DEFAULT_WAIT_FOR_RESULTS_MS: u64 = 5000;

enum State<F> {
    WaitingBoth(F),
    WaitingTelemetry,
    Settled(Result<Map<String, Value>, RunError>),
}

/// Join the driver exit with the telemetry channel into one settled outcome.
///
/// `exit` resolves once the driver process has been reaped (spawn failures
/// arrive as its error); `telemetry` is the listener's oneshot delivery.
pub async fn settle<F>(
    exit: F,
    mut telemetry: oneshot::Receiver<Map<String, Value>>,
    wait_budget: Duration,
    driver: &str,
) -> Result<Map<String, Value>, RunError>
where
    F: Future<Output = Result<DriverExit, RunError>>,
{
    let mut state = State::WaitingBoth(exit);

    loop {
        state = match state {
            // The process half settles first; the listener keeps running
            // independently in the meantime.
            State::WaitingBoth(exit) => match exit.await {
                Err(err) => State::Settled(Err(err)),
                Ok(finished) if !finished.success() => {
                    State::Settled(Err(finished.step_error(driver)))
                }
                Ok(_) => match telemetry.try_recv() {
                    Ok(values) => State::Settled(Ok(values)),
                    Err(oneshot::error::TryRecvError::Empty) => State::WaitingTelemetry,
                    Err(oneshot::error::TryRecvError::Closed) => {
                        State::Settled(Err(missing_results()))
                    }
                },
            },
            State::WaitingTelemetry => {
                info!("Waiting for step results...");
                match tokio::time::timeout(wait_budget, &mut telemetry).await {
                    Ok(Ok(values)) => State::Settled(Ok(values)),
                    // Listener died or the window expired; either way the
                    // step has no result payload.
                    Ok(Err(_)) | Err(_) => State::Settled(Err(missing_results())),
                }
            }
            State::Settled(outcome) => return outcome,
        };
    }
}

fn missing_results() -> RunError {
    RunError::new(ErrorCode::InvalidStepResult, "No step results received.")
}
