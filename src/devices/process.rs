//! Driver process invocation.
//!
//! Every driver is an external executable under `<root>/bin/` with the same
//! plumbing contract: outcome via exit code, an optional JSON report on
//! stdout, diagnostics on stderr. A stderr line starting with `ERR_` is a
//! structured error token that overrides the generic exit-code failure; the
//! last token observed wins. All other stderr lines are logged verbatim.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::info;

use crate::error::{ErrorCode, RunError};

/// Prefix marking a stderr line as a structured error token.
const ERROR_TOKEN_PREFIX: &str = "ERR_";

/// A finished driver process, classified.
#[derive(Debug, Clone)]
pub struct DriverExit {
    /// Exit code; `None` when the process died on a signal.
    pub code: Option<i32>,
    /// Full captured stdout.
    pub stdout: String,
    /// Last `ERR_`-prefixed stderr line, if any.
    pub override_code: Option<String>,
}

impl DriverExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The step error for a non-zero (or signal) exit: the driver-reported
    /// override code when one was captured, the generic code otherwise.
    pub fn step_error(&self, driver: &str) -> RunError {
        let code = match &self.override_code {
            Some(token) => ErrorCode::Driver(token.clone()),
            None => ErrorCode::StepExitCode,
        };
        let status = match self.code {
            Some(code) => format!("exit code: {code}"),
            None => "signal".to_string(),
        };
        RunError::new(
            code,
            format!("{driver} ended with a non-zero {status}"),
        )
    }
}

/// Spawn a driver and drive it to completion: wait for exit while draining
/// stdout into a buffer and scanning stderr for error tokens.
///
/// Stdout and stderr are consumed concurrently with the wait so a chatty
/// driver cannot deadlock on a full pipe.
pub async fn run_driver(
    command: &Path,
    args: &[String],
    driver: &str,
) -> Result<DriverExit, RunError> {
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            RunError::new(
                ErrorCode::Spawn,
                format!("{driver} spawning error: {err}"),
            )
        })?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let (status, stdout, override_code) = tokio::join!(
        child.wait(),
        read_stdout(stdout_pipe),
        scan_stderr(stderr_pipe),
    );

    let status = status.map_err(|err| {
        RunError::new(
            ErrorCode::Spawn,
            format!("{driver} wait error: {err}"),
        )
    })?;

    Ok(DriverExit {
        code: status.code(),
        stdout,
        override_code,
    })
}

async fn read_stdout(pipe: Option<tokio::process::ChildStdout>) -> String {
    let mut stdout = String::new();
    if let Some(mut pipe) = pipe {
        // A non-UTF-8 report will fail JSON parsing later anyway.
        let _ = pipe.read_to_string(&mut stdout).await;
    }
    stdout
}

/// Consume stderr line by line (CRLF or LF), capturing the last error token
/// and logging everything else as driver diagnostics.
async fn scan_stderr(pipe: Option<tokio::process::ChildStderr>) -> Option<String> {
    let mut override_code = None;
    let Some(pipe) = pipe else {
        return override_code;
    };

    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end_matches('\r');
        if line.starts_with(ERROR_TOKEN_PREFIX) {
            override_code = Some(line.to_string());
        } else if !line.is_empty() {
            info!("{line}");
        }
    }
    override_code
}
