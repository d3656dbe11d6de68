//! Stable error codes for the final run document.
//!
//! Every failure anywhere in a run is translated at its origin into one of
//! these codes before it surfaces. The caller never sees a raw I/O or parse
//! error, only `{"result":"failure","error":"<CODE>"}` plus a logged message.

use thiserror::Error;

/// Machine-readable error code reported in the failure document.
///
/// Drivers may override the generic exit-code failure with their own code by
/// printing an `ERR_`-prefixed line to stderr; those arrive as
/// [`ErrorCode::Driver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidInput,
    InvalidConfig,
    FtpSetup,
    UnknownDevice,
    UnsupportedDevice,
    UdpBind,
    Spawn,
    StepExitCode,
    InvalidStepResult,
    ImageConvert,
    ImageOverlay,
    ImageSave,
    /// Driver-reported override code captured from stderr.
    Driver(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidInput => "ERR_INVALID_INPUT",
            Self::InvalidConfig => "ERR_INVALID_CONFIG",
            Self::FtpSetup => "ERR_FTP_SETUP",
            Self::UnknownDevice => "ERR_UNKNOWN_DEVICE",
            Self::UnsupportedDevice => "ERR_UNSUPPORTED_DEVICE",
            Self::UdpBind => "ERR_UDP_BIND",
            Self::Spawn => "ERR_SPAWN",
            Self::StepExitCode => "ERR_STEP_EXIT_CODE",
            Self::InvalidStepResult => "ERR_INVALID_STEP_RESULT",
            Self::ImageConvert => "ERR_IMAGE_CONVERT",
            Self::ImageOverlay => "ERR_IMAGE_OVERLAY",
            Self::ImageSave => "ERR_IMAGE_SAVE",
            Self::Driver(code) => code,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run-terminating failure: stable code plus human-readable context.
///
/// The message goes to the log; only the code reaches the output document.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct RunError {
    pub code: ErrorCode,
    pub message: String,
}

impl RunError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
