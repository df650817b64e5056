//! Exit codes for the CLI.

use bmdcapture_lib::CaptureError;

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Capture completed and the output was finalized
    Success = 0,
    /// Capture failed after it started
    GeneralError = 1,
    /// Invalid command-line arguments or config file
    InvalidArguments = 2,
    /// The output could not be opened or initialized
    OutputFailed = 3,
    /// The capture device could not be opened or started
    DeviceFailed = 4,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_error(error: &CaptureError) -> Self {
        match error {
            CaptureError::InvalidConfig(_) => ExitCode::InvalidArguments,
            CaptureError::Device(_) => ExitCode::DeviceFailed,
            e if e.is_output_error() => ExitCode::OutputFailed,
            _ => ExitCode::GeneralError,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Success => write!(f, "success"),
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::InvalidArguments => write!(f, "invalid arguments"),
            ExitCode::OutputFailed => write!(f, "output failed"),
            ExitCode::DeviceFailed => write!(f, "device failed"),
        }
    }
}
