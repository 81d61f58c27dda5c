// Output error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Output error code constants
///
/// Single source of truth for the numeric codes reported to embedding
/// callers.
///
/// Error code range: 3001-3008
pub struct OutputErrorCodes {}

impl OutputErrorCodes {
    /// Encoding, channel count or sample rate rejected before any backend call
    pub const UNSUPPORTED_FORMAT: i32 = 3001;

    /// Backend init_output() or open() failed
    pub const OPEN_FAILED: i32 = 3002;

    /// Operation attempted outside its valid lifecycle state
    pub const INVALID_STATE: i32 = 3003;

    /// Write submitted with an empty or size-mismatched buffer
    pub const INVALID_BUFFER: i32 = 3004;

    /// Backend close() or deinit() failed
    pub const CLOSE_FAILED: i32 = 3005;

    /// Background writer disappeared before delivering a completion
    pub const WORKER_LOST: i32 = 3006;

    /// Speaker chunk not fully accepted by the backend
    pub const SHORT_WRITE: i32 = 3007;

    /// I/O error from the host
    pub const IO: i32 = 3008;
}

/// Which backend step failed while opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStage {
    Init,
    Open,
}

/// Which backend step failed while tearing a device down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStage {
    Close,
    Deinit,
}

impl fmt::Display for OpenStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenStage::Init => write!(f, "init_output"),
            OpenStage::Open => write!(f, "open"),
        }
    }
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStage::Close => write!(f, "close"),
            TeardownStage::Deinit => write!(f, "deinit"),
        }
    }
}

/// Log an output error with structured context
///
/// Logs the numeric code, the component and the call site so failures can
/// be correlated with telemetry events.
pub fn log_output_error(err: &OutputError, context: &str) {
    error!(
        "Output error in {}: code={}, component=OutputDevice, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Output device errors
///
/// Lifecycle failures are reported synchronously by the call that caused
/// them. Backend write results are never converted into this type; they are
/// delivered untouched through the write completion.
///
/// Error code range: 3001-3008
#[derive(Debug, Clone, PartialEq)]
pub enum OutputError {
    /// Unknown encoding or non-positive channels/sample rate
    UnsupportedFormat { reason: String },

    /// Backend refused to initialize or open the device
    OpenFailed {
        stage: OpenStage,
        code: i32,
        reason: String,
    },

    /// Operation not valid in the current lifecycle state
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Empty or size-mismatched write buffer
    InvalidBuffer { reason: String },

    /// Backend close or deinit reported a failure (resources are still released)
    CloseFailed {
        stage: TeardownStage,
        code: i32,
        reason: String,
    },

    /// Background writer went away without answering
    WorkerLost { reason: String },

    /// A speaker chunk was only partially accepted
    ShortWrite { expected: usize, written: isize },

    /// Host I/O error
    Io { details: String },
}

impl ErrorCode for OutputError {
    fn code(&self) -> i32 {
        match self {
            OutputError::UnsupportedFormat { .. } => OutputErrorCodes::UNSUPPORTED_FORMAT,
            OutputError::OpenFailed { .. } => OutputErrorCodes::OPEN_FAILED,
            OutputError::InvalidState { .. } => OutputErrorCodes::INVALID_STATE,
            OutputError::InvalidBuffer { .. } => OutputErrorCodes::INVALID_BUFFER,
            OutputError::CloseFailed { .. } => OutputErrorCodes::CLOSE_FAILED,
            OutputError::WorkerLost { .. } => OutputErrorCodes::WORKER_LOST,
            OutputError::ShortWrite { .. } => OutputErrorCodes::SHORT_WRITE,
            OutputError::Io { .. } => OutputErrorCodes::IO,
        }
    }

    fn message(&self) -> String {
        match self {
            OutputError::UnsupportedFormat { reason } => {
                format!("Unsupported output format: {}", reason)
            }
            OutputError::OpenFailed {
                stage,
                code,
                reason,
            } => {
                format!(
                    "Failed to open output device ({} returned {}): {}",
                    stage, code, reason
                )
            }
            OutputError::InvalidState { operation, state } => {
                format!("{}() is not valid while the device is {}", operation, state)
            }
            OutputError::InvalidBuffer { reason } => format!("Invalid write buffer: {}", reason),
            OutputError::CloseFailed {
                stage,
                code,
                reason,
            } => {
                format!(
                    "Failed to close output device ({} returned {}): {}",
                    stage, code, reason
                )
            }
            OutputError::WorkerLost { reason } => {
                format!("Output write worker lost: {}", reason)
            }
            OutputError::ShortWrite { expected, written } => {
                format!("write() failed: {} (expected {} bytes)", written, expected)
            }
            OutputError::Io { details } => format!("I/O error: {}", details),
        }
    }
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for OutputError {}

impl From<std::io::Error> for OutputError {
    fn from(err: std::io::Error) -> Self {
        OutputError::Io {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_error_codes() {
        assert_eq!(
            OutputError::UnsupportedFormat {
                reason: "test".to_string()
            }
            .code(),
            OutputErrorCodes::UNSUPPORTED_FORMAT
        );
        assert_eq!(
            OutputError::OpenFailed {
                stage: OpenStage::Init,
                code: -1,
                reason: "test".to_string()
            }
            .code(),
            OutputErrorCodes::OPEN_FAILED
        );
        assert_eq!(
            OutputError::InvalidState {
                operation: "write",
                state: "closed"
            }
            .code(),
            OutputErrorCodes::INVALID_STATE
        );
        assert_eq!(
            OutputError::InvalidBuffer {
                reason: "empty".to_string()
            }
            .code(),
            OutputErrorCodes::INVALID_BUFFER
        );
        assert_eq!(
            OutputError::CloseFailed {
                stage: TeardownStage::Deinit,
                code: 5,
                reason: "test".to_string()
            }
            .code(),
            OutputErrorCodes::CLOSE_FAILED
        );
        assert_eq!(
            OutputError::WorkerLost {
                reason: "test".to_string()
            }
            .code(),
            3006
        );
        assert_eq!(
            OutputError::ShortWrite {
                expected: 4,
                written: 2
            }
            .code(),
            3007
        );
    }

    #[test]
    fn test_output_error_messages() {
        let err = OutputError::OpenFailed {
            stage: OpenStage::Open,
            code: -2,
            reason: "busy".to_string(),
        };
        assert_eq!(
            err.message(),
            "Failed to open output device (open returned -2): busy"
        );

        let err = OutputError::InvalidState {
            operation: "flush",
            state: "closed",
        };
        assert!(err.message().contains("flush()"));
        assert!(err.message().contains("closed"));

        let err = OutputError::CloseFailed {
            stage: TeardownStage::Close,
            code: 1,
            reason: "device gone".to_string(),
        };
        assert!(err.message().contains("close returned 1"));
    }

    #[test]
    fn test_output_error_display() {
        let err = OutputError::InvalidBuffer {
            reason: "zero-length buffer".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("OutputError"));
        assert!(display.contains("3004"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("thread spawn failed");
        let err: OutputError = io_err.into();
        match err {
            OutputError::Io { details } => assert!(details.contains("thread spawn failed")),
            _ => panic!("Expected Io"),
        }
    }
}
