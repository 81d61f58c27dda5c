// Error types for the PCM speaker crate
//
// This module defines the output error taxonomy, providing structured error
// handling with numeric codes suitable for reporting across an embedding
// boundary.

mod output;

pub use output::{log_output_error, OpenStage, OutputError, OutputErrorCodes, TeardownStage};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the embedding boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
