// Error types for the dining table harness
//
// Structured errors with numeric codes so that protocol violations and run
// failures can be reported by the CLI and asserted on in tests.

mod table;

pub use table::{log_table_error, TableError, TableErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
