//! Error types for backend and worker-pool operations.

use thiserror::Error;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur in the crypto backend or worker pool
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// A backend instance could not be constructed. Fatal at startup.
    #[error("Initialization failed: {0}")]
    InitializationError(String),

    /// A worker crashed or the backend reported an execution failure.
    /// Aborts the whole operation; retry policy belongs to the caller.
    #[error("Compute error: {0}")]
    ComputeError(String),

    /// The pool was destroyed and can no longer accept work.
    #[error("Worker pool destroyed")]
    PoolDestroyed,

    /// Malformed caller input (length mismatch, empty input, non-power-of-two
    /// domain).
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
