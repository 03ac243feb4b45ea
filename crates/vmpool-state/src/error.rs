//! Error types for the vmpool state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to connect to state store: {0}")]
    Connect(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("batch execution failed: {0}")]
    Batch(String),

    #[error("ping failed: {0}")]
    Ping(String),
}
