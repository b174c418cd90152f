//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A transaction could not be applied as a unit.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// A rename source key does not exist.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// The backend is closed or unreachable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StorageError::MissingKey("blob/main/a/x:data".into());
        assert!(err.to_string().contains("blob/main/a/x:data"));
    }
}
