//! Error types for the server layer.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server layer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The request or frame could not be parsed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The presented credential was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The caller is authenticated but not allowed to do this.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The connection id does not name a live connection.
    #[error("unknown connection: {0}")]
    UnknownConnection(u64),

    /// An engine operation failed.
    #[error(transparent)]
    Core(#[from] blobsync_core::CoreError),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::InvalidRequest(_)
            | ServerError::AuthenticationFailed(_)
            | ServerError::NotAuthorized(_)
            | ServerError::UnknownConnection(_) => true,
            ServerError::Core(err) => err.is_client_error(),
            ServerError::Serialization(_) => false,
        }
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::AuthenticationFailed("bad".into()).is_client_error());
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn core_errors_keep_their_classification() {
        let client: ServerError =
            blobsync_core::CoreError::BlobNotFound("doc".into()).into();
        assert!(client.is_client_error());

        let server: ServerError = blobsync_core::CoreError::Storage(
            blobsync_storage::StorageError::Unavailable("down".into()),
        )
        .into();
        assert!(server.is_server_error());
    }
}
