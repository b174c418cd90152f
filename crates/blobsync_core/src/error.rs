//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the sync engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key/value backend error.
    #[error("storage error: {0}")]
    Storage(#[from] blobsync_storage::StorageError),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The presented device id was not issued to a connected device.
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    /// No open write session matches the token.
    #[error("unknown write session token: {token}")]
    SessionNotFound {
        /// The presented token.
        token: String,
    },

    /// The session exists but belongs to another device.
    #[error("write session {token} is not owned by device {device_id}")]
    SessionNotOwned {
        /// The presented token.
        token: String,
        /// The device that tried to use it.
        device_id: String,
    },

    /// No blob exists for the id, in either the direct store or the session.
    #[error("unknown blob id: {0}")]
    BlobNotFound(String),

    /// A stored blob is missing some of its four keys.
    #[error("blob record for {uuid} is incomplete: missing {missing}")]
    CorruptBlob {
        /// The blob id.
        uuid: String,
        /// Which field key was absent.
        missing: &'static str,
    },
}

impl CoreError {
    /// Returns true if this error reflects a bad request rather than a
    /// backend fault (the router layer maps these to 4xx responses).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidDeviceId(_)
                | CoreError::SessionNotFound { .. }
                | CoreError::SessionNotOwned { .. }
                | CoreError::BlobNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(CoreError::InvalidDeviceId("d".into()).is_client_error());
        assert!(CoreError::SessionNotFound { token: "t".into() }.is_client_error());
        assert!(!CoreError::Storage(blobsync_storage::StorageError::Unavailable("down".into()))
            .is_client_error());
    }

    #[test]
    fn session_errors_are_distinguishable() {
        let not_found = CoreError::SessionNotFound { token: "t".into() };
        let not_owned = CoreError::SessionNotOwned {
            token: "t".into(),
            device_id: "d".into(),
        };
        assert!(not_found.to_string().contains("unknown"));
        assert!(not_owned.to_string().contains("not owned"));
    }
}
