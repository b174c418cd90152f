//! Account status and lock payloads.

use serde::{Deserialize, Serialize};

/// The per-device account status payload.
///
/// Pushed to every connected device after a commit or a lock change, and
/// returned from the status endpoint. The lock id lists are device
/// specific: `granted` holds locks this device owns, `foreign` everything
/// locked by other devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// The device this status was computed for.
    pub device_id: String,
    /// Timestamp of the most recent recorded change, -1 when none exists.
    pub timestamp_head_seconds: i64,
    /// Document ids locked by this device.
    pub granted_locked_document_ids: Vec<String>,
    /// Document ids locked by other devices.
    pub foreign_locked_document_ids: Vec<String>,
}

/// Response to a lock acquire/release/query request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockResponse {
    /// Id of the document.
    pub document_id: String,
    /// Lock status of the document after the request.
    pub locked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_json_field_names() {
        let status = Status {
            device_id: "d1".into(),
            timestamp_head_seconds: 99,
            granted_locked_document_ids: vec!["a".into()],
            foreign_locked_document_ids: vec![],
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"timestampHeadSeconds\":99"));
        assert!(json.contains("\"grantedLockedDocumentIds\":[\"a\"]"));
    }
}
