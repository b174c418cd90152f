//! Change-feed entry types.

use serde::{Deserialize, Serialize};

/// What happened to a document.
///
/// One entry is kept per document id; the latest action wins, so a
/// document's entry flips between `Write` and `Delete` over its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// The document was written (created or replaced).
    Write,
    /// The document was deleted.
    Delete,
}

/// A single entry in an account's change feed.
///
/// Entries are what clients pull from `/changes?since=...` to learn which
/// documents they must re-fetch or drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    /// Id of the document the action happened to.
    pub uuid: String,
    /// The document's model class (client-defined type tag).
    pub model_class: String,
    /// When the action happened, in epoch seconds.
    pub timestamp_seconds: i64,
    /// The action.
    pub action: ChangeAction,
}

impl ChangeEntry {
    /// Creates a write entry.
    pub fn write(uuid: impl Into<String>, model_class: impl Into<String>, seconds: i64) -> Self {
        Self {
            uuid: uuid.into(),
            model_class: model_class.into(),
            timestamp_seconds: seconds,
            action: ChangeAction::Write,
        }
    }

    /// Creates a delete entry.
    pub fn delete(uuid: impl Into<String>, model_class: impl Into<String>, seconds: i64) -> Self {
        Self {
            uuid: uuid.into(),
            model_class: model_class.into(),
            timestamp_seconds: seconds,
            action: ChangeAction::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_json_round_trip() {
        let entry = ChangeEntry::write("doc1", "Note", 42);
        let json = serde_json::to_string(&entry).unwrap();
        let back: ChangeEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn action_serializes_lowercase() {
        let json = serde_json::to_string(&ChangeEntry::delete("d", "Note", 1)).unwrap();
        assert!(json.contains("\"action\":\"delete\""));
        assert!(json.contains("\"modelClass\":\"Note\""));
    }
}
