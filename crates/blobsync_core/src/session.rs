//! Write sessions: isolated staging areas for a batch of mutations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use blobsync_protocol::{ChangeAction, ChangeEntry};
use blobsync_storage::KvBackend;
use uuid::Uuid;

use crate::blob::{BlobEntry, BlobStore};
use crate::error::CoreResult;
use crate::timestamp::TimestampRecord;

/// An open write session owned by one device.
///
/// All writes and deletes stage into a scratch blob namespace and an
/// in-memory timestamp record keyed by the session token. Nothing is
/// visible to other devices until the session commits, and a discarded
/// session leaves no trace.
pub struct WriteSession {
    token: String,
    device_id: String,
    opened_at: Instant,
    blobs: BlobStore,
    timestamps: TimestampRecord,
}

impl std::fmt::Debug for WriteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSession")
            .field("token", &self.token)
            .field("device_id", &self.device_id)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

impl WriteSession {
    pub(crate) fn open(
        backend: Arc<dyn KvBackend>,
        account_id: &str,
        device_id: &str,
    ) -> Self {
        let token = Uuid::new_v4().to_string();
        let namespace = format!("tmp/{token}");
        Self {
            blobs: BlobStore::staged(backend, account_id, &namespace),
            timestamps: TimestampRecord::ephemeral(),
            token,
            device_id: device_id.to_owned(),
            opened_at: Instant::now(),
        }
    }

    /// Opaque token the client presents on subsequent writes.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Device that opened the session.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// True once the session has been open longer than `max_age`.
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        self.opened_at.elapsed() > max_age
    }

    /// Stages a document write and returns the change entry recorded
    /// for it.
    pub fn stage_write(
        &self,
        document_id: &str,
        model_class: &str,
        timestamp_seconds: i64,
        data: Vec<u8>,
    ) -> CoreResult<ChangeEntry> {
        self.blobs.put(&BlobEntry {
            uuid: document_id.to_owned(),
            model_class: model_class.to_owned(),
            timestamp_seconds,
            data,
        })?;
        Ok(self.timestamps.record(
            document_id,
            model_class,
            timestamp_seconds,
            ChangeAction::Write,
        ))
    }

    /// Stages a document deletion and returns the change entry
    /// recorded for it. The caller resolves `model_class` from
    /// whichever store still knows the document.
    pub fn stage_delete(
        &self,
        document_id: &str,
        model_class: &str,
        timestamp_seconds: i64,
    ) -> CoreResult<ChangeEntry> {
        self.blobs.delete(document_id)?;
        Ok(self.timestamps.record(
            document_id,
            model_class,
            timestamp_seconds,
            ChangeAction::Delete,
        ))
    }

    pub(crate) fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub(crate) fn timestamps(&self) -> &TimestampRecord {
        &self.timestamps
    }

    /// Drops all staged state without committing.
    pub(crate) fn discard(&self) -> CoreResult<()> {
        self.blobs.discard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobsync_storage::MemoryBackend;

    fn session() -> WriteSession {
        WriteSession::open(Arc::new(MemoryBackend::new()), "alice", "device-1")
    }

    #[test]
    fn tokens_are_unique() {
        let first = session();
        let second = session();
        assert_ne!(first.token(), second.token());
    }

    #[test]
    fn staged_write_is_readable_within_the_session() {
        let session = session();
        session
            .stage_write("doc1", "Note", 5, b"hello".to_vec())
            .expect("stage");

        let blob = session.blobs().get("doc1").expect("get").expect("present");
        assert_eq!(blob.data, b"hello");
        assert_eq!(session.timestamps().timestamp_head_seconds(), 5);
    }

    #[test]
    fn stage_delete_records_a_delete_entry() {
        let session = session();
        session
            .stage_write("doc1", "Note", 5, b"hello".to_vec())
            .expect("stage");
        let entry = session
            .stage_delete("doc1", "Note", 6)
            .expect("stage delete");

        assert_eq!(entry.action, ChangeAction::Delete);
        assert!(session.blobs().get("doc1").expect("get").is_none());
        assert!(session.blobs().staged_deletions().contains("doc1"));
    }

    #[test]
    fn fresh_session_is_not_expired() {
        let session = session();
        assert!(!session.is_older_than(Duration::from_secs(3600)));
        assert!(session.is_older_than(Duration::ZERO));
    }
}
