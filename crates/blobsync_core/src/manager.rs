//! Per-account sync engine tying stores, locks and sessions together.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use blobsync_protocol::{ChangeEntry, Status};
use blobsync_storage::KvBackend;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::blob::{BlobEntry, BlobStore};
use crate::config::SyncConfig;
use crate::devices::DeviceDirectory;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockManager;
use crate::session::WriteSession;
use crate::timestamp::TimestampRecord;

#[derive(Default)]
struct SessionTable {
    by_token: HashMap<String, Arc<WriteSession>>,
    by_device: HashMap<String, HashSet<String>>,
}

impl SessionTable {
    fn insert(&mut self, session: Arc<WriteSession>) {
        self.by_device
            .entry(session.device_id().to_owned())
            .or_default()
            .insert(session.token().to_owned());
        self.by_token.insert(session.token().to_owned(), session);
    }

    fn remove(&mut self, token: &str) -> Option<Arc<WriteSession>> {
        let session = self.by_token.remove(token)?;
        if let Some(tokens) = self.by_device.get_mut(session.device_id()) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.by_device.remove(session.device_id());
            }
        }
        Some(session)
    }
}

/// The sync engine for a single account.
///
/// One manager exists per account with at least one connected device.
/// It owns the account's durable blob store and timestamp record, the
/// advisory lock table, and the set of open write sessions. The manager
/// itself takes `&self` everywhere; callers that need coarse
/// read/write exclusion across operations wrap it externally.
pub struct SyncManager {
    backend: Arc<dyn KvBackend>,
    config: SyncConfig,
    account_id: String,
    devices: Arc<dyn DeviceDirectory>,
    locks: LockManager,
    timestamps: TimestampRecord,
    blobs: BlobStore,
    sessions: Mutex<SessionTable>,
}

impl SyncManager {
    /// Opens the engine for `account_id`, loading its persisted
    /// timestamp record.
    pub fn open(
        backend: Arc<dyn KvBackend>,
        config: SyncConfig,
        devices: Arc<dyn DeviceDirectory>,
        account_id: &str,
    ) -> CoreResult<Self> {
        let timestamps = TimestampRecord::open(Arc::clone(&backend), &config, account_id)?;
        let blobs = BlobStore::direct(Arc::clone(&backend), &config, account_id);
        info!(account_id, "sync manager opened");
        Ok(Self {
            backend,
            config,
            account_id: account_id.to_owned(),
            devices,
            locks: LockManager::new(),
            timestamps,
            blobs,
            sessions: Mutex::new(SessionTable::default()),
        })
    }

    /// Account this engine serves.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// The account's advisory lock table.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// True if `device_id` is currently recognized as one of this
    /// account's devices.
    pub fn is_valid_device_id(&self, device_id: &str) -> bool {
        self.devices.is_valid(&self.account_id, device_id)
    }

    /// Current wall-clock time in whole seconds since the epoch, the
    /// timestamp assigned to staged mutations.
    pub fn timestamp_seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Largest committed mutation timestamp, or `-1` for a fresh
    /// account.
    pub fn timestamp_head_seconds(&self) -> i64 {
        self.timestamps.timestamp_head_seconds()
    }

    /// The sync status a device sees: the head plus the lock partition
    /// from its point of view.
    pub fn status(&self, device_id: &str) -> CoreResult<Status> {
        self.require_device(device_id)?;
        let mut granted: Vec<String> =
            self.locks.granted_locks(device_id).into_iter().collect();
        let mut foreign: Vec<String> =
            self.locks.foreign_locks(device_id).into_iter().collect();
        granted.sort();
        foreign.sort();
        Ok(Status {
            device_id: device_id.to_owned(),
            timestamp_head_seconds: self.timestamp_head_seconds(),
            granted_locked_document_ids: granted,
            foreign_locked_document_ids: foreign,
        })
    }

    /// Committed change entries at or after `since`; non-positive
    /// `since` returns the full history.
    pub fn changes_since(&self, since: i64) -> HashMap<String, ChangeEntry> {
        self.timestamps.entries_since(since)
    }

    /// Reads a committed blob.
    pub fn blob(&self, document_id: &str) -> CoreResult<Option<BlobEntry>> {
        self.blobs.get(document_id)
    }

    /// Opens a write session for `device_id` and returns its handle.
    /// Expired sessions are swept first.
    pub fn start_write_session(&self, device_id: &str) -> CoreResult<Arc<WriteSession>> {
        self.require_device(device_id)?;
        self.sweep_expired_sessions();

        let session = Arc::new(WriteSession::open(
            Arc::clone(&self.backend),
            &self.account_id,
            device_id,
        ));
        debug!(device_id, token = session.token(), "write session opened");
        self.sessions.lock().insert(Arc::clone(&session));
        Ok(session)
    }

    /// Looks up an open session by token.
    pub fn write_session(&self, token: &str) -> Option<Arc<WriteSession>> {
        self.sessions.lock().by_token.get(token).cloned()
    }

    fn owned_session(&self, token: &str, device_id: &str) -> CoreResult<Arc<WriteSession>> {
        let session = self
            .write_session(token)
            .ok_or_else(|| CoreError::SessionNotFound {
                token: token.to_owned(),
            })?;
        if session.device_id() != device_id {
            return Err(CoreError::SessionNotOwned {
                token: token.to_owned(),
                device_id: device_id.to_owned(),
            });
        }
        Ok(session)
    }

    /// Stages a write into the session identified by `token`, stamping
    /// it with the current time.
    pub fn stage_write(
        &self,
        token: &str,
        device_id: &str,
        document_id: &str,
        model_class: &str,
        data: Vec<u8>,
    ) -> CoreResult<ChangeEntry> {
        let session = self.owned_session(token, device_id)?;
        session.stage_write(document_id, model_class, self.timestamp_seconds(), data)
    }

    /// Stages a deletion into the session identified by `token`. The
    /// document's model class is resolved from the committed store
    /// first, then from the session's own staged writes.
    pub fn stage_delete(
        &self,
        token: &str,
        device_id: &str,
        document_id: &str,
    ) -> CoreResult<ChangeEntry> {
        let session = self.owned_session(token, device_id)?;
        let model_class = match self.blobs.model_class(document_id)? {
            Some(class) => class,
            None => session
                .blobs()
                .model_class(document_id)?
                .ok_or_else(|| CoreError::BlobNotFound(document_id.to_owned()))?,
        };
        session.stage_delete(document_id, &model_class, self.timestamp_seconds())
    }

    /// Commits the session: staged blobs and change entries fold into
    /// the committed stores atomically with respect to this manager.
    /// Returns the new timestamp head.
    pub fn commit_write_session(&self, device_id: &str, token: &str) -> CoreResult<i64> {
        self.owned_session(token, device_id)?;
        let session = self
            .sessions
            .lock()
            .remove(token)
            .ok_or_else(|| CoreError::SessionNotFound {
                token: token.to_owned(),
            })?;

        session.timestamps().merge_into(&self.timestamps)?;
        session.blobs().merge_into(&self.blobs)?;
        session.discard()?;

        let head = self.timestamp_head_seconds();
        info!(
            device_id,
            token,
            head,
            account_id = %self.account_id,
            "write session committed"
        );
        self.sweep_expired_sessions();
        Ok(head)
    }

    /// Discards every open session owned by `device_id`. Called when a
    /// device disconnects with sessions still open.
    pub fn discard_sessions_for_device(&self, device_id: &str) {
        let sessions: Vec<Arc<WriteSession>> = {
            let mut table = self.sessions.lock();
            let tokens: Vec<String> = table
                .by_device
                .get(device_id)
                .map(|tokens| tokens.iter().cloned().collect())
                .unwrap_or_default();
            tokens
                .iter()
                .filter_map(|token| table.remove(token))
                .collect()
        };
        for session in sessions {
            warn!(
                device_id,
                token = session.token(),
                "discarding abandoned write session"
            );
            if let Err(err) = session.discard() {
                warn!(error = %err, "failed to discard session storage");
            }
        }
    }

    /// Number of currently open write sessions.
    pub fn open_session_count(&self) -> usize {
        self.sessions.lock().by_token.len()
    }

    /// Persists the timestamp record immediately.
    pub fn flush(&self) -> CoreResult<()> {
        self.timestamps.save()
    }

    fn require_device(&self, device_id: &str) -> CoreResult<()> {
        if self.devices.is_valid(&self.account_id, device_id) {
            Ok(())
        } else {
            Err(CoreError::InvalidDeviceId(device_id.to_owned()))
        }
    }

    fn sweep_expired_sessions(&self) {
        let expired: Vec<Arc<WriteSession>> = {
            let mut table = self.sessions.lock();
            let tokens: Vec<String> = table
                .by_token
                .iter()
                .filter(|(_, session)| session.is_older_than(self.config.session_max_age))
                .map(|(token, _)| token.clone())
                .collect();
            tokens
                .iter()
                .filter_map(|token| table.remove(token))
                .collect()
        };
        for session in expired {
            warn!(
                token = session.token(),
                device_id = session.device_id(),
                "sweeping expired write session"
            );
            if let Err(err) = session.discard() {
                warn!(error = %err, "failed to discard expired session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::StaticDeviceDirectory;
    use blobsync_protocol::ChangeAction;
    use blobsync_storage::MemoryBackend;
    use std::time::Duration;

    fn manager_with(config: SyncConfig) -> (SyncManager, Arc<StaticDeviceDirectory>) {
        let devices = Arc::new(StaticDeviceDirectory::new());
        devices.add("alice", "device-a");
        devices.add("alice", "device-b");
        let manager = SyncManager::open(
            Arc::new(MemoryBackend::new()),
            config,
            Arc::clone(&devices) as Arc<dyn DeviceDirectory>,
            "alice",
        )
        .expect("open manager");
        (manager, devices)
    }

    fn manager() -> SyncManager {
        manager_with(SyncConfig::default()).0
    }

    #[test]
    fn unknown_device_is_rejected() {
        let manager = manager();
        let err = manager.start_write_session("stranger").expect_err("invalid");
        assert!(matches!(err, CoreError::InvalidDeviceId(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn other_accounts_devices_are_rejected() {
        let (manager, devices) = manager_with(SyncConfig::default());
        devices.add("bob", "device-bob");

        assert!(!manager.is_valid_device_id("device-bob"));
        let err = manager
            .start_write_session("device-bob")
            .expect_err("foreign device");
        assert!(matches!(err, CoreError::InvalidDeviceId(_)));
        let err = manager.status("device-bob").expect_err("foreign device");
        assert!(matches!(err, CoreError::InvalidDeviceId(_)));
    }

    #[test]
    fn staged_writes_are_invisible_until_commit() {
        let manager = manager();
        let session = manager.start_write_session("device-a").expect("session");
        let token = session.token().to_owned();

        manager
            .stage_write(&token, "device-a", "doc1", "Note", b"v1".to_vec())
            .expect("stage");

        assert!(manager.blob("doc1").expect("blob").is_none());
        assert!(manager.changes_since(0).is_empty());

        let head = manager
            .commit_write_session("device-a", &token)
            .expect("commit");

        let blob = manager.blob("doc1").expect("blob").expect("present");
        assert_eq!(blob.data, b"v1");
        let changes = manager.changes_since(0);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["doc1"].action, ChangeAction::Write);
        assert_eq!(head, manager.timestamp_head_seconds());
        assert_eq!(manager.open_session_count(), 0);
    }

    #[test]
    fn commit_by_wrong_device_is_rejected() {
        let manager = manager();
        let session = manager.start_write_session("device-a").expect("session");
        let token = session.token().to_owned();

        let err = manager
            .commit_write_session("device-b", &token)
            .expect_err("not owned");
        assert!(matches!(err, CoreError::SessionNotOwned { .. }));
        // Session stays open for its rightful owner.
        assert!(manager.write_session(&token).is_some());
    }

    #[test]
    fn commit_with_unknown_token_is_rejected() {
        let manager = manager();
        let err = manager
            .commit_write_session("device-a", "no-such-token")
            .expect_err("not found");
        assert!(matches!(err, CoreError::SessionNotFound { .. }));
    }

    #[test]
    fn delete_of_committed_document_resolves_its_class() {
        let manager = manager();
        let session = manager.start_write_session("device-a").expect("session");
        let token = session.token().to_owned();
        manager
            .stage_write(&token, "device-a", "doc1", "Sketch", b"v1".to_vec())
            .expect("stage");
        manager
            .commit_write_session("device-a", &token)
            .expect("commit");

        let session = manager.start_write_session("device-a").expect("session");
        let token = session.token().to_owned();
        let entry = manager
            .stage_delete(&token, "device-a", "doc1")
            .expect("stage delete");
        assert_eq!(entry.model_class, "Sketch");
        assert_eq!(entry.action, ChangeAction::Delete);

        manager
            .commit_write_session("device-a", &token)
            .expect("commit");
        assert!(manager.blob("doc1").expect("blob").is_none());
        assert_eq!(manager.changes_since(0)["doc1"].action, ChangeAction::Delete);
    }

    #[test]
    fn delete_of_unknown_document_is_rejected() {
        let manager = manager();
        let session = manager.start_write_session("device-a").expect("session");
        let token = session.token().to_owned();
        let err = manager
            .stage_delete(&token, "device-a", "ghost")
            .expect_err("unknown");
        assert!(matches!(err, CoreError::BlobNotFound(_)));
    }

    #[test]
    fn disconnecting_device_discards_its_sessions() {
        let manager = manager();
        let session = manager.start_write_session("device-a").expect("session");
        let token = session.token().to_owned();
        manager
            .stage_write(&token, "device-a", "doc1", "Note", b"v1".to_vec())
            .expect("stage");

        manager.discard_sessions_for_device("device-a");
        assert!(manager.write_session(&token).is_none());
        assert!(manager.blob("doc1").expect("blob").is_none());
        assert_eq!(manager.open_session_count(), 0);
    }

    #[test]
    fn expired_sessions_are_swept_lazily() {
        let config = SyncConfig::default().with_session_max_age(Duration::ZERO);
        let (manager, _devices) = manager_with(config);

        let stale = manager.start_write_session("device-a").expect("session");
        let stale_token = stale.token().to_owned();
        drop(stale);

        // The next session open sweeps the zero-age session away.
        manager.start_write_session("device-b").expect("session");
        assert!(manager.write_session(&stale_token).is_none());
    }

    #[test]
    fn status_reports_head_and_lock_partition() {
        let manager = manager();
        manager.locks().lock("device-a", "doc1");
        manager.locks().lock("device-b", "doc2");

        let status = manager.status("device-a").expect("status");
        assert_eq!(status.device_id, "device-a");
        assert_eq!(status.timestamp_head_seconds, -1);
        assert_eq!(status.granted_locked_document_ids, vec!["doc1".to_owned()]);
        assert_eq!(status.foreign_locked_document_ids, vec!["doc2".to_owned()]);
    }
}
