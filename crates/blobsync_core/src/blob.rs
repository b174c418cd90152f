//! Content-addressed blob storage with an optional staging mode.

use std::collections::HashSet;
use std::sync::Arc;

use blobsync_storage::KvBackend;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{CoreError, CoreResult};

/// A stored document blob with its sync metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// Document id.
    pub uuid: String,
    /// Client-defined document type, opaque to the server.
    pub model_class: String,
    /// Seconds timestamp assigned when the blob was staged.
    pub timestamp_seconds: i64,
    /// Raw document bytes.
    pub data: Vec<u8>,
}

#[derive(Default)]
struct Staged {
    writes: HashSet<String>,
    deletions: HashSet<String>,
}

/// Blob storage for one account, namespaced within the key-value backend.
///
/// A store is either *direct* (the account's durable main store) or
/// *staged* (a scratch namespace owned by one write session). A staged
/// store additionally tracks which document ids were written and which
/// were deleted, so a commit can replay exactly those changes against
/// the main store via [`merge_into`](BlobStore::merge_into).
///
/// Each blob occupies four keys under
/// `blob/<namespace>/<account>/<uuid>:{uuid,class,seconds,data}`, always
/// written and deleted together in a single backend call.
pub struct BlobStore {
    backend: Arc<dyn KvBackend>,
    account_id: String,
    namespace: String,
    staged: Option<Mutex<Staged>>,
}

const FIELD_UUID: &str = "uuid";
const FIELD_CLASS: &str = "class";
const FIELD_SECONDS: &str = "seconds";
const FIELD_DATA: &str = "data";

impl BlobStore {
    /// Opens the account's durable main store.
    pub fn direct(backend: Arc<dyn KvBackend>, config: &SyncConfig, account_id: &str) -> Self {
        Self {
            backend,
            account_id: account_id.to_owned(),
            namespace: config.storage_prefix.clone(),
            staged: None,
        }
    }

    /// Opens a staged store in its own scratch `namespace`, tracking
    /// writes and deletions for a later merge.
    pub fn staged(backend: Arc<dyn KvBackend>, account_id: &str, namespace: &str) -> Self {
        Self {
            backend,
            account_id: account_id.to_owned(),
            namespace: namespace.to_owned(),
            staged: Some(Mutex::new(Staged::default())),
        }
    }

    fn key(&self, uuid: &str, field: &str) -> String {
        format!(
            "blob/{}/{}/{}:{}",
            self.namespace, self.account_id, uuid, field
        )
    }

    fn keys(&self, uuid: &str) -> [String; 4] {
        [
            self.key(uuid, FIELD_UUID),
            self.key(uuid, FIELD_CLASS),
            self.key(uuid, FIELD_SECONDS),
            self.key(uuid, FIELD_DATA),
        ]
    }

    /// Writes a blob, replacing any existing one with the same id.
    pub fn put(&self, entry: &BlobEntry) -> CoreResult<()> {
        let pairs = [
            (self.key(&entry.uuid, FIELD_UUID), entry.uuid.clone().into_bytes()),
            (
                self.key(&entry.uuid, FIELD_CLASS),
                entry.model_class.clone().into_bytes(),
            ),
            (
                self.key(&entry.uuid, FIELD_SECONDS),
                entry.timestamp_seconds.to_string().into_bytes(),
            ),
            (self.key(&entry.uuid, FIELD_DATA), entry.data.clone()),
        ];
        self.backend.put_many(&pairs)?;

        if let Some(staged) = &self.staged {
            let mut staged = staged.lock();
            staged.deletions.remove(&entry.uuid);
            staged.writes.insert(entry.uuid.clone());
        }
        Ok(())
    }

    /// Reads a blob. Returns `Ok(None)` when no blob exists for `uuid`;
    /// a blob with some but not all of its four keys is an error.
    pub fn get(&self, uuid: &str) -> CoreResult<Option<BlobEntry>> {
        let keys = self.keys(uuid);
        let mut values = self.backend.get_many(&keys)?.into_iter();
        let (id, class, seconds, data) = (
            values.next().flatten(),
            values.next().flatten(),
            values.next().flatten(),
            values.next().flatten(),
        );

        let Some(_) = id else {
            return Ok(None);
        };
        let class = class.ok_or(CoreError::CorruptBlob {
            uuid: uuid.to_owned(),
            missing: FIELD_CLASS,
        })?;
        let seconds = seconds.ok_or(CoreError::CorruptBlob {
            uuid: uuid.to_owned(),
            missing: FIELD_SECONDS,
        })?;
        let data = data.ok_or(CoreError::CorruptBlob {
            uuid: uuid.to_owned(),
            missing: FIELD_DATA,
        })?;

        let timestamp_seconds = String::from_utf8_lossy(&seconds)
            .parse::<i64>()
            .map_err(|_| CoreError::CorruptBlob {
                uuid: uuid.to_owned(),
                missing: FIELD_SECONDS,
            })?;

        Ok(Some(BlobEntry {
            uuid: uuid.to_owned(),
            model_class: String::from_utf8_lossy(&class).into_owned(),
            timestamp_seconds,
            data,
        }))
    }

    /// True if a blob exists for `uuid`.
    pub fn has(&self, uuid: &str) -> CoreResult<bool> {
        Ok(self.backend.get(&self.key(uuid, FIELD_UUID))?.is_some())
    }

    /// The stored model class for `uuid`, if the blob exists.
    pub fn model_class(&self, uuid: &str) -> CoreResult<Option<String>> {
        Ok(self
            .backend
            .get(&self.key(uuid, FIELD_CLASS))?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Deletes a blob if present. In a staged store the id is recorded
    /// as a deletion to replay at merge time.
    pub fn delete(&self, uuid: &str) -> CoreResult<()> {
        self.backend.delete_many(&self.keys(uuid))?;
        if let Some(staged) = &self.staged {
            let mut staged = staged.lock();
            staged.writes.remove(uuid);
            staged.deletions.insert(uuid.to_owned());
        }
        Ok(())
    }

    /// Document ids written in this staged store. Empty for a direct store.
    pub fn staged_writes(&self) -> HashSet<String> {
        match &self.staged {
            Some(staged) => staged.lock().writes.clone(),
            None => HashSet::new(),
        }
    }

    /// Document ids deleted in this staged store. Empty for a direct store.
    pub fn staged_deletions(&self) -> HashSet<String> {
        match &self.staged {
            Some(staged) => staged.lock().deletions.clone(),
            None => HashSet::new(),
        }
    }

    /// Replays this staged store's changes against `target`: written
    /// blobs move over by key rename, deletions delete in the target.
    /// The staged sets are cleared afterwards.
    pub fn merge_into(&self, target: &BlobStore) -> CoreResult<()> {
        let Some(staged) = &self.staged else {
            return Ok(());
        };
        let (writes, deletions) = {
            let staged = staged.lock();
            (staged.writes.clone(), staged.deletions.clone())
        };

        for uuid in &writes {
            let from = self.keys(uuid);
            let to = target.keys(uuid);
            let pairs: Vec<(String, String)> =
                from.into_iter().zip(to).collect();
            self.backend.rename_many(&pairs)?;
        }
        for uuid in &deletions {
            self.backend.delete_many(&target.keys(uuid))?;
        }
        debug!(
            writes = writes.len(),
            deletions = deletions.len(),
            "merged staged blobs"
        );

        let mut staged = staged.lock();
        staged.writes.clear();
        staged.deletions.clear();
        Ok(())
    }

    /// Drops every blob in this store's namespace without touching any
    /// other store.
    pub fn discard(&self) -> CoreResult<()> {
        let prefix = format!("blob/{}/{}/", self.namespace, self.account_id);
        let keys = self.backend.keys_with_prefix(&prefix)?;
        if !keys.is_empty() {
            self.backend.delete_many(&keys)?;
        }
        if let Some(staged) = &self.staged {
            let mut staged = staged.lock();
            staged.writes.clear();
            staged.deletions.clear();
        }
        Ok(())
    }
}
