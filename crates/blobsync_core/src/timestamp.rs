//! Per-account logical clock over document mutations.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use blobsync_protocol::{ChangeAction, ChangeEntry};
use blobsync_storage::KvBackend;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::error::CoreResult;

/// Head value reported while no mutation has ever been recorded.
pub const EMPTY_HEAD: i64 = -1;

struct State {
    entries: HashMap<String, ChangeEntry>,
    // None means the cached head is stale and must be recomputed.
    head: Option<i64>,
}

struct Inner {
    backend: Option<Arc<dyn KvBackend>>,
    key: String,
    state: Mutex<State>,
}

impl Inner {
    fn persist(&self) -> CoreResult<()> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let encoded = {
            let state = self.state.lock();
            serde_json::to_vec(&state.entries)?
        };
        backend.put_many(&[(self.key.clone(), encoded)])?;
        Ok(())
    }
}

/// Ordered record of the latest mutation per document.
///
/// Each [`record`](TimestampRecord::record) call replaces the document's
/// entry with the newer one, so the map holds exactly one entry per
/// document id. The head (largest timestamp seen) is cached and
/// recomputed lazily after invalidation.
///
/// Persistent records write themselves back to storage through a
/// debounced save; callers that need durability at a known point call
/// [`save`](TimestampRecord::save) directly.
pub struct TimestampRecord {
    inner: Arc<Inner>,
    debouncer: Option<Debouncer>,
}

impl TimestampRecord {
    /// Opens the persistent record for `account_id`, loading any
    /// previously saved entries.
    pub fn open(
        backend: Arc<dyn KvBackend>,
        config: &SyncConfig,
        account_id: &str,
    ) -> CoreResult<Self> {
        let key = format!("{}/{}/timestamps", config.storage_prefix, account_id);
        let entries = match backend.get(&key)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => HashMap::new(),
        };
        debug!(account_id, entries = entries.len(), "loaded timestamp record");

        let inner = Arc::new(Inner {
            backend: Some(backend),
            key,
            state: Mutex::new(State {
                entries,
                head: None,
            }),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let debouncer = Debouncer::new(config.save_debounce, move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.persist() {
                    error!(error = %err, "debounced timestamp save failed");
                }
            }
        });

        Ok(Self {
            inner,
            debouncer: Some(debouncer),
        })
    }

    /// Creates an in-memory record that never persists. Used to stage
    /// mutations inside a write session before they fold into the
    /// account's persistent record.
    pub fn ephemeral() -> Self {
        Self {
            inner: Arc::new(Inner {
                backend: None,
                key: String::new(),
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    head: None,
                }),
            }),
            debouncer: None,
        }
    }

    /// Records a mutation, replacing any earlier entry for the same
    /// document, and returns the entry written.
    pub fn record(
        &self,
        document_id: &str,
        model_class: &str,
        timestamp_seconds: i64,
        action: ChangeAction,
    ) -> ChangeEntry {
        let entry = ChangeEntry {
            uuid: document_id.to_owned(),
            model_class: model_class.to_owned(),
            timestamp_seconds,
            action,
        };
        {
            let mut state = self.inner.state.lock();
            state.entries.insert(document_id.to_owned(), entry.clone());
            state.head = None;
        }
        if let Some(debouncer) = &self.debouncer {
            debouncer.poke();
        }
        entry
    }

    /// Largest timestamp recorded, or [`EMPTY_HEAD`] when no mutation
    /// has ever been recorded.
    pub fn timestamp_head_seconds(&self) -> i64 {
        let mut state = self.inner.state.lock();
        if let Some(head) = state.head {
            return head;
        }
        let head = state
            .entries
            .values()
            .map(|entry| entry.timestamp_seconds)
            .max()
            .unwrap_or(EMPTY_HEAD);
        state.head = Some(head);
        head
    }

    /// The entry recorded for `document_id`, if any.
    pub fn entry(&self, document_id: &str) -> Option<ChangeEntry> {
        self.inner.state.lock().entries.get(document_id).cloned()
    }

    /// The timestamp recorded for `document_id`, or [`EMPTY_HEAD`] when
    /// the document has never been recorded.
    pub fn timestamp_seconds(&self, document_id: &str) -> i64 {
        self.inner
            .state
            .lock()
            .entries
            .get(document_id)
            .map(|entry| entry.timestamp_seconds)
            .unwrap_or(EMPTY_HEAD)
    }

    /// The most recent entry, if any mutation has been recorded.
    pub fn head(&self) -> Option<ChangeEntry> {
        self.inner
            .state
            .lock()
            .entries
            .values()
            .max_by_key(|entry| entry.timestamp_seconds)
            .cloned()
    }

    /// All entries, keyed by document id.
    pub fn entries(&self) -> HashMap<String, ChangeEntry> {
        self.inner.state.lock().entries.clone()
    }

    /// Entries at or after `since`. A `since` of zero or below returns
    /// everything, matching a client that has never synced.
    pub fn entries_since(&self, since: i64) -> HashMap<String, ChangeEntry> {
        let state = self.inner.state.lock();
        if since > 0 {
            state
                .entries
                .iter()
                .filter(|(_, entry)| entry.timestamp_seconds >= since)
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect()
        } else {
            state.entries.clone()
        }
    }

    /// True when no mutation has been recorded.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// Persists the record now and disarms any pending debounced save.
    pub fn save(&self) -> CoreResult<()> {
        if let Some(debouncer) = &self.debouncer {
            debouncer.cancel();
        }
        self.inner.persist()
    }

    /// Folds every entry of this record into `target` and saves the
    /// target. Later entries win per document id, the same rule
    /// [`record`](TimestampRecord::record) applies.
    pub fn merge_into(&self, target: &TimestampRecord) -> CoreResult<()> {
        let staged = self.entries();
        {
            let mut state = target.inner.state.lock();
            for (id, entry) in staged {
                state.entries.insert(id, entry);
            }
            state.head = None;
        }
        target.save()
    }
}
