//! Advisory per-document locks with a change feed.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use tracing::debug;

/// A lock state transition, delivered to [`LockManager::subscribe`]rs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    /// A device acquired the lock on a document.
    Acquired {
        /// Locked document.
        document_id: String,
        /// Holder.
        device_id: String,
    },
    /// A device released the lock on a document.
    Released {
        /// Unlocked document.
        document_id: String,
        /// Previous holder.
        device_id: String,
    },
}

#[derive(Default)]
struct LockState {
    // Every currently locked document id.
    locked: HashSet<String>,
    // Documents locked per device; a document appears under exactly
    // one device.
    by_device: HashMap<String, HashSet<String>>,
    subscribers: Vec<Sender<LockEvent>>,
}

impl LockState {
    fn emit(&mut self, event: LockEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// First-wins advisory locks for one account's documents.
///
/// Locks are purely advisory: storage never checks them, clients
/// cooperate through them. A lock request on an already-locked document
/// is denied even when the requester is the current holder. Transitions
/// are emitted synchronously, while the internal mutex is held, so
/// subscribers see events in the exact order they happened.
#[derive(Default)]
pub struct LockManager {
    state: Mutex<LockState>,
}

impl LockManager {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers for lock transitions. The feed ends when the manager
    /// is dropped; a dropped receiver is pruned on the next emit.
    pub fn subscribe(&self) -> Receiver<LockEvent> {
        let (tx, rx) = mpsc::channel();
        self.state.lock().subscribers.push(tx);
        rx
    }

    /// Attempts to lock `document_id` for `device_id`. Returns true
    /// only when this call acquired the lock; an already-locked
    /// document is refused no matter who holds it.
    pub fn lock(&self, device_id: &str, document_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.locked.contains(document_id) {
            return false;
        }
        state.locked.insert(document_id.to_owned());
        state
            .by_device
            .entry(device_id.to_owned())
            .or_default()
            .insert(document_id.to_owned());
        debug!(device_id, document_id, "lock acquired");
        state.emit(LockEvent::Acquired {
            document_id: document_id.to_owned(),
            device_id: device_id.to_owned(),
        });
        true
    }

    /// Releases `document_id` if held by `device_id`. Returns true when
    /// the document is unlocked afterwards, false when a different
    /// device still holds it.
    pub fn unlock(&self, device_id: &str, document_id: &str) -> bool {
        let mut state = self.state.lock();
        if !state.locked.contains(document_id) {
            return true;
        }
        let held_by_caller = state
            .by_device
            .get_mut(device_id)
            .is_some_and(|docs| docs.remove(document_id));
        if !held_by_caller {
            return false;
        }
        state.locked.remove(document_id);
        debug!(device_id, document_id, "lock released");
        state.emit(LockEvent::Released {
            document_id: document_id.to_owned(),
            device_id: device_id.to_owned(),
        });
        true
    }

    /// Releases every lock held by `device_id`. Used when a device
    /// disconnects.
    pub fn unlock_all(&self, device_id: &str) {
        let mut state = self.state.lock();
        let Some(documents) = state.by_device.remove(device_id) else {
            return;
        };
        for document_id in documents {
            state.locked.remove(&document_id);
            state.emit(LockEvent::Released {
                document_id,
                device_id: device_id.to_owned(),
            });
        }
    }

    /// True if any device holds a lock on `document_id`.
    pub fn is_locked(&self, document_id: &str) -> bool {
        self.state.lock().locked.contains(document_id)
    }

    /// True if `device_id` itself holds the lock on `document_id`.
    pub fn has_lock(&self, device_id: &str, document_id: &str) -> bool {
        self.state
            .lock()
            .by_device
            .get(device_id)
            .is_some_and(|docs| docs.contains(document_id))
    }

    /// Every currently locked document, regardless of holder.
    pub fn locked_document_ids(&self) -> HashSet<String> {
        self.state.lock().locked.clone()
    }

    /// Documents locked by `device_id`.
    pub fn granted_locks(&self, device_id: &str) -> HashSet<String> {
        self.state
            .lock()
            .by_device
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Documents locked by any device other than `device_id`.
    pub fn foreign_locks(&self, device_id: &str) -> HashSet<String> {
        let state = self.state.lock();
        let own = state.by_device.get(device_id);
        state
            .locked
            .iter()
            .filter(|doc| !own.is_some_and(|docs| docs.contains(*doc)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_device_wins() {
        let locks = LockManager::new();
        assert!(locks.lock("a", "doc1"));
        assert!(!locks.lock("b", "doc1"));
        assert!(locks.is_locked("doc1"));
    }

    #[test]
    fn relock_by_holder_is_refused_but_keeps_the_lock() {
        let locks = LockManager::new();
        let feed = locks.subscribe();

        assert!(locks.lock("a", "doc1"));
        assert!(!locks.lock("a", "doc1"));
        assert!(locks.has_lock("a", "doc1"));

        // Only the original acquisition hits the feed.
        assert!(feed.try_recv().is_ok());
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn only_holder_can_unlock() {
        let locks = LockManager::new();
        locks.lock("a", "doc1");
        assert!(!locks.unlock("b", "doc1"));
        assert!(locks.is_locked("doc1"));
        assert!(locks.unlock("a", "doc1"));
        assert!(!locks.is_locked("doc1"));
    }

    #[test]
    fn unlocking_an_unlocked_document_is_ok() {
        let locks = LockManager::new();
        assert!(locks.unlock("a", "doc1"));
    }

    #[test]
    fn unlock_all_releases_every_lock_of_a_device() {
        let locks = LockManager::new();
        locks.lock("a", "doc1");
        locks.lock("a", "doc2");
        locks.lock("b", "doc3");

        locks.unlock_all("a");
        assert!(!locks.is_locked("doc1"));
        assert!(!locks.is_locked("doc2"));
        assert!(locks.is_locked("doc3"));
    }

    #[test]
    fn granted_and_foreign_partitions() {
        let locks = LockManager::new();
        locks.lock("a", "doc1");
        locks.lock("b", "doc2");

        assert_eq!(locks.granted_locks("a"), HashSet::from(["doc1".to_owned()]));
        assert_eq!(locks.foreign_locks("a"), HashSet::from(["doc2".to_owned()]));
        assert!(locks.has_lock("a", "doc1"));
        assert!(!locks.has_lock("a", "doc2"));
        assert_eq!(
            locks.locked_document_ids(),
            HashSet::from(["doc1".to_owned(), "doc2".to_owned()])
        );
    }

    #[test]
    fn feed_reports_transitions_in_order() {
        let locks = LockManager::new();
        let feed = locks.subscribe();

        locks.lock("a", "doc1");
        locks.lock("b", "doc1"); // denied, no event
        locks.unlock("a", "doc1");

        assert_eq!(
            feed.try_recv().expect("event"),
            LockEvent::Acquired {
                document_id: "doc1".to_owned(),
                device_id: "a".to_owned(),
            }
        );
        assert_eq!(
            feed.try_recv().expect("event"),
            LockEvent::Released {
                document_id: "doc1".to_owned(),
                device_id: "a".to_owned(),
            }
        );
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let locks = LockManager::new();
        drop(locks.subscribe());
        let live = locks.subscribe();

        locks.lock("a", "doc1");
        assert!(live.try_recv().is_ok());
    }
}
