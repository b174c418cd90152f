//! Account-to-engine registry.

use std::collections::HashMap;
use std::sync::Arc;

use blobsync_storage::KvBackend;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::devices::DeviceDirectory;
use crate::error::CoreResult;
use crate::manager::SyncManager;

/// Creates and caches one [`SyncManager`] per active account.
///
/// Every manager is handed out behind an [`RwLock`]: callers take a
/// read guard for operations that only observe committed state (status,
/// change listings, blob reads, lock queries) and a write guard for
/// operations that mutate it (commits, lock and unlock, teardown).
/// Managers exist only while at least one device of the account is
/// connected; [`remove`](SyncRegistry::remove) flushes and drops the
/// engine when the last one leaves.
pub struct SyncRegistry {
    backend: Arc<dyn KvBackend>,
    config: SyncConfig,
    devices: Arc<dyn DeviceDirectory>,
    managers: Mutex<HashMap<String, Arc<RwLock<SyncManager>>>>,
}

impl SyncRegistry {
    /// Creates a registry over the shared backend and device directory.
    pub fn new(
        backend: Arc<dyn KvBackend>,
        config: SyncConfig,
        devices: Arc<dyn DeviceDirectory>,
    ) -> Self {
        Self {
            backend,
            config,
            devices,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the engine for `account_id`, opening it on first use.
    /// The boolean is true when this call created the engine, letting
    /// the caller attach per-account plumbing exactly once.
    pub fn manager_for(
        &self,
        account_id: &str,
    ) -> CoreResult<(Arc<RwLock<SyncManager>>, bool)> {
        let mut managers = self.managers.lock();
        if let Some(manager) = managers.get(account_id) {
            return Ok((Arc::clone(manager), false));
        }
        let manager = Arc::new(RwLock::new(SyncManager::open(
            Arc::clone(&self.backend),
            self.config.clone(),
            Arc::clone(&self.devices),
            account_id,
        )?));
        managers.insert(account_id.to_owned(), Arc::clone(&manager));
        Ok((manager, true))
    }

    /// The engine for `account_id` if one is currently open.
    pub fn get(&self, account_id: &str) -> Option<Arc<RwLock<SyncManager>>> {
        self.managers.lock().get(account_id).cloned()
    }

    /// Flushes and drops the engine for `account_id`. A no-op when no
    /// engine is open.
    pub fn remove(&self, account_id: &str) {
        let manager = self.managers.lock().remove(account_id);
        if let Some(manager) = manager {
            info!(account_id, "tearing down sync manager");
            if let Err(err) = manager.read().flush() {
                warn!(account_id, error = %err, "flush on teardown failed");
            }
        }
    }

    /// Number of accounts with an open engine.
    pub fn len(&self) -> usize {
        self.managers.lock().len()
    }

    /// True when no engine is open.
    pub fn is_empty(&self) -> bool {
        self.managers.lock().is_empty()
    }
}

impl Drop for SyncRegistry {
    fn drop(&mut self) {
        // Pending debounced saves die with the engines, so flush every
        // still-open timestamp record first.
        for (account_id, manager) in self.managers.lock().iter() {
            if let Err(err) = manager.read().flush() {
                warn!(account_id, error = %err, "flush on shutdown failed");
            }
        }
    }
}
