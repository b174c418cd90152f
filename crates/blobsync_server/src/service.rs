//! The connection-facing sync service.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use blobsync_core::{
    BlobEntry, Debouncer, DeviceDirectory, SyncManager, SyncRegistry,
};
use blobsync_protocol::{AuthFrame, AuthResponse, ChangeEntry, LockResponse, PushedMessage, Status};
use blobsync_storage::KvBackend;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::auth::{Authenticator, Whitelist};
use crate::config::ServerConfig;
use crate::devices::SessionDeviceDirectory;
use crate::error::{ServerError, ServerResult};
use crate::hub::{ConnectionHub, ConnectionId, Outbound};

struct AccountBroadcaster {
    debouncer: Arc<Debouncer>,
    forwarder: Option<JoinHandle<()>>,
}

/// Transport-agnostic front of the sync engine.
///
/// The websocket layer feeds it raw frames and connection lifecycle
/// events; the HTTP layer calls its request methods. The service owns
/// authentication, device identity, the per-account engine registry,
/// and the debounced status push that tells idle devices to pull.
///
/// Request methods follow a coarse read/write discipline per account:
/// operations observing committed state take the engine's read guard
/// and may run concurrently, while commits and lock mutations take the
/// write guard and run alone.
pub struct SyncService {
    config: ServerConfig,
    hub: Arc<ConnectionHub>,
    devices: Arc<SessionDeviceDirectory>,
    authenticator: Arc<dyn Authenticator>,
    whitelist: Whitelist,
    registry: Arc<SyncRegistry>,
    broadcasters: Mutex<HashMap<String, AccountBroadcaster>>,
}

impl SyncService {
    /// Creates a service over the shared storage backend.
    pub fn new(
        backend: Arc<dyn KvBackend>,
        authenticator: Arc<dyn Authenticator>,
        config: ServerConfig,
    ) -> Self {
        let devices = Arc::new(SessionDeviceDirectory::new());
        let registry = Arc::new(SyncRegistry::new(
            backend,
            config.sync.clone(),
            Arc::clone(&devices) as Arc<dyn DeviceDirectory>,
        ));
        Self {
            whitelist: Whitelist::new(config.auth_grace),
            config,
            hub: Arc::new(ConnectionHub::new()),
            devices,
            authenticator,
            registry,
            broadcasters: Mutex::new(HashMap::new()),
        }
    }

    /// The connection hub, for transports to wire sends through.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// The device directory issuing per-connection ids.
    pub fn devices(&self) -> &Arc<SessionDeviceDirectory> {
        &self.devices
    }

    // ---- connection lifecycle -------------------------------------------

    /// Registers a new, not yet authenticated connection.
    pub fn open_connection(&self, outbound: Outbound) -> ConnectionId {
        self.hub.register(outbound)
    }

    /// Handles one inbound text frame.
    ///
    /// Every frame must be an auth frame; the credential is re-verified
    /// each time, so a revoked credential cuts an existing connection
    /// off at its next frame. The first successful frame attaches the
    /// connection to its account group, issues its device id, and pushes
    /// an initial status.
    pub fn handle_frame(&self, connection: ConnectionId, frame: &str) -> ServerResult<()> {
        let auth: AuthFrame = serde_json::from_str(frame)
            .map_err(|err| ServerError::InvalidRequest(format!("bad auth frame: {err}")))?;

        let account_id = match self.verify(&auth.auth) {
            Some(account_id) => account_id,
            None => {
                // Transports close the connection on this error; make
                // sure the credential cannot ride the grace cache either.
                self.whitelist.remove(&auth.auth);
                self.reply(connection, &PushedMessage::Auth(AuthResponse { authorized: false }))?;
                return Err(ServerError::AuthenticationFailed(
                    "credential rejected".into(),
                ));
            }
        };

        match self.hub.account_of(connection) {
            None => self.attach_connection(connection, &account_id),
            Some(existing) if existing == account_id => {
                self.reply(connection, &PushedMessage::Auth(AuthResponse { authorized: true }))
            }
            Some(existing) => {
                warn!(
                    connection,
                    account_id, existing, "connection switched accounts mid-stream"
                );
                Err(ServerError::NotAuthorized(
                    "connection already bound to another account".into(),
                ))
            }
        }
    }

    fn attach_connection(&self, connection: ConnectionId, account_id: &str) -> ServerResult<()> {
        if !self.hub.attach(connection, account_id) {
            return Err(ServerError::UnknownConnection(connection));
        }
        let device_id = self.devices.issue(connection, account_id);
        let manager = self.engine(account_id)?;
        info!(connection, account_id, device_id, "device authenticated");

        self.reply(connection, &PushedMessage::Auth(AuthResponse { authorized: true }))?;
        let status = manager.read().status(&device_id)?;
        self.reply(connection, &PushedMessage::Status(status))
    }

    /// Cleans up after a closed connection: locks released, open write
    /// sessions discarded, the device id retired, and the account's
    /// engine torn down when its last device leaves.
    pub fn close_connection(&self, connection: ConnectionId) {
        let device_id = self.devices.revoke(connection);
        let Some(departure) = self.hub.unregister(connection) else {
            return;
        };
        let Some(account_id) = departure.account_id else {
            return;
        };

        if let Some(manager) = self.registry.get(&account_id) {
            if let Some(device_id) = &device_id {
                let manager = manager.write();
                manager.locks().unlock_all(device_id);
                manager.discard_sessions_for_device(device_id);
            }
        }

        if departure.last_in_group {
            info!(account_id, "last device left, tearing down engine");
            self.broadcasters.lock().remove(&account_id);
            self.registry.remove(&account_id);
        }
    }

    // ---- device-facing requests -----------------------------------------

    /// Current status for a device.
    pub fn status(&self, account_id: &str, device_id: &str) -> ServerResult<Status> {
        let manager = self.engine(account_id)?;
        let status = manager.read().status(device_id)?;
        Ok(status)
    }

    /// Committed change entries at or after `since`.
    pub fn changes_since(
        &self,
        account_id: &str,
        device_id: &str,
        since: i64,
    ) -> ServerResult<HashMap<String, ChangeEntry>> {
        let manager = self.engine(account_id)?;
        let manager = manager.read();
        self.require_device(&manager, device_id)?;
        Ok(manager.changes_since(since))
    }

    /// Reads a committed blob.
    pub fn blob(
        &self,
        account_id: &str,
        device_id: &str,
        document_id: &str,
    ) -> ServerResult<Option<BlobEntry>> {
        let manager = self.engine(account_id)?;
        let manager = manager.read();
        self.require_device(&manager, device_id)?;
        Ok(manager.blob(document_id)?)
    }

    /// Whether any device holds a lock on the document.
    pub fn is_locked(
        &self,
        account_id: &str,
        device_id: &str,
        document_id: &str,
    ) -> ServerResult<LockResponse> {
        let manager = self.engine(account_id)?;
        let manager = manager.read();
        self.require_device(&manager, device_id)?;
        Ok(LockResponse {
            document_id: document_id.to_owned(),
            locked: manager.locks().is_locked(document_id),
        })
    }

    /// Attempts to lock a document for a device.
    pub fn lock(
        &self,
        account_id: &str,
        device_id: &str,
        document_id: &str,
    ) -> ServerResult<LockResponse> {
        let manager = self.engine(account_id)?;
        let manager = manager.write();
        self.require_device(&manager, device_id)?;
        let granted = manager.locks().lock(device_id, document_id);
        debug!(account_id, device_id, document_id, granted, "lock request");
        Ok(LockResponse {
            document_id: document_id.to_owned(),
            locked: granted,
        })
    }

    /// Releases a device's lock on a document.
    pub fn unlock(
        &self,
        account_id: &str,
        device_id: &str,
        document_id: &str,
    ) -> ServerResult<LockResponse> {
        let manager = self.engine(account_id)?;
        let manager = manager.write();
        self.require_device(&manager, device_id)?;
        let unlocked = manager.locks().unlock(device_id, document_id);
        Ok(LockResponse {
            document_id: document_id.to_owned(),
            locked: !unlocked,
        })
    }

    /// Opens a write session and returns its token.
    ///
    /// The credential is pinned in the auth cache while the session is
    /// open, so a mid-session expiry cannot strand staged writes. The
    /// pin lifts when the session commits.
    pub fn start_write_session(
        &self,
        account_id: &str,
        device_id: &str,
        credential: &str,
    ) -> ServerResult<String> {
        let manager = self.engine(account_id)?;
        let session = manager.read().start_write_session(device_id)?;
        self.whitelist.pin(credential, account_id);
        Ok(session.token().to_owned())
    }

    /// Stages a document write into an open session.
    pub fn stage_write(
        &self,
        account_id: &str,
        device_id: &str,
        token: &str,
        document_id: &str,
        model_class: &str,
        data: Vec<u8>,
    ) -> ServerResult<ChangeEntry> {
        let manager = self.engine(account_id)?;
        let entry = manager
            .read()
            .stage_write(token, device_id, document_id, model_class, data)?;
        Ok(entry)
    }

    /// Stages a document deletion into an open session.
    pub fn stage_delete(
        &self,
        account_id: &str,
        device_id: &str,
        token: &str,
        document_id: &str,
    ) -> ServerResult<ChangeEntry> {
        let manager = self.engine(account_id)?;
        let entry = manager.read().stage_delete(token, device_id, document_id)?;
        Ok(entry)
    }

    /// Commits an open write session and returns the device's status
    /// afterwards. Peer devices get a debounced status push.
    pub fn commit_write_session(
        &self,
        account_id: &str,
        device_id: &str,
        token: &str,
        credential: &str,
    ) -> ServerResult<Status> {
        let manager = self.engine(account_id)?;
        let status = {
            let manager = manager.write();
            manager.commit_write_session(device_id, token)?;
            manager.status(device_id)?
        };
        self.whitelist.unpin(credential);
        self.request_broadcast(account_id);
        Ok(status)
    }

    // ---- internals -------------------------------------------------------

    fn verify(&self, credential: &str) -> Option<String> {
        if let Some(account_id) = self.whitelist.check(credential) {
            return Some(account_id);
        }
        let account_id = self.authenticator.verify(credential)?;
        self.whitelist.add(credential, &account_id);
        Some(account_id)
    }

    fn reply(&self, connection: ConnectionId, message: &PushedMessage) -> ServerResult<()> {
        let payload = serde_json::to_string(message)?;
        if !self.hub.send(connection, &payload) {
            return Err(ServerError::UnknownConnection(connection));
        }
        Ok(())
    }

    fn require_device(&self, manager: &SyncManager, device_id: &str) -> ServerResult<()> {
        if manager.is_valid_device_id(device_id) {
            Ok(())
        } else {
            Err(ServerError::NotAuthorized(format!(
                "unknown device id {device_id}"
            )))
        }
    }

    /// Looks up the account's engine, opening it (and its broadcast
    /// plumbing) on first use.
    fn engine(&self, account_id: &str) -> ServerResult<Arc<RwLock<SyncManager>>> {
        let (manager, created) = self.registry.manager_for(account_id)?;
        if created {
            self.spawn_broadcaster(account_id, &manager);
        }
        Ok(manager)
    }

    /// Wires the account's lock feed into a debounced status broadcast.
    /// The forwarder thread ends when the engine (and with it the lock
    /// feed) is torn down.
    fn spawn_broadcaster(&self, account_id: &str, manager: &Arc<RwLock<SyncManager>>) {
        let hub = Arc::clone(&self.hub);
        let devices = Arc::clone(&self.devices);
        let registry = Arc::clone(&self.registry);
        let account = account_id.to_owned();
        let debouncer = Arc::new(Debouncer::new(self.config.status_debounce, move || {
            push_status(&hub, &devices, &registry, &account);
        }));

        let feed = manager.read().locks().subscribe();
        let poker = Arc::clone(&debouncer);
        let account = account_id.to_owned();
        let forwarder = thread::spawn(move || {
            while feed.recv().is_ok() {
                poker.poke();
            }
            debug!(account_id = %account, "lock feed closed, forwarder exiting");
        });

        self.broadcasters.lock().insert(
            account_id.to_owned(),
            AccountBroadcaster {
                debouncer,
                forwarder: Some(forwarder),
            },
        );
    }

    fn request_broadcast(&self, account_id: &str) {
        if let Some(broadcaster) = self.broadcasters.lock().get(account_id) {
            broadcaster.debouncer.poke();
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        // Join forwarder threads whose feeds are already gone; live
        // engines are flushed through the registry when it drops.
        let mut broadcasters = self.broadcasters.lock();
        for (_, broadcaster) in broadcasters.iter_mut() {
            if let Some(forwarder) = broadcaster.forwarder.take() {
                if forwarder.is_finished() {
                    let _ = forwarder.join();
                }
            }
        }
    }
}

/// Pushes each connected device of the account its own status view.
fn push_status(
    hub: &ConnectionHub,
    devices: &SessionDeviceDirectory,
    registry: &SyncRegistry,
    account_id: &str,
) {
    let Some(manager) = registry.get(account_id) else {
        return;
    };
    let manager = manager.read();
    let sent = hub.broadcast_with(account_id, |connection| {
        let device_id = devices.device_for(connection)?;
        let status = manager.status(&device_id).ok()?;
        serde_json::to_string(&PushedMessage::Status(status)).ok()
    });
    debug!(account_id, sent, "status broadcast");
}
