//! Per-connection device identity.

use std::collections::HashMap;

use blobsync_core::DeviceDirectory;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::hub::ConnectionId;

struct IssuedDevice {
    account_id: String,
    device_id: String,
}

/// Issues a fresh device id for every authenticated connection and
/// answers validity checks from the engine.
///
/// Device ids are server-assigned, not client-claimed: a client cannot
/// impersonate another device, and an id dies with its connection. Each
/// id is recorded against the account it was issued for, so an id never
/// validates on another account's engine. The engine treats any
/// operation carrying a dead or foreign id as a stale request.
#[derive(Default)]
pub struct SessionDeviceDirectory {
    by_connection: Mutex<HashMap<ConnectionId, IssuedDevice>>,
}

impl SessionDeviceDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a device id for `connection` under `account_id`, or
    /// returns the one already issued to it.
    pub fn issue(&self, connection: ConnectionId, account_id: &str) -> String {
        self.by_connection
            .lock()
            .entry(connection)
            .or_insert_with(|| IssuedDevice {
                account_id: account_id.to_owned(),
                device_id: Uuid::new_v4().to_string(),
            })
            .device_id
            .clone()
    }

    /// The device id issued to `connection`, if any.
    pub fn device_for(&self, connection: ConnectionId) -> Option<String> {
        self.by_connection
            .lock()
            .get(&connection)
            .map(|issued| issued.device_id.clone())
    }

    /// Retires the device id of a closed connection, returning it.
    pub fn revoke(&self, connection: ConnectionId) -> Option<String> {
        self.by_connection
            .lock()
            .remove(&connection)
            .map(|issued| issued.device_id)
    }
}

impl DeviceDirectory for SessionDeviceDirectory {
    fn is_valid(&self, account_id: &str, device_id: &str) -> bool {
        self.by_connection
            .lock()
            .values()
            .any(|issued| issued.account_id == account_id && issued.device_id == device_id)
    }
}
