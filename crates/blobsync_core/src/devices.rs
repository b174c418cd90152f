//! Device identity validation.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Answers whether a device id presented by a client is currently
/// recognized for an account. The server side issues ids per connection
/// and records which account each one belongs to; the engine only ever
/// asks this question.
///
/// Validity is account-scoped: an id issued to a device of one account
/// never validates on another account's engine.
pub trait DeviceDirectory: Send + Sync {
    /// True if `device_id` identifies a known, live device belonging to
    /// `account_id`.
    fn is_valid(&self, account_id: &str, device_id: &str) -> bool;
}

/// A directory over a fixed, mutable table of device ids per account.
/// Suitable for embedded use and tests; servers use a connection-backed
/// directory.
#[derive(Default)]
pub struct StaticDeviceDirectory {
    devices: RwLock<HashMap<String, HashSet<String>>>,
}

impl StaticDeviceDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device id under an account.
    pub fn add(&self, account_id: &str, device_id: &str) {
        self.devices
            .write()
            .entry(account_id.to_owned())
            .or_default()
            .insert(device_id.to_owned());
    }

    /// Removes a device id from an account.
    pub fn remove(&self, account_id: &str, device_id: &str) {
        let mut devices = self.devices.write();
        if let Some(ids) = devices.get_mut(account_id) {
            ids.remove(device_id);
            if ids.is_empty() {
                devices.remove(account_id);
            }
        }
    }
}

impl DeviceDirectory for StaticDeviceDirectory {
    fn is_valid(&self, account_id: &str, device_id: &str) -> bool {
        self.devices
            .read()
            .get(account_id)
            .is_some_and(|ids| ids.contains(device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_control_validity() {
        let directory = StaticDeviceDirectory::new();
        assert!(!directory.is_valid("alice", "d1"));
        directory.add("alice", "d1");
        assert!(directory.is_valid("alice", "d1"));
        directory.remove("alice", "d1");
        assert!(!directory.is_valid("alice", "d1"));
    }

    #[test]
    fn validity_is_account_scoped() {
        let directory = StaticDeviceDirectory::new();
        directory.add("alice", "d1");
        assert!(directory.is_valid("alice", "d1"));
        assert!(!directory.is_valid("bob", "d1"));
    }
}
