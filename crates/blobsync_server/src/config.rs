//! Server configuration.

use std::time::Duration;

use blobsync_core::SyncConfig;

/// Configuration for the server layer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Engine configuration handed to every per-account manager.
    pub sync: SyncConfig,
    /// Quiet window before a status broadcast goes out. Bursts of
    /// commits and lock changes collapse into one push per account.
    pub status_debounce: Duration,
    /// How long a verified credential stays in the whitelist before a
    /// full re-verification is required.
    pub auth_grace: Duration,
}

impl ServerConfig {
    /// Creates a configuration around the given engine settings.
    pub fn new(sync: SyncConfig) -> Self {
        Self {
            sync,
            status_debounce: Duration::from_millis(1000),
            auth_grace: Duration::from_secs(5 * 60),
        }
    }

    /// Sets the status broadcast debounce window.
    pub fn with_status_debounce(mut self, window: Duration) -> Self {
        self.status_debounce = window;
        self
    }

    /// Sets the whitelist grace period.
    pub fn with_auth_grace(mut self, grace: Duration) -> Self {
        self.auth_grace = grace;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}
