//! Sync engine configuration.

use std::time::Duration;

/// Configuration shared by every per-account manager.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Namespace prefix for all durable keys (separates deployments
    /// sharing one backend, e.g. `"dev"` vs `"prod"`).
    pub storage_prefix: String,
    /// Quiet window before a dirty timestamp record is persisted.
    pub save_debounce: Duration,
    /// Age after which an open, uncommitted write session is swept and
    /// its staged keys discarded.
    pub session_max_age: Duration,
}

impl SyncConfig {
    /// Creates a configuration with the given storage prefix.
    pub fn new(storage_prefix: impl Into<String>) -> Self {
        Self {
            storage_prefix: storage_prefix.into(),
            save_debounce: Duration::from_millis(2500),
            session_max_age: Duration::from_secs(60 * 60),
        }
    }

    /// Sets the timestamp save debounce window.
    pub fn with_save_debounce(mut self, window: Duration) -> Self {
        self.save_debounce = window;
        self
    }

    /// Sets the write session maximum age.
    pub fn with_session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = max_age;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("main")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.storage_prefix, "main");
        assert_eq!(config.save_debounce, Duration::from_millis(2500));
    }

    #[test]
    fn config_builder() {
        let config = SyncConfig::new("test")
            .with_save_debounce(Duration::from_millis(10))
            .with_session_max_age(Duration::from_secs(5));
        assert_eq!(config.save_debounce, Duration::from_millis(10));
        assert_eq!(config.session_max_age, Duration::from_secs(5));
    }
}
