//! Credential verification and the short-term whitelist.
//!
//! Credentials are opaque strings presented in the websocket auth frame
//! and on every request. The server verifies them through an
//! [`Authenticator`]; verification may be expensive (a signature check,
//! or in other deployments a round trip to an identity provider), so
//! recently verified credentials are cached in a [`Whitelist`] for a
//! grace period.
//!
//! ## HMAC token format
//!
//! [`HmacAuthenticator`] tokens are three dot-separated fields:
//!
//! ```text
//! base64url(account_id).expiry_epoch_seconds.base64url(hmac_sha256)
//! ```
//!
//! where the signature covers `account_id.expiry_epoch_seconds` under a
//! shared secret.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Verifies an opaque credential and resolves it to an account id.
pub trait Authenticator: Send + Sync {
    /// Returns the account the credential belongs to, or `None` when
    /// the credential is invalid or expired.
    fn verify(&self, credential: &str) -> Option<String>;
}

/// Stateless HMAC-SHA256 token authenticator over a shared secret.
pub struct HmacAuthenticator {
    secret: Vec<u8>,
}

impl HmacAuthenticator {
    /// Creates an authenticator with the given signing secret.
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Issues a token for `account_id` valid for `ttl`.
    pub fn issue(&self, account_id: &str, ttl: Duration) -> String {
        let expiry = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + ttl.as_secs();
        let payload = format!("{account_id}.{expiry}");
        let signature = self.sign(payload.as_bytes());
        format!(
            "{}.{expiry}.{}",
            URL_SAFE_NO_PAD.encode(account_id.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    fn sign(&self, data: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

impl Authenticator for HmacAuthenticator {
    fn verify(&self, credential: &str) -> Option<String> {
        let mut parts = credential.splitn(3, '.');
        let account_b64 = parts.next()?;
        let expiry_text = parts.next()?;
        let signature_b64 = parts.next()?;

        let account_bytes = URL_SAFE_NO_PAD.decode(account_b64).ok()?;
        let account_id = String::from_utf8(account_bytes).ok()?;
        let expiry: u64 = expiry_text.parse().ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;

        let payload = format!("{account_id}.{expiry}");
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now > expiry {
            return None;
        }
        Some(account_id)
    }
}

/// Fixed credential-to-account table. For tests and embedded setups.
#[derive(Default)]
pub struct MockAuthenticator {
    accounts: Mutex<HashMap<String, String>>,
}

impl MockAuthenticator {
    /// Creates an empty authenticator that rejects everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `credential` as belonging to `account_id`.
    pub fn allow(&self, credential: &str, account_id: &str) {
        self.accounts
            .lock()
            .insert(credential.to_owned(), account_id.to_owned());
    }

    /// Stops accepting `credential`.
    pub fn revoke(&self, credential: &str) {
        self.accounts.lock().remove(credential);
    }
}

impl Authenticator for MockAuthenticator {
    fn verify(&self, credential: &str) -> Option<String> {
        self.accounts.lock().get(credential).cloned()
    }
}

// Expired whitelist entries are swept once per this many checks.
const PRUNE_INTERVAL: usize = 100;

/// Grace-period cache of verified credentials.
pub struct Whitelist {
    grace: Duration,
    entries: Mutex<HashMap<String, WhitelistEntry>>,
    checks: AtomicUsize,
}

struct WhitelistEntry {
    account_id: String,
    // None while the credential is pinned for an open write session.
    expires_at: Option<Instant>,
}

impl WhitelistEntry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

impl Whitelist {
    /// Creates a whitelist caching credentials for `grace`.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            entries: Mutex::new(HashMap::new()),
            checks: AtomicUsize::new(0),
        }
    }

    /// Caches a verified credential, refreshing its expiry if already
    /// present.
    pub fn add(&self, credential: &str, account_id: &str) {
        let mut entries = self.entries.lock();
        match entries.get_mut(credential) {
            // A pinned credential keeps its pin across re-verification.
            Some(entry) if entry.expires_at.is_none() => {}
            _ => {
                entries.insert(
                    credential.to_owned(),
                    WhitelistEntry {
                        account_id: account_id.to_owned(),
                        expires_at: Some(Instant::now() + self.grace),
                    },
                );
            }
        }
    }

    /// Pins a credential so it stays valid until unpinned, regardless
    /// of the grace period. Used while a write session is open.
    pub fn pin(&self, credential: &str, account_id: &str) {
        self.entries.lock().insert(
            credential.to_owned(),
            WhitelistEntry {
                account_id: account_id.to_owned(),
                expires_at: None,
            },
        );
    }

    /// Lifts a pin, putting the credential back on the normal grace
    /// clock.
    pub fn unpin(&self, credential: &str) {
        if let Some(entry) = self.entries.lock().get_mut(credential) {
            if entry.expires_at.is_none() {
                entry.expires_at = Some(Instant::now() + self.grace);
            }
        }
    }

    /// Drops a credential, forcing the next check through full
    /// verification.
    pub fn remove(&self, credential: &str) {
        self.entries.lock().remove(credential);
    }

    /// Returns the cached account for an unexpired credential.
    pub fn check(&self, credential: &str) -> Option<String> {
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        let mut entries = self.entries.lock();
        if checks % PRUNE_INTERVAL == 0 {
            let now = Instant::now();
            let before = entries.len();
            entries.retain(|_, entry| entry.live(now));
            debug!(pruned = before - entries.len(), "whitelist pruned");
        }
        let entry = entries.get(credential)?;
        if !entry.live(Instant::now()) {
            return None;
        }
        Some(entry.account_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> HmacAuthenticator {
        HmacAuthenticator::new(b"test-secret-key-32-bytes-long!!".to_vec())
    }

    #[test]
    fn issue_and_verify_token() {
        let auth = authenticator();
        let token = auth.issue("alice", Duration::from_secs(60));
        assert_eq!(auth.verify(&token).as_deref(), Some("alice"));
    }

    #[test]
    fn reject_tampered_token() {
        let auth = authenticator();
        let mut token = auth.issue("alice", Duration::from_secs(60));
        token.push('x');
        assert!(auth.verify(&token).is_none());
    }

    #[test]
    fn reject_expired_token() {
        let auth = authenticator();
        let token = auth.issue("alice", Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1100));
        assert!(auth.verify(&token).is_none());
    }

    #[test]
    fn reject_token_signed_with_other_secret() {
        let other = HmacAuthenticator::new(b"a-different-secret-entirely!!!!".to_vec());
        let token = other.issue("alice", Duration::from_secs(60));
        assert!(authenticator().verify(&token).is_none());
    }

    #[test]
    fn reject_garbage() {
        let auth = authenticator();
        assert!(auth.verify("").is_none());
        assert!(auth.verify("no-dots-here").is_none());
        assert!(auth.verify("a.b.c").is_none());
    }

    #[test]
    fn mock_authenticator_table() {
        let auth = MockAuthenticator::new();
        assert!(auth.verify("t1").is_none());
        auth.allow("t1", "alice");
        assert_eq!(auth.verify("t1").as_deref(), Some("alice"));
        auth.revoke("t1");
        assert!(auth.verify("t1").is_none());
    }

    #[test]
    fn whitelist_caches_until_grace_expires() {
        let whitelist = Whitelist::new(Duration::from_millis(30));
        whitelist.add("t1", "alice");
        assert_eq!(whitelist.check("t1").as_deref(), Some("alice"));

        std::thread::sleep(Duration::from_millis(60));
        assert!(whitelist.check("t1").is_none());
    }

    #[test]
    fn pinned_credential_survives_grace_until_unpinned() {
        let whitelist = Whitelist::new(Duration::from_millis(20));
        whitelist.pin("t1", "alice");

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(whitelist.check("t1").as_deref(), Some("alice"));

        // Re-verification must not knock the pin loose.
        whitelist.add("t1", "alice");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(whitelist.check("t1").as_deref(), Some("alice"));

        whitelist.unpin("t1");
        std::thread::sleep(Duration::from_millis(50));
        assert!(whitelist.check("t1").is_none());
    }

    #[test]
    fn whitelist_remove_forces_reverification() {
        let whitelist = Whitelist::new(Duration::from_secs(60));
        whitelist.add("t1", "alice");
        whitelist.remove("t1");
        assert!(whitelist.check("t1").is_none());
    }
}
