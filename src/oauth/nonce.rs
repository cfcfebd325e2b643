// One-time nonces binding an identity token to the login attempt that asked for it
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{AppleAuthError, Result};
use crate::utils::crypto::{generate_nonce, NONCE_SIZE};

/// Default lifetime of an issued, unredeemed nonce
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(600);

#[derive(Default)]
struct NonceStore {
    pending: HashMap<String, Instant>,
    consumed: HashMap<String, Instant>,
}

impl NonceStore {
    fn purge_expired(&mut self, ttl: Duration) {
        let now = Instant::now();
        self.pending.retain(|_, issued| now.duration_since(*issued) < ttl);
        self.consumed.retain(|_, used| now.duration_since(*used) < ttl);
    }
}

/// Tracks pending nonces and recently consumed ones
///
/// A nonce is redeemable exactly once. Consumed nonces are remembered for the
/// same TTL so that a second presentation is reported as a replay.
pub struct NonceManager {
    ttl: Duration,
    store: Mutex<NonceStore>,
}

impl NonceManager {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            store: Mutex::new(NonceStore::default()),
        }
    }

    fn store(&self) -> MutexGuard<'_, NonceStore> {
        // The store holds plain maps, a panic mid-update leaves them usable
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate a fresh nonce and record it as pending
    #[must_use]
    pub fn issue(&self) -> String {
        let nonce = generate_nonce(NONCE_SIZE);
        self.record(&nonce);
        nonce
    }

    /// Record a caller-supplied nonce as pending
    pub fn record(&self, nonce: &str) {
        let mut store = self.store();
        store.purge_expired(self.ttl);
        store.pending.insert(nonce.to_string(), Instant::now());
        debug!("Recorded nonce ({} pending)", store.pending.len());
    }

    /// Whether `nonce` has been issued and not yet consumed or expired
    #[must_use]
    pub fn is_pending(&self, nonce: &str) -> bool {
        let mut store = self.store();
        store.purge_expired(self.ttl);
        store.pending.contains_key(nonce)
    }

    /// Invalidate a pending nonce without checking a token against it
    ///
    /// Returns whether `nonce` was still pending.
    pub fn discard(&self, nonce: &str) -> bool {
        let mut store = self.store();
        store.purge_expired(self.ttl);

        if store.pending.remove(nonce).is_none() {
            return false;
        }
        store.consumed.insert(nonce.to_string(), Instant::now());
        debug!("Discarded nonce of a failed login attempt");
        true
    }

    /// Consume `expected` and check that `supplied` matches it
    ///
    /// `expected` is invalidated whatever the outcome.
    ///
    /// # Errors
    ///
    /// * `NonceReplay` if `expected` was already consumed
    /// * `NonceMismatch` if `expected` was never issued, has expired, or the
    ///   supplied value differs
    pub fn verify(&self, supplied: Option<&str>, expected: &str) -> Result<()> {
        let mut store = self.store();
        store.purge_expired(self.ttl);

        if store.consumed.contains_key(expected) {
            return Err(AppleAuthError::NonceReplay);
        }

        if store.pending.remove(expected).is_none() {
            return Err(AppleAuthError::NonceMismatch(
                "nonce was not issued or has expired".to_string(),
            ));
        }
        store.consumed.insert(expected.to_string(), Instant::now());

        match supplied {
            Some(value) if value == expected => Ok(()),
            Some(_) => Err(AppleAuthError::NonceMismatch(
                "identity token nonce differs from the issued nonce".to_string(),
            )),
            None => Err(AppleAuthError::NonceMismatch(
                "identity token carries no nonce".to_string(),
            )),
        }
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_then_verify_succeeds_once() {
        let manager = NonceManager::default();
        let nonce = manager.issue();

        assert!(manager.is_pending(&nonce));
        assert!(manager.verify(Some(&nonce), &nonce).is_ok());
        assert!(!manager.is_pending(&nonce));

        let replay = manager.verify(Some(&nonce), &nonce);
        assert!(matches!(replay, Err(AppleAuthError::NonceReplay)));
    }

    #[test]
    fn test_discard_invalidates_pending_nonce() {
        let manager = NonceManager::default();
        let nonce = manager.issue();

        assert!(manager.discard(&nonce));
        assert!(!manager.is_pending(&nonce));
        assert!(!manager.discard(&nonce));
        assert!(!manager.discard("never-issued"));

        let replay = manager.verify(Some(&nonce), &nonce);
        assert!(matches!(replay, Err(AppleAuthError::NonceReplay)));
    }

    #[test]
    fn test_failed_match_still_consumes() {
        let manager = NonceManager::default();
        let nonce = manager.issue();

        let result = manager.verify(Some("something-else"), &nonce);
        assert!(matches!(result, Err(AppleAuthError::NonceMismatch(_))));
        assert!(!manager.is_pending(&nonce));

        // The correct value cannot be redeemed afterwards
        let retry = manager.verify(Some(&nonce), &nonce);
        assert!(matches!(retry, Err(AppleAuthError::NonceReplay)));
    }

    #[test]
    fn test_missing_claim_is_mismatch() {
        let manager = NonceManager::default();
        let nonce = manager.issue();

        let result = manager.verify(None, &nonce);
        assert!(matches!(result, Err(AppleAuthError::NonceMismatch(_))));
    }

    #[test]
    fn test_unknown_nonce_is_mismatch() {
        let manager = NonceManager::default();
        let result = manager.verify(Some("never-issued"), "never-issued");
        assert!(matches!(result, Err(AppleAuthError::NonceMismatch(_))));
    }

    #[test]
    fn test_recorded_nonce_is_redeemable() {
        let manager = NonceManager::default();
        manager.record("explicit-nonce");

        assert!(manager.verify(Some("explicit-nonce"), "explicit-nonce").is_ok());
    }

    #[test]
    fn test_expired_nonce_is_rejected() {
        let manager = NonceManager::new(Duration::from_millis(20));
        let nonce = manager.issue();

        std::thread::sleep(Duration::from_millis(40));

        assert!(!manager.is_pending(&nonce));
        let result = manager.verify(Some(&nonce), &nonce);
        assert!(matches!(result, Err(AppleAuthError::NonceMismatch(_))));
    }

    #[test]
    fn test_issued_nonces_are_unique() {
        let manager = NonceManager::default();
        let first = manager.issue();
        let second = manager.issue();

        assert_ne!(first, second);
        assert_eq!(first.len(), 43); // 32 bytes base64url without padding
    }
}
