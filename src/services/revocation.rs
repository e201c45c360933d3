//! In-memory deny-list for attendance session codes
//!
//! Codes are stateless, so the only way to kill one before it expires is to
//! remember its token until it would have expired anyway. Entries are kept
//! for exactly one validity window; after that the expiry check rejects the
//! code on its own.
//!
//! The list is bounded. Once it holds `max_capacity` tokens the cache starts
//! evicting, and an evicted token verifies again until it expires. A warning
//! is logged whenever a revocation lands in a full list.

use moka::sync::Cache;
use std::time::Duration;

/// Default maximum number of revoked tokens held at once
const DEFAULT_MAX_CAPACITY: u64 = 100_000;

/// Bounded set of revoked tokens
pub struct RevocationList {
    revoked: Cache<String, ()>,
    retention: Duration,
    max_capacity: u64,
}

impl std::fmt::Debug for RevocationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationList")
            .field("entry_count", &self.revoked.entry_count())
            .field("retention", &self.retention)
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

impl RevocationList {
    /// Create a deny-list retaining entries for `retention`
    pub fn new(retention: Duration) -> Self {
        Self::with_capacity(retention, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacity(retention: Duration, max_capacity: u64) -> Self {
        let revoked = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(retention)
            .build();

        Self {
            revoked,
            retention,
            max_capacity,
        }
    }

    pub fn revoke(&self, token: &str) {
        self.revoked.insert(token.to_string(), ());

        if self.is_full() {
            tracing::warn!(
                max_capacity = self.max_capacity,
                "Revocation list is full, older revocations may be evicted"
            );
        }
    }

    /// Whether the list has reached its capacity
    pub fn is_full(&self) -> bool {
        self.revoked.run_pending_tasks();
        self.revoked.entry_count() >= self.max_capacity
    }

    pub fn max_capacity(&self) -> u64 {
        self.max_capacity
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.contains_key(token)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_and_check() {
        let list = RevocationList::new(Duration::from_secs(900));
        assert!(!list.is_revoked("abc"));

        list.revoke("abc");
        assert!(list.is_revoked("abc"));
        assert!(!list.is_revoked("abd"));
    }

    #[test]
    fn test_reports_when_full() {
        let list = RevocationList::with_capacity(Duration::from_secs(900), 2);
        assert_eq!(list.max_capacity(), 2);

        list.revoke("a");
        assert!(!list.is_full());

        list.revoke("b");
        assert!(list.is_full());
        assert!(list.is_revoked("a"));
        assert!(list.is_revoked("b"));
    }

    #[test]
    fn test_entries_expire_after_retention() {
        let list = RevocationList::new(Duration::from_millis(50));
        list.revoke("abc");
        assert!(list.is_revoked("abc"));

        std::thread::sleep(Duration::from_millis(120));
        assert!(!list.is_revoked("abc"));
    }
}
