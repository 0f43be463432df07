//! Permission token caches: DPACP / DBAP / DCAP / DSAP.

use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

/// The four permission categories. The variant name is the cache
/// key's discriminant; it does not appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionCategory {
    /// DPACP — protocol usage.
    Protocol,
    /// DBAP — basket access.
    Basket,
    /// DCAP — certificate access.
    Certificate,
    /// DSAP — spending authorization.
    Spending,
}

impl PermissionCategory {
    /// Default grant lifetime: one year for DPACP/DBAP/DCAP, 30 days for
    /// DSAP.
    pub fn default_expiry(&self) -> Duration {
        match self {
            Self::Spending => Duration::days(30),
            _ => Duration::days(365),
        }
    }
}

/// A granted permission, keyed in-memory by `(originator, resource-key)`.
#[derive(Debug, Clone)]
pub struct PermissionToken {
    pub originator: String,
    pub resource_key: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// For DSAP only: the remaining satoshis this token may authorize.
    pub authorized_amount: Option<i64>,
}

impl PermissionToken {
    pub fn is_valid_for(&self, now: DateTime<Utc>, originator: &str, resource_key: &str) -> bool {
        self.originator == originator && self.resource_key == resource_key && now < self.expires_at
    }
}

const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// An LRU-bounded cache of granted tokens for one permission category.
/// Verification is always by expiry + resource-match, never by cache
/// presence alone (an expired entry still in the LRU is treated as absent).
pub struct TokenCache {
    category: PermissionCategory,
    entries: LruCache<(String, String), PermissionToken>,
}

impl TokenCache {
    pub fn new(category: PermissionCategory) -> Self {
        Self {
            category,
            entries: LruCache::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap()),
        }
    }

    pub fn category(&self) -> PermissionCategory {
        self.category
    }

    fn key(originator: &str, resource_key: &str) -> (String, String) {
        (originator.to_string(), resource_key.to_string())
    }

    /// `grant_permission`: inserts a token, expiring `expires_at.unwrap_or`
    /// the category default measured from `now`.
    pub fn grant(
        &mut self,
        now: DateTime<Utc>,
        originator: &str,
        resource_key: &str,
        expires_at: Option<DateTime<Utc>>,
        authorized_amount: Option<i64>,
    ) {
        let expires_at = expires_at.unwrap_or(now + self.category.default_expiry());
        self.entries.put(
            Self::key(originator, resource_key),
            PermissionToken {
                originator: originator.to_string(),
                resource_key: resource_key.to_string(),
                granted_at: now,
                expires_at,
                authorized_amount,
            },
        );
    }

    pub fn revoke(&mut self, originator: &str, resource_key: &str) {
        self.entries.pop(&Self::key(originator, resource_key));
    }

    /// Cache lookup, validated against `now` (expiry) and the requested
    /// `(originator, resource_key)` (resource-match). A stale or
    /// non-matching hit is treated as a miss without being evicted here —
    /// [`grant`]/eviction under LRU pressure owns removal.
    pub fn check(&mut self, now: DateTime<Utc>, originator: &str, resource_key: &str) -> bool {
        self.entries
            .get(&Self::key(originator, resource_key))
            .is_some_and(|t| t.is_valid_for(now, originator, resource_key))
    }

    /// `track_spending`: decrements a DSAP token's remaining authorized
    /// amount. Returns `false` (and leaves the token untouched) if the
    /// remaining amount is insufficient.
    pub fn track_spending(&mut self, now: DateTime<Utc>, originator: &str, resource_key: &str, satoshis: i64) -> bool {
        let key = Self::key(originator, resource_key);
        let Some(token) = self.entries.get_mut(&key) else {
            return false;
        };
        if now >= token.expires_at {
            return false;
        }
        match token.authorized_amount {
            Some(remaining) if remaining >= satoshis => {
                token.authorized_amount = Some(remaining - satoshis);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_expiries_match_spec() {
        assert_eq!(PermissionCategory::Protocol.default_expiry(), Duration::days(365));
        assert_eq!(PermissionCategory::Basket.default_expiry(), Duration::days(365));
        assert_eq!(PermissionCategory::Certificate.default_expiry(), Duration::days(365));
        assert_eq!(PermissionCategory::Spending.default_expiry(), Duration::days(30));
    }

    #[test]
    fn grant_then_check_succeeds_until_expiry() {
        let mut cache = TokenCache::new(PermissionCategory::Protocol);
        let now = Utc::now();
        cache.grant(now, "app.example", "payments", None, None);
        assert!(cache.check(now, "app.example", "payments"));
        assert!(!cache.check(now, "app.example", "other-resource"));
        let way_later = now + Duration::days(366);
        assert!(!cache.check(way_later, "app.example", "payments"));
    }

    #[test]
    fn track_spending_decrements_and_rejects_overdraft() {
        let mut cache = TokenCache::new(PermissionCategory::Spending);
        let now = Utc::now();
        cache.grant(now, "app.example", "default", None, Some(1000));
        assert!(cache.track_spending(now, "app.example", "default", 400));
        assert!(!cache.track_spending(now, "app.example", "default", 700));
        assert!(cache.track_spending(now, "app.example", "default", 600));
    }
}
