//! The Permissions Manager: four independent permission-token
//! caches (DPACP/DBAP/DCAP/DSAP), the permission-event request/grant/deny
//! flow, and metadata encryption under the fixed admin protocol. The
//! wallet-proxy forwarding itself (wrapping the full BRC-100 surface) is
//! the façade's job; this crate is the policy decision engine it calls
//! through.

pub mod metadata;
pub mod requests;
pub mod token;

pub use metadata::{admin_originator_label, decrypt_metadata, encrypt_metadata};
pub use requests::{PermissionCallback, PermissionRequest, RequestRegistry};
pub use token::{PermissionCategory, PermissionToken, TokenCache};

use chrono::{DateTime, Utc};

/// Outcome of consulting the Permissions Manager for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    /// A matching, unexpired token was already cached.
    Granted,
    /// No cached token; a request was placed in the pending map (and
    /// dispatched to any bound callback) under this id.
    Pending(u64),
}

/// Owns the four category caches and the shared request registry.
pub struct PermissionsManager {
    protocol_cache: TokenCache,
    basket_cache: TokenCache,
    certificate_cache: TokenCache,
    spending_cache: TokenCache,
    requests: RequestRegistry,
}

impl Default for PermissionsManager {
    fn default() -> Self {
        Self {
            protocol_cache: TokenCache::new(PermissionCategory::Protocol),
            basket_cache: TokenCache::new(PermissionCategory::Basket),
            certificate_cache: TokenCache::new(PermissionCategory::Certificate),
            spending_cache: TokenCache::new(PermissionCategory::Spending),
            requests: RequestRegistry::new(),
        }
    }
}

impl PermissionsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> &RequestRegistry {
        &self.requests
    }

    fn cache_mut(&mut self, category: PermissionCategory) -> &mut TokenCache {
        match category {
            PermissionCategory::Protocol => &mut self.protocol_cache,
            PermissionCategory::Basket => &mut self.basket_cache,
            PermissionCategory::Certificate => &mut self.certificate_cache,
            PermissionCategory::Spending => &mut self.spending_cache,
        }
    }

    /// Consults the category cache; on a miss, places a pending request and
    /// dispatches it to any bound callback.
    pub fn check(
        &mut self,
        now: DateTime<Utc>,
        category: PermissionCategory,
        originator: &str,
        resource_key: &str,
        satoshis_requested: Option<i64>,
        reference: Option<String>,
    ) -> PermissionDecision {
        if self.cache_mut(category).check(now, originator, resource_key) {
            return PermissionDecision::Granted;
        }
        let request = self
            .requests
            .begin(category, originator, resource_key, satoshis_requested, reference);
        PermissionDecision::Pending(request.request_id)
    }

    /// `grant_permission`: resolves a pending request by inserting a token
    /// into its category's cache.
    pub fn grant_permission(
        &mut self,
        now: DateTime<Utc>,
        request_id: u64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Option<PermissionRequest> {
        let request = self.requests.take_pending(request_id)?;
        self.cache_mut(request.category).grant(
            now,
            &request.originator,
            &request.resource_key,
            expires_at,
            request.satoshis_requested,
        );
        Some(request)
    }

    /// `deny_permission`: resolves a pending request without granting a
    /// token. The caller is responsible for aborting any reserved
    /// `create_action` reference the returned request carries.
    pub fn deny_permission(&mut self, request_id: u64) -> Option<PermissionRequest> {
        self.requests.take_pending(request_id)
    }

    /// `track_spending`: decrements a DSAP token's remaining amount.
    pub fn track_spending(&mut self, now: DateTime<Utc>, originator: &str, resource_key: &str, satoshis: i64) -> bool {
        self.spending_cache.track_spending(now, originator, resource_key, satoshis)
    }
}
