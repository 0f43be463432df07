//! Permission event flow: monotonic `requestID`s, a pending
//! map, dispatch to a bound callback per category, and resolution via
//! `grant_permission` / `deny_permission`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::token::PermissionCategory;

/// One outstanding permission request awaiting a human (or policy) decision.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub request_id: u64,
    pub category: PermissionCategory,
    pub originator: String,
    pub resource_key: String,
    /// For DSAP requests: the satoshi amount the action needs authorized.
    pub satoshis_requested: Option<i64>,
    /// For `create_action` paths with a reference already reserved in
    /// Storage; a denial must abort it.
    pub reference: Option<String>,
}

pub type PermissionCallback = Box<dyn Fn(&PermissionRequest) + Send + Sync>;

/// Holds the monotonic request-id counter, the pending-request map, and one
/// optional dispatch callback per category.
pub struct RequestRegistry {
    next_id: Mutex<u64>,
    pending: Mutex<HashMap<u64, PermissionRequest>>,
    callbacks: Mutex<HashMap<u8, PermissionCallback>>,
}

fn category_key(category: PermissionCategory) -> u8 {
    match category {
        PermissionCategory::Protocol => 0,
        PermissionCategory::Basket => 1,
        PermissionCategory::Certificate => 2,
        PermissionCategory::Spending => 3,
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self {
            next_id: Mutex::new(1),
            pending: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
        }
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_callback(&self, category: PermissionCategory, callback: PermissionCallback) {
        self.callbacks.lock().unwrap().insert(category_key(category), callback);
    }

    /// Allocates a `requestID`, places the request in the pending map, and
    /// dispatches it to any bound callback for the category. The callback
    /// is expected to eventually call [`RequestRegistry::take_pending`]'s
    /// counterpart on the owning [`crate::PermissionsManager`]
    /// (`grant_permission` / `deny_permission`) with this id.
    pub fn begin(
        &self,
        category: PermissionCategory,
        originator: &str,
        resource_key: &str,
        satoshis_requested: Option<i64>,
        reference: Option<String>,
    ) -> PermissionRequest {
        let request_id = {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let request = PermissionRequest {
            request_id,
            category,
            originator: originator.to_string(),
            resource_key: resource_key.to_string(),
            satoshis_requested,
            reference,
        };
        self.pending.lock().unwrap().insert(request_id, request.clone());
        if let Some(callback) = self.callbacks.lock().unwrap().get(&category_key(category)) {
            callback(&request);
        }
        request
    }

    /// Removes and returns the pending request for `request_id`, if any.
    /// Used by both `grant_permission` and `deny_permission` to resolve it.
    pub fn take_pending(&self, request_id: u64) -> Option<PermissionRequest> {
        self.pending.lock().unwrap().remove(&request_id)
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
