//! The façade's per-wallet, per-process state: the BEEF
//! accumulator ("BeefParty") and the pending-sign-action TTL cache keyed by
//! `reference`. Both are in-memory, non-suspending, and serialized by a
//! `Mutex` rather than the request-level locking storage mutations go
//! through: BEEF accumulator merges and pending-sign-action map updates
//! are non-suspending.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use wallet_toolbox_common::beef::Beef;

use crate::args::CreateActionArgs;

/// Tracks every transaction this wallet has seen, so later calls can elide
/// BEEF fragments the client already knows via `knownTxids`.
pub struct BeefParty {
    beef: Mutex<Beef>,
}

impl Default for BeefParty {
    fn default() -> Self {
        Self { beef: Mutex::new(Beef::new()) }
    }
}

impl BeefParty {
    pub fn merge(&self, other: &Beef) {
        self.beef.lock().unwrap().merge(other);
    }

    pub fn snapshot(&self) -> Beef {
        self.beef.lock().unwrap().clone()
    }
}

struct PendingEntry {
    args: CreateActionArgs,
    transaction_id: i64,
    inserted_at: Instant,
}

/// The TTL entry `create_action` leaves for the matching `sign_action`.
pub struct PendingSignActions {
    ttl: Duration,
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingSignActions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, reference: String, args: CreateActionArgs, transaction_id: i64) {
        self.entries.lock().unwrap().insert(
            reference,
            PendingEntry {
                args,
                transaction_id,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Removes and returns the pending action for `reference`, provided it
    /// has not exceeded the TTL. A caller invoking `sign_action` without a
    /// preceding `create_action` (or past the TTL) sees `None`, which the
    /// façade turns into an `InvalidParameter` error.
    pub fn take(&self, reference: &str) -> Option<(CreateActionArgs, i64)> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.remove(reference)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some((entry.args, entry.transaction_id))
    }

    /// Drops every entry past its TTL. Called opportunistically rather than
    /// on a timer; the façade has no background task of its own distinct
    /// from the Monitor.
    pub fn evict_expired(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
    }
}
