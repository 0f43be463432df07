//! The privileged key manager: wraps the privileged key with
//! a retention window, transparently re-deriving it via a password
//! retriever once the window expires.

use std::time::{Duration, Instant};

use wallet_toolbox_common::error::{WalletError, WalletResult};
use zeroize::Zeroizing;

/// Default retention window: 2 minutes.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(120);

/// Re-acquires the password when the retention window has lapsed. Typically
/// prompts the user; in tests, a closure over a known password.
pub trait PasswordRetriever: Send + Sync {
    fn retrieve(&self) -> WalletResult<Vec<u8>>;
}

/// Re-derives the privileged key from `(password, primary_key)` once the
/// password is back in hand. Implemented by the identity manager's UMP
/// unwrap step; kept as a trait here so this module has no dependency on
/// [`crate::ump`]'s token shape.
pub trait PrivilegedKeyDeriver: Send + Sync {
    fn derive(&self, password: &[u8]) -> WalletResult<[u8; 32]>;
}

struct Retained {
    key: Zeroizing<[u8; 32]>,
    acquired_at: Instant,
}

/// Holds the privileged key behind a retention window. Every accessor takes
/// `now` explicitly so tests can drive the clock without sleeping.
pub struct PrivilegedKeyManager {
    retention: Duration,
    retained: Option<Retained>,
    retriever: Box<dyn PasswordRetriever>,
    deriver: Box<dyn PrivilegedKeyDeriver>,
}

impl PrivilegedKeyManager {
    pub fn new(retriever: Box<dyn PasswordRetriever>, deriver: Box<dyn PrivilegedKeyDeriver>) -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            retained: None,
            retriever,
            deriver,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.retained
            .as_ref()
            .is_some_and(|r| now.duration_since(r.acquired_at) < self.retention)
    }

    /// Returns the privileged key, re-requesting the password and
    /// re-deriving if the retention window has expired, and resets the
    /// timer on every successful access (fresh or re-derived).
    pub fn get_key(&mut self, now: Instant) -> WalletResult<[u8; 32]> {
        if !self.is_fresh(now) {
            let password = self.retriever.retrieve()?;
            let key = self.deriver.derive(&password)?;
            self.retained = Some(Retained {
                key: Zeroizing::new(key),
                acquired_at: now,
            });
        } else if let Some(retained) = &mut self.retained {
            retained.acquired_at = now;
        }
        Ok(*self
            .retained
            .as_ref()
            .expect("retained is populated by the branch above")
            .key)
    }

    /// `destroy_key`: explicitly purges the retained key ahead of its
    /// natural expiry.
    pub fn destroy_key(&mut self) {
        self.retained = None;
    }
}
