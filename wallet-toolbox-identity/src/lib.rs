//! The authentication/identity manager: multi-factor
//! (presentation-key / password / recovery-key) authentication over a
//! UMP token anchored on-chain, encrypted snapshots, and multi-profile
//! key derivation.

pub mod privileged;
pub mod profile;
pub mod snapshot;
pub mod ump;

pub use privileged::{PasswordRetriever, PrivilegedKeyDeriver, PrivilegedKeyManager, DEFAULT_RETENTION};
pub use profile::{Profile, DEFAULT_PROFILE_ID};
pub use snapshot::{load_snapshot, save_snapshot, SnapshotState};
pub use ump::{AuthenticationFactors, UmpToken};

use wallet_toolbox_common::error::{WalletError, WalletResult};
use wallet_toolbox_common::hash::sha256;

/// Publishes and looks up UMP tokens on-chain. Named after the role the
/// authentication manager calls through to, not a concrete PushDrop
/// implementation, so tests can swap in an in-memory double.
pub trait UmpTokenInteractor: Send + Sync {
    /// Builds the PushDrop output for `token` and broadcasts it, returning
    /// the new `currentOutpoint`.
    fn build_and_send(&self, token: &UmpToken) -> WalletResult<String>;

    /// Looks up an existing token by the SHA-256 of the caller's
    /// presentation key, returning the token and its `currentOutpoint`.
    fn find_by_presentation_key_hash(&self, hash: &[u8; 32]) -> WalletResult<Option<(UmpToken, String)>>;
}

/// Persists a freshly generated recovery key somewhere the user controls
/// (written out-of-band, e.g. to a recovery sheet) before the new-user flow
/// continues.
pub trait RecoveryKeyCallback: Send + Sync {
    fn persist(&self, recovery_key: &[u8; 32]) -> WalletResult<()>;
}

/// Builds the underlying wallet once authentication succeeds, given the
/// recovered primary key, the privileged key manager, and the active
/// profile id (see `wallet_builder(primaryKey, privilegedKeyManager, profileId)`).
pub trait WalletBuilder: Send + Sync {
    type Wallet;

    fn build(
        &self,
        primary_key: [u8; 32],
        privileged_key_manager: PrivilegedKeyManager,
        profile_id: [u8; 16],
    ) -> WalletResult<Self::Wallet>;
}

enum AuthState<W> {
    Unauthenticated,
    Authenticated {
        primary_key: [u8; 32],
        token: UmpToken,
        current_outpoint: String,
        active_profile: Profile,
        wallet: W,
    },
}

/// Drives the new-user and existing-user flows, and owns the resulting
/// authenticated state (primary key, token, active profile, built wallet).
pub struct IdentityManager<W> {
    admin_key: [u8; 32],
    interactor: Box<dyn UmpTokenInteractor>,
    recovery_callback: Box<dyn RecoveryKeyCallback>,
    wallet_builder: Box<dyn WalletBuilder<Wallet = W>>,
    state: AuthState<W>,
}

impl<W> IdentityManager<W> {
    pub fn new(
        admin_key: [u8; 32],
        interactor: Box<dyn UmpTokenInteractor>,
        recovery_callback: Box<dyn RecoveryKeyCallback>,
        wallet_builder: Box<dyn WalletBuilder<Wallet = W>>,
    ) -> Self {
        Self {
            admin_key,
            interactor,
            recovery_callback,
            wallet_builder,
            state: AuthState::Unauthenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated { .. })
    }

    pub fn wallet(&self) -> Option<&W> {
        match &self.state {
            AuthState::Authenticated { wallet, .. } => Some(wallet),
            AuthState::Unauthenticated => None,
        }
    }

    pub fn get_primary_key(&self) -> Option<[u8; 32]> {
        match &self.state {
            AuthState::Authenticated { primary_key, .. } => Some(*primary_key),
            AuthState::Unauthenticated => None,
        }
    }

    pub fn active_profile_id(&self) -> Option<[u8; 16]> {
        match &self.state {
            AuthState::Authenticated { active_profile, .. } => Some(active_profile.id),
            AuthState::Unauthenticated => None,
        }
    }

    /// New-user flow: no existing token for this presentation key.
    /// Generates `recoveryKey`, `passwordSalt`, `primaryKey`, `privilegedKey`,
    /// computes every pivot, publishes the token, and builds the wallet on
    /// the default profile.
    pub fn provide_new_user(
        &mut self,
        presentation_key: [u8; 32],
        password: &[u8],
        password_retriever: Box<dyn PasswordRetriever>,
        privileged_key_deriver: Box<dyn PrivilegedKeyDeriver>,
    ) -> WalletResult<()> {
        let mut recovery_key = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut recovery_key);
        self.recovery_callback.persist(&recovery_key)?;

        let (token, primary_key, _privileged_key) =
            ump::build_new_user_token(&presentation_key, password, &recovery_key, &self.admin_key)?;
        let current_outpoint = self.interactor.build_and_send(&token)?;

        let primary_key_array: [u8; 32] = primary_key
            .try_into()
            .map_err(|_| WalletError::runtime("derived primary key was not 32 bytes"))?;

        self.finish_authentication(
            primary_key_array,
            token,
            current_outpoint,
            Profile::default_profile(),
            password_retriever,
            privileged_key_deriver,
        )
    }

    /// Existing-user flow: look up the token by presentation-key
    /// hash, decrypt the primary key (and, if the factors allow it, the
    /// privileged key) from the appropriate pivot.
    pub fn provide_existing_user(
        &mut self,
        factors: AuthenticationFactors,
        password_retriever: Box<dyn PasswordRetriever>,
        privileged_key_deriver: Box<dyn PrivilegedKeyDeriver>,
    ) -> WalletResult<()> {
        let presentation_key = match &factors {
            AuthenticationFactors::PresentationAndPassword { presentation_key, .. } => *presentation_key,
            AuthenticationFactors::PresentationAndRecovery { presentation_key, .. } => *presentation_key,
            AuthenticationFactors::RecoveryAndPassword { .. } => {
                return Err(WalletError::invalid_parameter(
                    "factors",
                    "recovery+password authentication cannot look up a token by presentation key hash; \
                     use provide_existing_user_by_token instead",
                ));
            }
        };
        let hash = sha256(&presentation_key);
        let (token, current_outpoint) = self
            .interactor
            .find_by_presentation_key_hash(&hash)?
            .ok_or_else(|| WalletError::authentication("no UMP token found for this presentation key"))?;

        self.provide_existing_user_by_token(token, current_outpoint, factors, password_retriever, privileged_key_deriver)
    }

    /// Existing-user flow against an already-retrieved token, e.g. after a
    /// recovery+password lookup performed outside this manager.
    pub fn provide_existing_user_by_token(
        &mut self,
        token: UmpToken,
        current_outpoint: String,
        factors: AuthenticationFactors,
        password_retriever: Box<dyn PasswordRetriever>,
        privileged_key_deriver: Box<dyn PrivilegedKeyDeriver>,
    ) -> WalletResult<()> {
        let (primary_key, _privileged_key) = ump::decrypt_existing_user(&token, &factors)?;
        let primary_key_array: [u8; 32] = primary_key
            .try_into()
            .map_err(|_| WalletError::decryption("recovered primary key was not 32 bytes"))?;

        self.finish_authentication(
            primary_key_array,
            token,
            current_outpoint,
            Profile::default_profile(),
            password_retriever,
            privileged_key_deriver,
        )
    }

    fn finish_authentication(
        &mut self,
        primary_key: [u8; 32],
        token: UmpToken,
        current_outpoint: String,
        active_profile: Profile,
        password_retriever: Box<dyn PasswordRetriever>,
        privileged_key_deriver: Box<dyn PrivilegedKeyDeriver>,
    ) -> WalletResult<()> {
        let privileged_key_manager = PrivilegedKeyManager::new(password_retriever, privileged_key_deriver);
        let wallet = self.wallet_builder.build(primary_key, privileged_key_manager, active_profile.id)?;

        self.state = AuthState::Authenticated {
            primary_key,
            token,
            current_outpoint,
            active_profile,
            wallet,
        };
        Ok(())
    }

    /// `save_snapshot`: requires an authenticated manager with a
    /// `currentOutpoint` on its current token.
    pub fn save_snapshot(&self) -> WalletResult<Vec<u8>> {
        match &self.state {
            AuthState::Authenticated {
                primary_key,
                token,
                current_outpoint,
                active_profile,
                ..
            } => {
                if current_outpoint.is_empty() {
                    return Err(WalletError::runtime("current token has no currentOutpoint to snapshot"));
                }
                snapshot::save_snapshot(&SnapshotState {
                    root_primary_key: *primary_key,
                    active_profile_id: active_profile.id,
                    token: token.clone(),
                })
            }
            AuthState::Unauthenticated => Err(WalletError::authentication("cannot save a snapshot before authenticating")),
        }
    }

    /// `change_password`: re-derives `passwordKey` under a fresh salt and
    /// republishes the token with the password∧presentation,
    /// password∧recovery, and password∧primary pivots (plus the
    /// admin-wrapped audit copy) rewritten under it. The presentation and
    /// recovery keys must be supplied again since neither is retained once
    /// authentication completes.
    pub fn change_password(
        &mut self,
        old_password: &[u8],
        new_password: &[u8],
        presentation_key: &[u8; 32],
        recovery_key: &[u8; 32],
    ) -> WalletResult<()> {
        match &mut self.state {
            AuthState::Authenticated {
                primary_key,
                token,
                current_outpoint,
                ..
            } => {
                let privileged_key = ump::decrypt_privileged_with_password(token, old_password, &primary_key[..])?;
                let new_token = ump::rewrite_password_pivots(
                    token,
                    presentation_key,
                    recovery_key,
                    &primary_key[..],
                    &privileged_key,
                    new_password,
                    &self.admin_key,
                )?;
                let new_outpoint = self.interactor.build_and_send(&new_token)?;
                *token = new_token;
                *current_outpoint = new_outpoint;
                Ok(())
            }
            AuthState::Unauthenticated => Err(WalletError::authentication("cannot change password before authenticating")),
        }
    }

    /// `switch_profile`: rebuilds the wallet on `profile`'s XOR-scoped
    /// primary key, replacing the active wallet in place. The root primary
    /// key in `AuthState` always stays unscoped so repeated switches never
    /// compound the XOR.
    pub fn switch_profile(
        &mut self,
        profile: Profile,
        password_retriever: Box<dyn PasswordRetriever>,
        privileged_key_deriver: Box<dyn PrivilegedKeyDeriver>,
    ) -> WalletResult<()> {
        match std::mem::replace(&mut self.state, AuthState::Unauthenticated) {
            AuthState::Authenticated {
                primary_key,
                token,
                current_outpoint,
                ..
            } => {
                let scoped_primary_key = profile::scoped_primary_key(&primary_key, &profile);
                let privileged_key_manager = PrivilegedKeyManager::new(password_retriever, privileged_key_deriver);
                let wallet = self.wallet_builder.build(scoped_primary_key, privileged_key_manager, profile.id)?;
                self.state = AuthState::Authenticated {
                    primary_key,
                    token,
                    current_outpoint,
                    active_profile: profile,
                    wallet,
                };
                Ok(())
            }
            AuthState::Unauthenticated => Err(WalletError::authentication("cannot switch profile before authenticating")),
        }
    }

    /// `load_snapshot`: decrypts a previously saved snapshot and builds the
    /// wallet directly, skipping the UMP interactor round trip. On failure
    /// the manager stays (or is left) unauthenticated.
    pub fn load_snapshot(
        &mut self,
        bytes: &[u8],
        current_outpoint: String,
        password_retriever: Box<dyn PasswordRetriever>,
        privileged_key_deriver: Box<dyn PrivilegedKeyDeriver>,
    ) -> WalletResult<()> {
        self.state = AuthState::Unauthenticated;
        let loaded = snapshot::load_snapshot(bytes)?;
        let mut active_profile = Profile::default_profile();
        active_profile.id = loaded.active_profile_id;

        self.finish_authentication(
            loaded.root_primary_key,
            loaded.token,
            current_outpoint,
            active_profile,
            password_retriever,
            privileged_key_deriver,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingInteractor {
        published: Mutex<Vec<UmpToken>>,
    }
    impl RecordingInteractor {
        fn new() -> Self {
            Self { published: Mutex::new(Vec::new()) }
        }
    }
    impl UmpTokenInteractor for RecordingInteractor {
        fn build_and_send(&self, token: &UmpToken) -> WalletResult<String> {
            let mut published = self.published.lock().unwrap();
            published.push(token.clone());
            Ok(format!("outpoint-{}", published.len()))
        }
        fn find_by_presentation_key_hash(&self, _hash: &[u8; 32]) -> WalletResult<Option<(UmpToken, String)>> {
            Ok(None)
        }
    }

    struct NoopRecovery;
    impl RecoveryKeyCallback for NoopRecovery {
        fn persist(&self, _recovery_key: &[u8; 32]) -> WalletResult<()> {
            Ok(())
        }
    }

    struct FixedPassword(Vec<u8>);
    impl PasswordRetriever for FixedPassword {
        fn retrieve(&self) -> WalletResult<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    /// A deriver that ignores the password and always hands back whatever
    /// privileged key the test wired up, mirroring how a real deriver would
    /// close over the UMP token and root primary key.
    struct FixedDeriver([u8; 32]);
    impl PrivilegedKeyDeriver for FixedDeriver {
        fn derive(&self, _password: &[u8]) -> WalletResult<[u8; 32]> {
            Ok(self.0)
        }
    }

    /// Records every `(primary_key, profile_id)` pair it was built with so
    /// tests can assert a profile switch rebuilt the wallet with the right
    /// scoped key.
    struct RecordingWallet {
        primary_key: [u8; 32],
        profile_id: [u8; 16],
    }

    struct RecordingWalletBuilder;
    impl WalletBuilder for RecordingWalletBuilder {
        type Wallet = RecordingWallet;

        fn build(
            &self,
            primary_key: [u8; 32],
            _privileged_key_manager: PrivilegedKeyManager,
            profile_id: [u8; 16],
        ) -> WalletResult<Self::Wallet> {
            Ok(RecordingWallet { primary_key, profile_id })
        }
    }

    fn new_manager() -> IdentityManager<RecordingWallet> {
        IdentityManager::new(
            [0x99u8; 32],
            Box::new(RecordingInteractor::new()),
            Box::new(NoopRecovery),
            Box::new(RecordingWalletBuilder),
        )
    }

    #[test]
    fn change_password_republishes_token_and_updates_outpoint() {
        let presentation_key = [0x11u8; 32];
        let recovery_key = [0x22u8; 32];
        let mut manager = new_manager();
        manager
            .provide_new_user(
                presentation_key,
                b"old-password",
                Box::new(FixedPassword(b"old-password".to_vec())),
                Box::new(FixedDeriver([0x42u8; 32])),
            )
            .unwrap();

        let token_before = match &manager.state {
            AuthState::Authenticated { token, .. } => token.clone(),
            AuthState::Unauthenticated => panic!("expected authenticated state"),
        };
        let outpoint_before = match &manager.state {
            AuthState::Authenticated { current_outpoint, .. } => current_outpoint.clone(),
            AuthState::Unauthenticated => panic!("expected authenticated state"),
        };

        manager
            .change_password(b"old-password", b"new-password", &presentation_key, &recovery_key)
            .unwrap();

        match &manager.state {
            AuthState::Authenticated { token, current_outpoint, .. } => {
                assert_ne!(token.password_salt, token_before.password_salt);
                assert_ne!(token.password_primary_privileged, token_before.password_primary_privileged);
                assert_ne!(*current_outpoint, outpoint_before);
                // Factors untouched by the password change carry over unchanged.
                assert_eq!(token.presentation_recovery_primary, token_before.presentation_recovery_primary);
            }
            AuthState::Unauthenticated => panic!("expected authenticated state"),
        }
    }

    #[test]
    fn change_password_before_authenticating_is_rejected() {
        let mut manager = new_manager();
        let err = manager
            .change_password(b"old", b"new", &[0x11u8; 32], &[0x22u8; 32])
            .unwrap_err();
        assert!(matches!(err, WalletError::Authentication { .. }));
    }

    #[test]
    fn switch_profile_rebuilds_wallet_with_scoped_key_and_keeps_root_key_unscoped() {
        let mut manager = new_manager();
        manager
            .provide_new_user(
                [0x11u8; 32],
                b"hunter2",
                Box::new(FixedPassword(b"hunter2".to_vec())),
                Box::new(FixedDeriver([0x42u8; 32])),
            )
            .unwrap();
        let root_primary_key = manager.get_primary_key().unwrap();

        let mut savings = Profile::default_profile();
        savings.id = [7u8; 16];
        savings.primary_pad = [0xAAu8; 32];

        manager
            .switch_profile(
                savings.clone(),
                Box::new(FixedPassword(b"hunter2".to_vec())),
                Box::new(FixedDeriver([0x42u8; 32])),
            )
            .unwrap();

        assert_eq!(manager.active_profile_id().unwrap(), savings.id);
        assert_eq!(manager.get_primary_key().unwrap(), root_primary_key);
        let wallet = manager.wallet().unwrap();
        assert_eq!(wallet.profile_id, savings.id);
        assert_eq!(wallet.primary_key, profile::scoped_primary_key(&root_primary_key, &savings));
        assert_ne!(wallet.primary_key, root_primary_key);
    }

    #[test]
    fn switch_profile_before_authenticating_is_rejected() {
        let mut manager = new_manager();
        let err = manager
            .switch_profile(Profile::default_profile(), Box::new(FixedPassword(b"x".to_vec())), Box::new(FixedDeriver([0u8; 32])))
            .unwrap_err();
        assert!(matches!(err, WalletError::Authentication { .. }));
    }
}
