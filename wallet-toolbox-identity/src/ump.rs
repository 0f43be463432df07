//! The UMP (Unique Management Protocol) token: a
//! multi-factor on-chain authentication record built from pairwise XORs of
//! {presentationKey, recoveryKey, passwordKey}.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;
use wallet_toolbox_common::error::{WalletError, WalletResult};
use wallet_toolbox_common::hash::sha256;
use wallet_toolbox_common::xor::xor;

pub const PBKDF2_ROUNDS: u32 = 100_000;

/// `passwordKey = PBKDF2-HMAC-SHA-512(password, passwordSalt, 100_000, 32)`.
pub fn derive_password_key(password: &[u8], password_salt: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha512>(password, password_salt, PBKDF2_ROUNDS, &mut out);
    out
}

/// AES-256-GCM-encrypts `plaintext` under `key`, prefixing a random 12-byte
/// nonce (the same framing [`wallet_toolbox_crypto::Secp256k1KeyDeriver`]
/// uses for its own symmetric operations).
fn seal(key: &[u8; 32], plaintext: &[u8]) -> WalletResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| WalletError::runtime(format!("bad pivot key: {e}")))?;
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| WalletError::runtime(format!("pivot encryption failed: {e}")))?;
    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn unseal(key: &[u8; 32], sealed: &[u8]) -> WalletResult<Vec<u8>> {
    if sealed.len() < 12 {
        return Err(WalletError::decryption("sealed pivot shorter than nonce"));
    }
    let (nonce_bytes, body) = sealed.split_at(12);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| WalletError::runtime(format!("bad pivot key: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), body)
        .map_err(|_| WalletError::decryption("pivot AEAD authentication failed"))
}

/// The on-chain UMP record (PushDrop field order; `currentOutpoint` is
/// tracked separately, where the token is anchored, not inside the record).
#[derive(Debug, Clone)]
pub struct UmpToken {
    pub password_salt: [u8; 32],
    pub password_presentation_primary: Vec<u8>,
    pub password_recovery_primary: Vec<u8>,
    pub presentation_recovery_primary: Vec<u8>,
    pub password_primary_privileged: Vec<u8>,
    pub presentation_recovery_privileged: Vec<u8>,
    pub presentation_hash: [u8; 32],
    pub recovery_hash: [u8; 32],
    pub presentation_key_encrypted: Vec<u8>,
    pub password_key_encrypted: Vec<u8>,
    pub recovery_key_encrypted: Vec<u8>,
    pub profiles_encrypted: Option<Vec<u8>>,
}

/// Builds a fresh UMP token for the new-user flow: generates
/// `passwordSalt`, `primaryKey`, and `privilegedKey`, and computes every
/// pivot from the three supplied raw authentication factors. `admin_key`
/// wraps the three raw factors for the audit/recovery copies.
pub fn build_new_user_token(
    presentation_key: &[u8; 32],
    password: &[u8],
    recovery_key: &[u8; 32],
    admin_key: &[u8; 32],
) -> WalletResult<(UmpToken, [u8; 32], [u8; 32])> {
    let mut password_salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut password_salt);
    let password_key = derive_password_key(password, &password_salt);

    let mut primary_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut primary_key);
    let mut privileged_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut privileged_key);

    let password_presentation_pivot = pivot_key(&password_key, presentation_key);
    let password_recovery_pivot = pivot_key(&password_key, recovery_key);
    let presentation_recovery_pivot = pivot_key(presentation_key, recovery_key);
    let password_primary_pivot = pivot_key(&password_key, &primary_key);

    let token = UmpToken {
        password_salt,
        password_presentation_primary: seal(&password_presentation_pivot, &primary_key)?,
        password_recovery_primary: seal(&password_recovery_pivot, &primary_key)?,
        presentation_recovery_primary: seal(&presentation_recovery_pivot, &primary_key)?,
        password_primary_privileged: seal(&password_primary_pivot, &privileged_key)?,
        presentation_recovery_privileged: seal(&presentation_recovery_pivot, &privileged_key)?,
        presentation_hash: sha256(presentation_key),
        recovery_hash: sha256(recovery_key),
        presentation_key_encrypted: seal(admin_key, presentation_key)?,
        password_key_encrypted: seal(admin_key, &password_key)?,
        recovery_key_encrypted: seal(admin_key, recovery_key)?,
        profiles_encrypted: None,
    };

    Ok((token, primary_key, privileged_key))
}

fn pivot_key(a: &[u8], b: &[u8]) -> [u8; 32] {
    let xored = xor(a, b);
    let mut out = [0u8; 32];
    out.copy_from_slice(&xored);
    out
}

/// The three supported authentication modes.
#[derive(Debug, Clone)]
pub enum AuthenticationFactors {
    PresentationAndPassword {
        presentation_key: [u8; 32],
        password: Vec<u8>,
    },
    PresentationAndRecovery {
        presentation_key: [u8; 32],
        recovery_key: [u8; 32],
    },
    RecoveryAndPassword {
        recovery_key: [u8; 32],
        password: Vec<u8>,
    },
}

/// Existing-user flow: decrypts the primary key (and, where the
/// factors allow it, the privileged key) from the token's pivots.
pub fn decrypt_existing_user(
    token: &UmpToken,
    factors: &AuthenticationFactors,
) -> WalletResult<(Vec<u8>, Option<Vec<u8>>)> {
    match factors {
        AuthenticationFactors::PresentationAndPassword {
            presentation_key,
            password,
        } => {
            let password_key = derive_password_key(password, &token.password_salt);
            let pivot = pivot_key(&password_key, presentation_key);
            let primary = unseal(&pivot, &token.password_presentation_primary)?;
            Ok((primary, None))
        }
        AuthenticationFactors::PresentationAndRecovery {
            presentation_key,
            recovery_key,
        } => {
            let pivot = pivot_key(presentation_key, recovery_key);
            let primary = unseal(&pivot, &token.presentation_recovery_primary)?;
            let privileged = unseal(&pivot, &token.presentation_recovery_privileged)?;
            Ok((primary, Some(privileged)))
        }
        AuthenticationFactors::RecoveryAndPassword { recovery_key, password } => {
            let password_key = derive_password_key(password, &token.password_salt);
            let pivot = pivot_key(&password_key, recovery_key);
            let primary = unseal(&pivot, &token.password_recovery_primary)?;
            Ok((primary, None))
        }
    }
}

/// Decrypts the privileged key once the primary key and the password are
/// both known (the password∧primary pivot).
pub fn decrypt_privileged_with_password(token: &UmpToken, password: &[u8], primary_key: &[u8]) -> WalletResult<Vec<u8>> {
    let password_key = derive_password_key(password, &token.password_salt);
    let pivot = pivot_key(&password_key, primary_key);
    unseal(&pivot, &token.password_primary_privileged)
}

/// Rewrites every `password*` pivot for a password change: draws a fresh
/// `passwordSalt`, re-derives `passwordKey` from `new_password`, and reseals
/// the password∧presentation, password∧recovery, and password∧primary
/// pivots plus the admin-wrapped audit copy. The presentation/recovery
/// pivots and hashes carry over unchanged since neither factor changed.
pub fn rewrite_password_pivots(
    token: &UmpToken,
    presentation_key: &[u8; 32],
    recovery_key: &[u8; 32],
    primary_key: &[u8],
    privileged_key: &[u8],
    new_password: &[u8],
    admin_key: &[u8; 32],
) -> WalletResult<UmpToken> {
    let mut password_salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut password_salt);
    let password_key = derive_password_key(new_password, &password_salt);

    let password_presentation_pivot = pivot_key(&password_key, presentation_key);
    let password_recovery_pivot = pivot_key(&password_key, recovery_key);
    let password_primary_pivot = pivot_key(&password_key, primary_key);

    Ok(UmpToken {
        password_salt,
        password_presentation_primary: seal(&password_presentation_pivot, primary_key)?,
        password_recovery_primary: seal(&password_recovery_pivot, primary_key)?,
        password_primary_privileged: seal(&password_primary_pivot, privileged_key)?,
        password_key_encrypted: seal(admin_key, &password_key)?,
        presentation_recovery_primary: token.presentation_recovery_primary.clone(),
        presentation_recovery_privileged: token.presentation_recovery_privileged.clone(),
        presentation_hash: token.presentation_hash,
        recovery_hash: token.recovery_hash,
        presentation_key_encrypted: token.presentation_key_encrypted.clone(),
        recovery_key_encrypted: token.recovery_key_encrypted.clone(),
        profiles_encrypted: token.profiles_encrypted.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_then_presentation_password_roundtrips() {
        let presentation_key = [0x11u8; 32];
        let recovery_key = [0x22u8; 32];
        let admin_key = [0x33u8; 32];
        let password = b"hunter2".to_vec();

        let (token, primary_key, _privileged_key) =
            build_new_user_token(&presentation_key, &password, &recovery_key, &admin_key).unwrap();

        let (recovered_primary, privileged) = decrypt_existing_user(
            &token,
            &AuthenticationFactors::PresentationAndPassword {
                presentation_key,
                password: password.clone(),
            },
        )
        .unwrap();
        assert_eq!(recovered_primary, primary_key);
        assert!(privileged.is_none());
    }

    #[test]
    fn new_user_then_presentation_recovery_reveals_both_keys() {
        let presentation_key = [0x44u8; 32];
        let recovery_key = [0x55u8; 32];
        let admin_key = [0x66u8; 32];
        let password = b"swordfish".to_vec();

        let (token, primary_key, privileged_key) =
            build_new_user_token(&presentation_key, &password, &recovery_key, &admin_key).unwrap();

        let (recovered_primary, recovered_privileged) = decrypt_existing_user(
            &token,
            &AuthenticationFactors::PresentationAndRecovery {
                presentation_key,
                recovery_key,
            },
        )
        .unwrap();
        assert_eq!(recovered_primary, primary_key);
        assert_eq!(recovered_privileged.unwrap(), privileged_key);
    }

    #[test]
    fn privileged_key_recoverable_via_password_and_primary() {
        let presentation_key = [0x77u8; 32];
        let recovery_key = [0x88u8; 32];
        let admin_key = [0x99u8; 32];
        let password = b"correct horse battery staple".to_vec();

        let (token, primary_key, privileged_key) =
            build_new_user_token(&presentation_key, &password, &recovery_key, &admin_key).unwrap();

        let recovered = decrypt_privileged_with_password(&token, &password, &primary_key).unwrap();
        assert_eq!(recovered, privileged_key);
    }

    #[test]
    fn wrong_password_fails_to_decrypt() {
        let presentation_key = [0xaau8; 32];
        let recovery_key = [0xbbu8; 32];
        let admin_key = [0xccu8; 32];
        let password = b"right-password".to_vec();

        let (token, ..) = build_new_user_token(&presentation_key, &password, &recovery_key, &admin_key).unwrap();

        let result = decrypt_existing_user(
            &token,
            &AuthenticationFactors::PresentationAndPassword {
                presentation_key,
                password: b"wrong-password".to_vec(),
            },
        );
        assert!(result.is_err());
    }

    proptest::proptest! {
        #[test]
        fn password_pivot_roundtrips_for_any_factors(
            presentation_key in proptest::collection::vec(proptest::prelude::any::<u8>(), 32),
            recovery_key in proptest::collection::vec(proptest::prelude::any::<u8>(), 32),
            admin_key in proptest::collection::vec(proptest::prelude::any::<u8>(), 32),
            password in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..64),
        ) {
            let presentation_key: [u8; 32] = presentation_key.try_into().unwrap();
            let recovery_key: [u8; 32] = recovery_key.try_into().unwrap();
            let admin_key: [u8; 32] = admin_key.try_into().unwrap();

            let (token, primary_key, _privileged_key) =
                build_new_user_token(&presentation_key, &password, &recovery_key, &admin_key).unwrap();

            let (recovered_primary, privileged) = decrypt_existing_user(
                &token,
                &AuthenticationFactors::PresentationAndPassword { presentation_key, password },
            )
            .unwrap();
            proptest::prop_assert_eq!(recovered_primary, primary_key);
            proptest::prop_assert!(privileged.is_none());
        }
    }
}
