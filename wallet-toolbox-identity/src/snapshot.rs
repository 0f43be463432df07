//! Encrypted identity snapshots:
//!
//! ```text
//! [1]  version
//! [32] snapshot_key (random, used as SymmetricKey)
//! [16] active_profile_id (version 2 only)
//! [N]  SymmetricKey(snapshot_key).encrypt(
//!          root_primary_key || u32_be(len_token) || serialize(token)
//!      )
//! ```
//!
//! Version 1 omits `active_profile_id`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use wallet_toolbox_common::error::{WalletError, WalletResult};

use crate::ump::UmpToken;

pub const SNAPSHOT_VERSION_1: u8 = 1;
pub const SNAPSHOT_VERSION_2: u8 = 2;

/// The material a snapshot round-trips: the root primary key, the active
/// profile (version 2 only), and the full UMP token.
pub struct SnapshotState {
    pub root_primary_key: [u8; 32],
    pub active_profile_id: [u8; 16],
    pub token: UmpToken,
}

fn serialize_token(token: &UmpToken) -> Vec<u8> {
    // Length-prefixed concatenation of every field, in PushDrop
    // field order. Plain framing, not a general-purpose codec: the snapshot
    // format is private to this crate.
    let fields: [&[u8]; 11] = [
        &token.password_salt,
        &token.password_presentation_primary,
        &token.password_recovery_primary,
        &token.presentation_recovery_primary,
        &token.password_primary_privileged,
        &token.presentation_recovery_privileged,
        &token.presentation_hash,
        &token.recovery_hash,
        &token.presentation_key_encrypted,
        &token.password_key_encrypted,
        &token.recovery_key_encrypted,
    ];
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    match &token.profiles_encrypted {
        Some(profiles) => {
            out.extend_from_slice(&1u8.to_be_bytes());
            out.extend_from_slice(&(profiles.len() as u32).to_be_bytes());
            out.extend_from_slice(profiles);
        }
        None => out.extend_from_slice(&0u8.to_be_bytes()),
    }
    out
}

fn deserialize_token(mut bytes: &[u8]) -> WalletResult<UmpToken> {
    fn take<'a>(bytes: &mut &'a [u8], n: usize) -> WalletResult<&'a [u8]> {
        if bytes.len() < n {
            return Err(WalletError::decryption("snapshot token truncated"));
        }
        let (head, tail) = bytes.split_at(n);
        *bytes = tail;
        Ok(head)
    }
    fn take_field(bytes: &mut &[u8]) -> WalletResult<Vec<u8>> {
        let len_bytes = take(bytes, 4)?;
        let len = u32::from_be_bytes(len_bytes.try_into().expect("exactly 4 bytes")) as usize;
        Ok(take(bytes, len)?.to_vec())
    }
    fn take_array32(bytes: &mut &[u8]) -> WalletResult<[u8; 32]> {
        let field = take_field(bytes)?;
        field
            .try_into()
            .map_err(|_| WalletError::decryption("snapshot token field was not 32 bytes"))
    }

    let password_salt = take_array32(&mut bytes)?;
    let password_presentation_primary = take_field(&mut bytes)?;
    let password_recovery_primary = take_field(&mut bytes)?;
    let presentation_recovery_primary = take_field(&mut bytes)?;
    let password_primary_privileged = take_field(&mut bytes)?;
    let presentation_recovery_privileged = take_field(&mut bytes)?;
    let presentation_hash = take_array32(&mut bytes)?;
    let recovery_hash = take_array32(&mut bytes)?;
    let presentation_key_encrypted = take_field(&mut bytes)?;
    let password_key_encrypted = take_field(&mut bytes)?;
    let recovery_key_encrypted = take_field(&mut bytes)?;
    let has_profiles = take(&mut bytes, 1)?[0];
    let profiles_encrypted = if has_profiles == 1 {
        Some(take_field(&mut bytes)?)
    } else {
        None
    };

    Ok(UmpToken {
        password_salt,
        password_presentation_primary,
        password_recovery_primary,
        presentation_recovery_primary,
        password_primary_privileged,
        presentation_recovery_privileged,
        presentation_hash,
        recovery_hash,
        presentation_key_encrypted,
        password_key_encrypted,
        recovery_key_encrypted,
        profiles_encrypted,
    })
}

/// Serializes and encrypts `state` as a version-2 snapshot.
pub fn save_snapshot(state: &SnapshotState) -> WalletResult<Vec<u8>> {
    let mut snapshot_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut snapshot_key);

    let serialized_token = serialize_token(&state.token);
    let mut plaintext = Vec::with_capacity(32 + 4 + serialized_token.len());
    plaintext.extend_from_slice(&state.root_primary_key);
    plaintext.extend_from_slice(&(serialized_token.len() as u32).to_be_bytes());
    plaintext.extend_from_slice(&serialized_token);

    let cipher = Aes256Gcm::new_from_slice(&snapshot_key)
        .map_err(|e| WalletError::runtime(format!("bad snapshot key: {e}")))?;
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
        .map_err(|e| WalletError::runtime(format!("snapshot encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(1 + 32 + 16 + 12 + ciphertext.len());
    out.push(SNAPSHOT_VERSION_2);
    out.extend_from_slice(&snapshot_key);
    out.extend_from_slice(&state.active_profile_id);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts and deserializes a snapshot produced by [`save_snapshot`], or any
/// version-1 snapshot (no `active_profile_id`, defaulted to all-zeros).
/// Any truncation or tamper raises [`WalletError::Decryption`]; the caller
/// must treat the manager as unauthenticated on error: any partially-loaded
/// state is destroyed before rethrowing.
pub fn load_snapshot(bytes: &[u8]) -> WalletResult<SnapshotState> {
    if bytes.is_empty() {
        return Err(WalletError::decryption("snapshot is empty"));
    }
    let version = bytes[0];
    let mut cursor = &bytes[1..];

    if cursor.len() < 32 {
        return Err(WalletError::decryption("snapshot truncated before snapshot_key"));
    }
    let (snapshot_key_bytes, rest) = cursor.split_at(32);
    let snapshot_key: [u8; 32] = snapshot_key_bytes
        .try_into()
        .map_err(|_| WalletError::decryption("snapshot_key was not 32 bytes"))?;
    cursor = rest;

    let active_profile_id = match version {
        SNAPSHOT_VERSION_2 => {
            if cursor.len() < 16 {
                return Err(WalletError::decryption("snapshot truncated before active_profile_id"));
            }
            let (id_bytes, rest) = cursor.split_at(16);
            cursor = rest;
            id_bytes.try_into().map_err(|_| WalletError::decryption("active_profile_id was not 16 bytes"))?
        }
        SNAPSHOT_VERSION_1 => [0u8; 16],
        other => return Err(WalletError::decryption(format!("unsupported snapshot version {other}"))),
    };

    if cursor.len() < 12 {
        return Err(WalletError::decryption("snapshot truncated before nonce"));
    }
    let (nonce_bytes, ciphertext) = cursor.split_at(12);

    let cipher = Aes256Gcm::new_from_slice(&snapshot_key)
        .map_err(|e| WalletError::runtime(format!("bad snapshot key: {e}")))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| WalletError::decryption("snapshot AEAD authentication failed"))?;

    if plaintext.len() < 36 {
        return Err(WalletError::decryption("decrypted snapshot body truncated"));
    }
    let (root_primary_key_bytes, rest) = plaintext.split_at(32);
    let root_primary_key: [u8; 32] = root_primary_key_bytes
        .try_into()
        .map_err(|_| WalletError::decryption("root_primary_key was not 32 bytes"))?;
    let (len_bytes, token_bytes) = rest.split_at(4);
    let len_token = u32::from_be_bytes(len_bytes.try_into().expect("exactly 4 bytes")) as usize;
    if token_bytes.len() != len_token {
        return Err(WalletError::decryption("token length prefix did not match remaining bytes"));
    }
    let token = deserialize_token(token_bytes)?;

    Ok(SnapshotState {
        root_primary_key,
        active_profile_id,
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ump::build_new_user_token;

    fn sample_state() -> SnapshotState {
        let (token, primary_key, _privileged_key) =
            build_new_user_token(&[0x11u8; 32], b"hunter2", &[0x22u8; 32], &[0x33u8; 32]).unwrap();
        SnapshotState {
            root_primary_key: primary_key.try_into().unwrap(),
            active_profile_id: [0u8; 16],
            token,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let state = sample_state();
        let bytes = save_snapshot(&state).unwrap();
        let loaded = load_snapshot(&bytes).unwrap();
        assert_eq!(loaded.root_primary_key, state.root_primary_key);
        assert_eq!(loaded.active_profile_id, state.active_profile_id);
        assert_eq!(loaded.token.password_salt, state.token.password_salt);
        assert_eq!(loaded.token.presentation_hash, state.token.presentation_hash);
    }

    #[test]
    fn truncated_snapshot_raises_decryption_error() {
        let state = sample_state();
        let mut bytes = save_snapshot(&state).unwrap();
        bytes.pop();
        let result = load_snapshot(&bytes);
        assert!(matches!(result, Err(WalletError::Decryption { .. })));
    }

    #[test]
    fn bit_flipped_snapshot_raises_decryption_error() {
        let state = sample_state();
        let mut bytes = save_snapshot(&state).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let result = load_snapshot(&bytes);
        assert!(matches!(result, Err(WalletError::Decryption { .. })));
    }

    #[test]
    fn version_1_snapshot_defaults_active_profile_to_zero() {
        let state = sample_state();
        let v2 = save_snapshot(&state).unwrap();
        // Re-frame as a version-1 snapshot by dropping the active_profile_id field.
        let mut v1 = Vec::with_capacity(v2.len() - 16);
        v1.push(SNAPSHOT_VERSION_1);
        v1.extend_from_slice(&v2[1..33]);
        v1.extend_from_slice(&v2[49..]);
        let loaded = load_snapshot(&v1).unwrap();
        assert_eq!(loaded.active_profile_id, [0u8; 16]);
    }
}
