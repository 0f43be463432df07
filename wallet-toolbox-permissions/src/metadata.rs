//! Metadata encryption: when enabled, action descriptions,
//! input/output descriptions, and custom instructions are encrypted under
//! the fixed admin protocol and base64-encoded for storage.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use wallet_toolbox_common::error::{WalletError, WalletResult};
use wallet_toolbox_common::types::{Counterparty, Protocol};
use wallet_toolbox_crypto::KeyDeriver;

/// Encrypts `plaintext` under the admin metadata-encryption protocol and
/// returns a base64 string suitable for storage.
pub fn encrypt_metadata(key_deriver: &dyn KeyDeriver, plaintext: &str) -> WalletResult<String> {
    let protocol: Protocol = Protocol::admin_metadata_encryption();
    let ciphertext = key_deriver
        .encrypt(&protocol, "1", &Counterparty::Myself, plaintext.as_bytes())
        .map_err(|e| WalletError::runtime(format!("metadata encryption failed: {e}")))?;
    Ok(BASE64.encode(ciphertext))
}

/// Reverses [`encrypt_metadata`]; returns a [`WalletError::Decryption`] on a
/// malformed base64 payload or an authentication failure.
pub fn decrypt_metadata(key_deriver: &dyn KeyDeriver, encoded: &str) -> WalletResult<String> {
    let protocol: Protocol = Protocol::admin_metadata_encryption();
    let ciphertext = BASE64
        .decode(encoded)
        .map_err(|e| WalletError::decryption(format!("metadata was not valid base64: {e}")))?;
    let plaintext = key_deriver
        .decrypt(&protocol, "1", &Counterparty::Myself, &ciphertext)
        .map_err(|e| WalletError::decryption(format!("metadata decryption failed: {e}")))?;
    String::from_utf8(plaintext).map_err(|e| WalletError::decryption(format!("metadata was not valid UTF-8: {e}")))
}

/// The audit label injected on every outgoing action from a non-admin
/// originator.
pub fn admin_originator_label(originator: &str) -> String {
    format!("admin originator {originator}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_toolbox_crypto::Secp256k1KeyDeriver;

    fn deriver() -> Secp256k1KeyDeriver {
        Secp256k1KeyDeriver::new(secp256k1::SecretKey::from_slice(&[0x22u8; 32]).unwrap())
    }

    #[test]
    fn metadata_roundtrips() {
        let kd = deriver();
        let encoded = encrypt_metadata(&kd, "pay the invoice").unwrap();
        let decoded = decrypt_metadata(&kd, &encoded).unwrap();
        assert_eq!(decoded, "pay the invoice");
    }

    #[test]
    fn corrupted_payload_fails_decryption() {
        let kd = deriver();
        let encoded = encrypt_metadata(&kd, "pay the invoice").unwrap();
        let mut corrupted = encoded.clone();
        corrupted.push('!');
        assert!(matches!(decrypt_metadata(&kd, &corrupted), Err(WalletError::Decryption { .. })));
    }

    #[test]
    fn label_format_matches_spec() {
        assert_eq!(admin_originator_label("app.example"), "admin originator app.example");
    }
}
