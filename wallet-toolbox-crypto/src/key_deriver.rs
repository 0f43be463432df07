//! The Key Deriver external contract: derive protocol/key-id/
//! counterparty keys and perform sign/verify/encrypt/decrypt/HMAC against
//! them. [`Secp256k1KeyDeriver`] is the concrete implementation the rest of
//! the workspace is built and tested against.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use sha2::Sha256;
use wallet_toolbox_common::error::WalletError;
use wallet_toolbox_common::hash::sha256;
use wallet_toolbox_common::types::{Counterparty, Protocol};

use crate::derive::derive_private_key;

pub trait KeyDeriver: Send + Sync {
    fn root_public_key(&self) -> PublicKey;

    fn derive_public_key(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        for_self: bool,
    ) -> Result<PublicKey, WalletError>;

    fn derive_private_key(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
    ) -> Result<SecretKey, WalletError>;

    /// A 32-byte symmetric key derived the same way as the private key, used
    /// by `encrypt`/`decrypt`/`create_hmac`/`verify_hmac`.
    fn derive_symmetric_key(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
    ) -> Result<[u8; 32], WalletError> {
        let sk = self.derive_private_key(protocol, key_id, counterparty)?;
        Ok(sha256(&sk.secret_bytes()))
    }

    fn sign(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        hash: &[u8; 32],
    ) -> Result<Signature, WalletError>;

    fn verify(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        hash: &[u8; 32],
        signature: &Signature,
        public_key: Option<&PublicKey>,
    ) -> Result<bool, WalletError>;

    fn encrypt(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, WalletError>;

    fn decrypt(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, WalletError>;

    fn create_hmac(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        data: &[u8],
    ) -> Result<[u8; 32], WalletError>;

    fn verify_hmac(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        data: &[u8],
        hmac: &[u8; 32],
    ) -> Result<bool, WalletError>;
}

/// Holds the wallet's root private key and derives everything else from it
/// on demand; nothing is cached (the privileged/primary key managers above
/// this layer own retention policy).
pub struct Secp256k1KeyDeriver {
    secp: Secp256k1<secp256k1::All>,
    root_private_key: SecretKey,
    root_public_key: PublicKey,
}

impl Secp256k1KeyDeriver {
    pub fn new(root_private_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let root_public_key = PublicKey::from_secret_key(&secp, &root_private_key);
        Self {
            secp,
            root_private_key,
            root_public_key,
        }
    }

    fn encryption_key(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
    ) -> Result<[u8; 32], WalletError> {
        self.derive_symmetric_key(protocol, key_id, counterparty)
    }
}

impl KeyDeriver for Secp256k1KeyDeriver {
    fn root_public_key(&self) -> PublicKey {
        self.root_public_key
    }

    fn derive_public_key(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        for_self: bool,
    ) -> Result<PublicKey, WalletError> {
        let sk = derive_private_key(&self.root_private_key, protocol, key_id, counterparty, for_self);
        Ok(PublicKey::from_secret_key(&self.secp, &sk))
    }

    fn derive_private_key(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
    ) -> Result<SecretKey, WalletError> {
        Ok(derive_private_key(
            &self.root_private_key,
            protocol,
            key_id,
            counterparty,
            true,
        ))
    }

    fn sign(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        hash: &[u8; 32],
    ) -> Result<Signature, WalletError> {
        let sk = self.derive_private_key(protocol, key_id, counterparty)?;
        let msg = Message::from_digest(*hash);
        Ok(self.secp.sign_ecdsa(&msg, &sk))
    }

    fn verify(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        hash: &[u8; 32],
        signature: &Signature,
        public_key: Option<&PublicKey>,
    ) -> Result<bool, WalletError> {
        let pk = match public_key {
            Some(pk) => *pk,
            None => self.derive_public_key(protocol, key_id, counterparty, true)?,
        };
        let msg = Message::from_digest(*hash);
        Ok(self.secp.verify_ecdsa(&msg, signature, &pk).is_ok())
    }

    fn encrypt(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, WalletError> {
        let key_bytes = self.encryption_key(protocol, key_id, counterparty)?;
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| WalletError::runtime(format!("bad symmetric key: {e}")))?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| WalletError::Decryption {
                message: format!("encryption failed: {e}"),
            })?;
        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, WalletError> {
        if ciphertext.len() < 12 {
            return Err(WalletError::decryption("ciphertext shorter than nonce"));
        }
        let (nonce_bytes, body) = ciphertext.split_at(12);
        let key_bytes = self.encryption_key(protocol, key_id, counterparty)?;
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| WalletError::runtime(format!("bad symmetric key: {e}")))?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| WalletError::decryption("AEAD authentication failed"))
    }

    fn create_hmac(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        data: &[u8],
    ) -> Result<[u8; 32], WalletError> {
        let key_bytes = self.derive_symmetric_key(protocol, key_id, counterparty)?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key_bytes)
            .map_err(|e| WalletError::runtime(format!("bad HMAC key: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }

    fn verify_hmac(
        &self,
        protocol: &Protocol,
        key_id: &str,
        counterparty: &Counterparty,
        data: &[u8],
        hmac: &[u8; 32],
    ) -> Result<bool, WalletError> {
        let expected = self.create_hmac(protocol, key_id, counterparty, data)?;
        Ok(bool::from(
            subtle_eq(&expected, hmac),
        ))
    }
}

/// Constant-time-ish equality without pulling in `subtle` for one call site.
fn subtle_eq(a: &[u8; 32], b: &[u8; 32]) -> u8 {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    u8::from(diff == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_toolbox_common::types::SecurityLevel;

    fn deriver() -> Secp256k1KeyDeriver {
        let sk = SecretKey::from_slice(&[0x11u8; 32]).unwrap();
        Secp256k1KeyDeriver::new(sk)
    }

    fn protocol() -> Protocol {
        Protocol {
            security_level: SecurityLevel::Private,
            name: "test".into(),
        }
    }

    #[test]
    fn sign_then_verify_roundtrips() {
        let kd = deriver();
        let hash = sha256(b"hello world");
        let sig = kd.sign(&protocol(), "1", &Counterparty::Myself, &hash).unwrap();
        assert!(kd
            .verify(&protocol(), "1", &Counterparty::Myself, &hash, &sig, None)
            .unwrap());
    }

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let kd = deriver();
        let ct = kd
            .encrypt(&protocol(), "1", &Counterparty::Myself, b"secret message")
            .unwrap();
        let pt = kd
            .decrypt(&protocol(), "1", &Counterparty::Myself, &ct)
            .unwrap();
        assert_eq!(pt, b"secret message");
    }

    #[test]
    fn decrypt_with_wrong_key_id_fails() {
        let kd = deriver();
        let ct = kd
            .encrypt(&protocol(), "1", &Counterparty::Myself, b"secret message")
            .unwrap();
        assert!(kd.decrypt(&protocol(), "2", &Counterparty::Myself, &ct).is_err());
    }

    #[test]
    fn hmac_roundtrips() {
        let kd = deriver();
        let mac = kd
            .create_hmac(&protocol(), "1", &Counterparty::Myself, b"data")
            .unwrap();
        assert!(kd
            .verify_hmac(&protocol(), "1", &Counterparty::Myself, b"data", &mac)
            .unwrap());
    }
}
