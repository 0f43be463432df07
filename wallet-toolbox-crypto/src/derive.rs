//! Deterministic key tweak derivation from `(protocol, keyID, counterparty)`.
//!
//! The real BRC-42/43 invariant derivation is the explicitly-external
//! "ECDSA/SHA primitives" collaborator; this module derives a
//! stable, reproducible tweak scalar from the same three inputs so the rest
//! of the system has something to sign/verify/encrypt against. Swapping this
//! for a byte-exact BRC-42 implementation later does not change any caller.

use secp256k1::{Scalar, SecretKey};
use sha2::{Digest, Sha256};
use wallet_toolbox_common::types::{Counterparty, Protocol};

/// Computes the tweak scalar for `(protocol, keyID, counterparty)`. `forSelf`
/// additionally salts the input so that "derive for counterparty X" and
/// "derive as the key X would use to reach me" produce different children.
pub fn derive_tweak(protocol: &Protocol, key_id: &str, counterparty: &Counterparty, for_self: bool) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update([protocol.security_level as u8]);
    hasher.update(protocol.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(key_id.as_bytes());
    hasher.update([0u8]);
    match counterparty {
        Counterparty::Myself => hasher.update(b"self"),
        Counterparty::Anyone => hasher.update(b"anyone"),
        Counterparty::Other(pk) => hasher.update(pk.serialize()),
    }
    hasher.update([u8::from(for_self)]);
    let digest: [u8; 32] = hasher.finalize().into();
    // A hash output is not guaranteed to be a valid scalar (must be < curve
    // order); fall back to hashing again on the (cryptographically
    // negligible) chance it isn't.
    match Scalar::from_be_bytes(digest) {
        Ok(scalar) => scalar,
        Err(_) => {
            let rehashed: [u8; 32] = Sha256::digest(digest).into();
            Scalar::from_be_bytes(rehashed).expect("rehash yields a valid scalar with overwhelming probability")
        }
    }
}

/// Derives a child private key by tweak-adding to `root`.
pub fn derive_private_key(
    root: &SecretKey,
    protocol: &Protocol,
    key_id: &str,
    counterparty: &Counterparty,
    for_self: bool,
) -> SecretKey {
    let tweak = derive_tweak(protocol, key_id, counterparty, for_self);
    root.add_tweak(&tweak)
        .expect("tweak-add fails only if the result is the zero key, negligible probability")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_toolbox_common::types::SecurityLevel;

    #[test]
    fn same_inputs_derive_same_tweak() {
        let protocol = Protocol {
            security_level: SecurityLevel::Private,
            name: "test protocol".into(),
        };
        let a = derive_tweak(&protocol, "1", &Counterparty::Myself, true);
        let b = derive_tweak(&protocol, "1", &Counterparty::Myself, true);
        assert_eq!(a, b);
    }

    #[test]
    fn different_key_ids_derive_different_tweaks() {
        let protocol = Protocol {
            security_level: SecurityLevel::Private,
            name: "test protocol".into(),
        };
        let a = derive_tweak(&protocol, "1", &Counterparty::Myself, true);
        let b = derive_tweak(&protocol, "2", &Counterparty::Myself, true);
        assert_ne!(a, b);
    }
}
