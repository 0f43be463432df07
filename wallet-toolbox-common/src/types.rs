//! Closed variants for the loosely-typed BRC-100 argument surface.
//!
//! Validating at the boundary into closed variants rather than carrying
//! `serde_json::Value` internally keeps downstream code from re-checking
//! invariants the wire format already guarantees.

use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// A BRC-100 `counterparty`: `"self"`, `"anyone"`, or a hex-encoded public
/// key. Compressed form is preferred; uncompressed
/// keys are accepted for `secp256k1::PublicKey::from_slice` compatibility
/// but never produced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Counterparty {
    Myself,
    Anyone,
    Other(secp256k1::PublicKey),
}

impl Counterparty {
    pub fn parse(raw: &str) -> Result<Self, WalletError> {
        match raw {
            "self" => Ok(Self::Myself),
            "anyone" => Ok(Self::Anyone),
            hex_key => {
                let bytes = hex::decode(hex_key).map_err(|e| {
                    WalletError::invalid_parameter("counterparty", format!("not hex: {e}"))
                })?;
                let pk = secp256k1::PublicKey::from_slice(&bytes).map_err(|e| {
                    WalletError::invalid_parameter("counterparty", format!("not a public key: {e}"))
                })?;
                Ok(Self::Other(pk))
            }
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            Self::Myself => "self".to_string(),
            Self::Anyone => "anyone".to_string(),
            Self::Other(pk) => hex::encode(pk.serialize()),
        }
    }
}

/// Security level of a protocol ID: 0 (open), 1 (shared secret), 2 (private).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecurityLevel {
    Open = 0,
    SharedSecret = 1,
    Private = 2,
}

impl TryFrom<u8> for SecurityLevel {
    type Error = WalletError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::SharedSecret),
            2 => Ok(Self::Private),
            other => Err(WalletError::invalid_parameter(
                "protocolID.securityLevel",
                format!("must be 0, 1, or 2, got {other}"),
            )),
        }
    }
}

/// `protocolID: [securityLevel, name]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    pub security_level: SecurityLevel,
    pub name: String,
}

impl Protocol {
    pub fn parse(security_level: u8, name: &str) -> Result<Self, WalletError> {
        if name.is_empty() || name.len() > 400 {
            return Err(WalletError::invalid_parameter(
                "protocolID.name",
                "must be 1..=400 bytes",
            ));
        }
        Ok(Self {
            security_level: SecurityLevel::try_from(security_level)?,
            name: name.to_ascii_lowercase(),
        })
    }

    /// The fixed admin protocol used for metadata encryption.
    pub fn admin_metadata_encryption() -> Self {
        Self {
            security_level: SecurityLevel::Private,
            name: "admin metadata encryption".to_string(),
        }
    }

    /// The fixed protocol used to derive change-output locking scripts.
    pub fn wallet_payment() -> Self {
        Self {
            security_level: SecurityLevel::Private,
            name: "wallet payment".to_string(),
        }
    }
}

/// Validates an `originator` string: <= 250 UTF-8 bytes, or absent.
pub fn validate_originator(originator: Option<&str>) -> Result<(), WalletError> {
    match originator {
        None => Ok(()),
        Some(o) if o.len() <= 250 => Ok(()),
        Some(_) => Err(WalletError::invalid_parameter(
            "originator",
            "must be at most 250 UTF-8 bytes",
        )),
    }
}

/// The originator string reserved for internal admin use; external callers
/// presenting this originator are refused.
pub const ADMIN_ORIGINATOR: &str = "admin.wallet-toolbox";

pub fn is_admin_originator(originator: Option<&str>) -> bool {
    originator == Some(ADMIN_ORIGINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterparty_parses_self_and_anyone() {
        assert_eq!(Counterparty::parse("self").unwrap(), Counterparty::Myself);
        assert_eq!(Counterparty::parse("anyone").unwrap(), Counterparty::Anyone);
    }

    #[test]
    fn counterparty_rejects_garbage_hex() {
        assert!(Counterparty::parse("not-hex").is_err());
    }

    #[test]
    fn originator_length_boundary() {
        assert!(validate_originator(Some(&"a".repeat(250))).is_ok());
        assert!(validate_originator(Some(&"a".repeat(251))).is_err());
    }

    #[test]
    fn admin_originator_is_recognized() {
        assert!(is_admin_originator(Some(ADMIN_ORIGINATOR)));
        assert!(!is_admin_originator(Some("evil.example")));
        assert!(!is_admin_originator(None));
    }
}
