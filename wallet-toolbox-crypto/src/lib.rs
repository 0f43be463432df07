//! Key derivation and the symmetric/asymmetric crypto the wallet façade
//! calls through the [`key_deriver::KeyDeriver`] trait.

pub mod derive;
pub mod key_deriver;

pub use key_deriver::{KeyDeriver, Secp256k1KeyDeriver};
