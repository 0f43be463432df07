//! The wallet-toolbox façade: assembles the Key Deriver, Storage Provider,
//! Chain Services, signer pipeline, Permissions Manager, and Monitor into
//! the BRC-100 method surface a wallet-proxy host calls through.

pub mod args;
pub mod cli;
pub mod config;
pub mod liveness;
pub mod pending;
pub mod wallet;

pub use config::{Network, WalletToolboxConfig};
pub use wallet::Wallet;
