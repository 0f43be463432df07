//! The Storage Provider: a relational backing store for
//! users, transactions, outputs, baskets, tags, labels, proven transactions
//! and proven-transaction requests, certificates, commissions, monitor
//! events, sync state, and settings, plus the `list_outputs`/`list_actions`
//! `SpecOp` overloads that reinterpret ordinary list operations as balance
//! queries, UTXO-liveness audits, or configuration updates.

pub mod actions;
pub mod certificates;
pub mod error;
pub mod internalize;
pub mod list_outputs;
pub mod models;
pub mod provider;
pub mod services;

pub use error::{StorageError, StorageResult};
pub use models::*;
pub use provider::{SqliteStorageProvider, StorageProvider};
pub use services::UtxoLivenessCheck;
