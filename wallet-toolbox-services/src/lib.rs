//! Chain Services: a unified, multiplexed view over however
//! many external chain-data providers are configured — height and header
//! lookups, raw-tx retrieval, merkle proofs, UTXO and script-history status,
//! broadcast, and BSV/fiat exchange rates.
//!
//! A single provider (e.g. WhatsOnChain) may be read-only; [`Services`]
//! tries each configured provider in priority order and falls back to the
//! next on error, the way the upstream provider registry this crate was
//! generalized from did.

pub mod multiplex;
pub mod types;
pub mod whatsonchain;

pub use multiplex::Services;
pub use types::*;

use async_trait::async_trait;
use wallet_toolbox_common::error::WalletResult;

/// The chain-services provider contract every backend implements.
///
/// Implementations MAY be read-only (a block explorer API) or
/// broadcast-capable (a transaction-processing service); [`Services`]
/// multiplexes across however many of each are configured.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// A short, stable name used in logs and in `ReviewActions` data bags.
    fn name(&self) -> &'static str;

    async fn get_height(&self) -> WalletResult<u32>;

    /// The raw 80-byte block header at `height`.
    async fn get_header_for_height(&self, height: u32) -> WalletResult<[u8; 80]>;

    async fn find_header_for_height(&self, height: u32) -> WalletResult<Option<BlockHeaderInfo>>;

    async fn find_chain_tip_header(&self) -> WalletResult<BlockHeaderInfo>;

    async fn find_chain_tip_hash(&self) -> WalletResult<String>;

    async fn find_header_for_block_hash(&self, hash: &str) -> WalletResult<Option<BlockHeaderInfo>>;

    async fn get_raw_tx(&self, txid: &str) -> WalletResult<Option<String>>;

    async fn get_merkle_path_for_transaction(&self, txid: &str) -> WalletResult<Option<MerkleProofResponse>>;

    async fn is_valid_root_for_height(&self, root: &str, height: u32) -> WalletResult<bool>;

    async fn get_utxo_status(&self, request: UtxoStatusRequest) -> WalletResult<UtxoStatusResponse>;

    async fn get_script_history(&self, script_hash: &str) -> WalletResult<Vec<ScriptHistoryEntry>>;

    async fn get_transaction_status(&self, txid: &str) -> WalletResult<TransactionStatusResponse>;

    async fn get_tx_propagation(&self, txid: &str) -> WalletResult<u32>;

    async fn post_beef(&self, beef: &[u8], txids: &[String]) -> WalletResult<PostBeefResult>;

    async fn post_beef_array(&self, beefs: &[Vec<u8>]) -> WalletResult<Vec<PostBeefResult>>;

    async fn update_bsv_exchange_rate(&self) -> WalletResult<f64>;

    async fn get_fiat_exchange_rate(&self, currency: &str, base: &str) -> WalletResult<f64>;
}
