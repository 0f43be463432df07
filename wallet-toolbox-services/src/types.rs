//! Wire types for the chain-services contract.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeaderInfo {
    pub hash: String,
    pub height: u32,
    pub version: u32,
    pub previous_hash: String,
    pub merkle_root: String,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProofResponse {
    pub header: BlockHeaderInfo,
    pub merkle_path: Vec<u8>,
}

/// The requested shape of a UTXO-status lookup: by output script or by
/// explicit outpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UtxoStatusFormat {
    Script,
    Outpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoStatusRequest {
    pub output: String,
    pub format: UtxoStatusFormat,
    pub outpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoStatusResponse {
    pub is_utxo: bool,
    pub satoshis: Option<u64>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptHistoryEntry {
    pub txid: String,
    pub height: Option<u32>,
}

/// The terminal vocabulary a broadcast's status polling
/// converges to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    SeenOnNetwork,
    Stored,
    DoubleSpendAttempted,
    SeenInOrphanMempool,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusResponse {
    pub status: TxStatus,
    pub competing_txs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostBeefResult {
    pub txid: String,
    pub status: TxStatus,
    pub competing_txs: Option<Vec<String>>,
}

impl TxStatus {
    /// Whether this status indicates the broadcast lost to, or was rejected
    /// in favor of, a conflicting transaction.
    pub fn is_double_spend(&self) -> bool {
        matches!(self, Self::DoubleSpendAttempted | Self::SeenInOrphanMempool)
    }
}
