//! A block-explorer-backed [`ServiceProvider`] reached over plain HTTPS,
//! modeled the way [`crate::ServiceProvider`]'s upstream analog wraps a
//! REST chain-data API: one `reqwest::Client`, JSON in, typed structs out.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use wallet_toolbox_common::error::{WalletError, WalletResult};

use crate::{
    BlockHeaderInfo, MerkleProofResponse, PostBeefResult, ScriptHistoryEntry, TransactionStatusResponse,
    TxStatus, UtxoStatusRequest, UtxoStatusResponse,
};
use crate::ServiceProvider;

#[derive(Debug, Deserialize)]
struct ChainInfoResponse {
    blocks: u32,
    #[serde(rename = "bestblockhash")]
    best_block_hash: String,
}

#[derive(Debug, Deserialize)]
struct HeaderResponse {
    hash: String,
    height: u32,
    version: u32,
    #[serde(rename = "previousblockhash", default)]
    previous_block_hash: String,
    #[serde(rename = "merkleroot")]
    merkle_root: String,
    time: u32,
    bits: String,
    nonce: u32,
}

impl From<HeaderResponse> for BlockHeaderInfo {
    fn from(h: HeaderResponse) -> Self {
        BlockHeaderInfo {
            hash: h.hash,
            height: h.height,
            version: h.version,
            previous_hash: h.previous_block_hash,
            merkle_root: h.merkle_root,
            time: h.time,
            bits: u32::from_str_radix(h.bits.trim_start_matches("0x"), 16).unwrap_or(0),
            nonce: h.nonce,
        }
    }
}

/// Read-only chain-data provider over a block-explorer REST API.
///
/// Does not implement broadcast (`post_beef`): the configured deployment is
/// expected to pair this with at least one broadcast-capable provider ahead
/// of it in the [`crate::Services`] priority list.
pub struct WhatsOnChainProvider {
    http: reqwest::Client,
    base_url: String,
}

impl WhatsOnChainProvider {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> WalletResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "whatsonchain GET");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| WalletError::runtime(format!("whatsonchain request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(WalletError::runtime(format!(
                "whatsonchain returned {} for {path}",
                resp.status()
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| WalletError::runtime(format!("whatsonchain response malformed: {e}")))
    }
}

#[async_trait]
impl ServiceProvider for WhatsOnChainProvider {
    fn name(&self) -> &'static str {
        "whatsonchain"
    }

    async fn get_height(&self) -> WalletResult<u32> {
        let info: ChainInfoResponse = self.get_json("/chain/info").await?;
        Ok(info.blocks)
    }

    async fn get_header_for_height(&self, height: u32) -> WalletResult<[u8; 80]> {
        let hex_header: String = self.get_json(&format!("/block/{height}/header/hex")).await?;
        let bytes = hex::decode(hex_header.trim())
            .map_err(|e| WalletError::runtime(format!("malformed header hex: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| WalletError::runtime("header was not 80 bytes"))
    }

    async fn find_header_for_height(&self, height: u32) -> WalletResult<Option<BlockHeaderInfo>> {
        match self.get_json::<HeaderResponse>(&format!("/block/{height}/header")).await {
            Ok(h) => Ok(Some(h.into())),
            Err(_) => Ok(None),
        }
    }

    async fn find_chain_tip_header(&self) -> WalletResult<BlockHeaderInfo> {
        let hash = self.find_chain_tip_hash().await?;
        self.find_header_for_block_hash(&hash)
            .await?
            .ok_or_else(|| WalletError::runtime("chain tip header vanished between lookups"))
    }

    async fn find_chain_tip_hash(&self) -> WalletResult<String> {
        let info: ChainInfoResponse = self.get_json("/chain/info").await?;
        Ok(info.best_block_hash)
    }

    async fn find_header_for_block_hash(&self, hash: &str) -> WalletResult<Option<BlockHeaderInfo>> {
        match self.get_json::<HeaderResponse>(&format!("/block/{hash}/header")).await {
            Ok(h) => Ok(Some(h.into())),
            Err(_) => Ok(None),
        }
    }

    async fn get_raw_tx(&self, txid: &str) -> WalletResult<Option<String>> {
        match self.get_json::<String>(&format!("/tx/{txid}/hex")).await {
            Ok(hex) => Ok(Some(hex)),
            Err(_) => Ok(None),
        }
    }

    async fn get_merkle_path_for_transaction(&self, txid: &str) -> WalletResult<Option<MerkleProofResponse>> {
        #[derive(Deserialize)]
        struct Proof {
            #[serde(rename = "merkleRoot")]
            #[allow(dead_code)]
            merkle_root: String,
            height: u32,
            #[serde(rename = "bump")]
            bump_hex: String,
        }
        let proof: Option<Proof> = self
            .get_json(&format!("/tx/{txid}/proof/tsc"))
            .await
            .map(Some)
            .or_else(|_| Ok::<_, WalletError>(None))?;
        let Some(proof) = proof else { return Ok(None) };
        let header = self
            .find_header_for_height(proof.height)
            .await?
            .ok_or_else(|| WalletError::runtime("proof referenced a height with no known header"))?;
        let merkle_path = hex::decode(proof.bump_hex.trim())
            .map_err(|e| WalletError::runtime(format!("malformed bump hex: {e}")))?;
        Ok(Some(MerkleProofResponse { header, merkle_path }))
    }

    async fn is_valid_root_for_height(&self, root: &str, height: u32) -> WalletResult<bool> {
        match self.find_header_for_height(height).await? {
            Some(header) => Ok(header.merkle_root.eq_ignore_ascii_case(root)),
            None => Ok(false),
        }
    }

    async fn get_utxo_status(&self, request: UtxoStatusRequest) -> WalletResult<UtxoStatusResponse> {
        #[derive(Deserialize)]
        struct Unspent {
            value: u64,
            height: Option<u32>,
        }
        let path = match request.format {
            crate::UtxoStatusFormat::Outpoint => {
                let outpoint = request
                    .outpoint
                    .ok_or_else(|| WalletError::invalid_parameter("outpoint", "required when format is outpoint"))?;
                format!("/tx/{}/out", outpoint)
            }
            crate::UtxoStatusFormat::Script => format!("/script/{}/unspent", request.output),
        };
        match self.get_json::<Unspent>(&path).await {
            Ok(u) => Ok(UtxoStatusResponse {
                is_utxo: true,
                satoshis: Some(u.value),
                height: u.height,
            }),
            Err(_) => Ok(UtxoStatusResponse {
                is_utxo: false,
                satoshis: None,
                height: None,
            }),
        }
    }

    async fn get_script_history(&self, script_hash: &str) -> WalletResult<Vec<ScriptHistoryEntry>> {
        #[derive(Deserialize)]
        struct HistoryEntry {
            tx_hash: String,
            height: Option<u32>,
        }
        let entries: Vec<HistoryEntry> = self.get_json(&format!("/script/{script_hash}/history")).await?;
        Ok(entries
            .into_iter()
            .map(|e| ScriptHistoryEntry {
                txid: e.tx_hash,
                height: e.height,
            })
            .collect())
    }

    async fn get_transaction_status(&self, txid: &str) -> WalletResult<TransactionStatusResponse> {
        #[derive(Deserialize)]
        struct Confirmation {
            confirmations: Option<u32>,
        }
        match self.get_json::<Confirmation>(&format!("/tx/{txid}")).await {
            Ok(c) if c.confirmations.unwrap_or(0) > 0 => Ok(TransactionStatusResponse {
                status: TxStatus::Stored,
                competing_txs: None,
            }),
            Ok(_) => Ok(TransactionStatusResponse {
                status: TxStatus::SeenOnNetwork,
                competing_txs: None,
            }),
            Err(_) => Ok(TransactionStatusResponse {
                status: TxStatus::Unknown,
                competing_txs: None,
            }),
        }
    }

    async fn get_tx_propagation(&self, txid: &str) -> WalletResult<u32> {
        match self.get_transaction_status(txid).await?.status {
            TxStatus::Stored => Ok(100),
            TxStatus::SeenOnNetwork => Ok(50),
            _ => Ok(0),
        }
    }

    async fn post_beef(&self, _beef: &[u8], _txids: &[String]) -> WalletResult<PostBeefResult> {
        Err(WalletError::runtime("whatsonchain provider is read-only; no broadcast capability"))
    }

    async fn post_beef_array(&self, _beefs: &[Vec<u8>]) -> WalletResult<Vec<PostBeefResult>> {
        Err(WalletError::runtime("whatsonchain provider is read-only; no broadcast capability"))
    }

    async fn update_bsv_exchange_rate(&self) -> WalletResult<f64> {
        #[derive(Deserialize)]
        struct Rate {
            rate: f64,
        }
        let rate: Rate = self.get_json("/exchangerate").await?;
        Ok(rate.rate)
    }

    async fn get_fiat_exchange_rate(&self, currency: &str, base: &str) -> WalletResult<f64> {
        if !currency.eq_ignore_ascii_case("usd") || !base.eq_ignore_ascii_case("bsv") {
            return Err(WalletError::invalid_parameter(
                "currency/base",
                "only usd/bsv fiat pairing is known to this provider",
            ));
        }
        self.update_bsv_exchange_rate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_hex_parses() {
        let h = HeaderResponse {
            hash: "abc".into(),
            height: 1,
            version: 1,
            previous_block_hash: "00".into(),
            merkle_root: "ff".into(),
            time: 0,
            bits: "0x1d00ffff".into(),
            nonce: 0,
        };
        let info: BlockHeaderInfo = h.into();
        assert_eq!(info.bits, 0x1d00ffff);
    }
}
