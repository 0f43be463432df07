//! Fallback-chain multiplexer over however many [`ServiceProvider`]s are
//! configured, generalized from the provider-registry pattern of the system
//! this crate's contract was distilled from: try each provider in priority
//! order, fall through to the next on error, and surface the last error if
//! every provider is exhausted.

use async_trait::async_trait;
use tracing::warn;
use wallet_toolbox_common::error::{WalletError, WalletResult};

use crate::{
    BlockHeaderInfo, MerkleProofResponse, PostBeefResult, ScriptHistoryEntry,
    TransactionStatusResponse, UtxoStatusRequest, UtxoStatusResponse,
};
use crate::ServiceProvider;

/// Holds a priority-ordered list of providers and tries each in turn.
/// Providers earlier in the list are preferred; a later provider is only
/// consulted once every earlier one has failed.
pub struct Services {
    providers: Vec<std::sync::Arc<dyn ServiceProvider>>,
}

impl Services {
    pub fn new(providers: Vec<std::sync::Arc<dyn ServiceProvider>>) -> Self {
        Self { providers }
    }

    async fn try_each<T, F, Fut>(&self, op: &str, f: F) -> WalletResult<T>
    where
        F: Fn(std::sync::Arc<dyn ServiceProvider>) -> Fut,
        Fut: std::future::Future<Output = WalletResult<T>>,
    {
        let mut last_err = WalletError::runtime(format!("no service providers configured for {op}"));
        for provider in &self.providers {
            match f(provider.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(provider = provider.name(), %op, error = %e, "service provider failed, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl ServiceProvider for Services {
    fn name(&self) -> &'static str {
        "services-multiplexer"
    }

    async fn get_height(&self) -> WalletResult<u32> {
        self.try_each("getHeight", |p| async move { p.get_height().await }).await
    }

    async fn get_header_for_height(&self, height: u32) -> WalletResult<[u8; 80]> {
        self.try_each("getHeaderForHeight", |p| async move { p.get_header_for_height(height).await })
            .await
    }

    async fn find_header_for_height(&self, height: u32) -> WalletResult<Option<BlockHeaderInfo>> {
        self.try_each("findHeaderForHeight", |p| async move { p.find_header_for_height(height).await })
            .await
    }

    async fn find_chain_tip_header(&self) -> WalletResult<BlockHeaderInfo> {
        self.try_each("findChainTipHeader", |p| async move { p.find_chain_tip_header().await })
            .await
    }

    async fn find_chain_tip_hash(&self) -> WalletResult<String> {
        self.try_each("findChainTipHash", |p| async move { p.find_chain_tip_hash().await })
            .await
    }

    async fn find_header_for_block_hash(&self, hash: &str) -> WalletResult<Option<BlockHeaderInfo>> {
        let hash = hash.to_string();
        self.try_each("findHeaderForBlockHash", move |p| {
            let hash = hash.clone();
            async move { p.find_header_for_block_hash(&hash).await }
        })
        .await
    }

    async fn get_raw_tx(&self, txid: &str) -> WalletResult<Option<String>> {
        let txid = txid.to_string();
        self.try_each("getRawTx", move |p| {
            let txid = txid.clone();
            async move { p.get_raw_tx(&txid).await }
        })
        .await
    }

    async fn get_merkle_path_for_transaction(&self, txid: &str) -> WalletResult<Option<MerkleProofResponse>> {
        let txid = txid.to_string();
        self.try_each("getMerklePathForTransaction", move |p| {
            let txid = txid.clone();
            async move { p.get_merkle_path_for_transaction(&txid).await }
        })
        .await
    }

    async fn is_valid_root_for_height(&self, root: &str, height: u32) -> WalletResult<bool> {
        let root = root.to_string();
        self.try_each("isValidRootForHeight", move |p| {
            let root = root.clone();
            async move { p.is_valid_root_for_height(&root, height).await }
        })
        .await
    }

    async fn get_utxo_status(&self, request: UtxoStatusRequest) -> WalletResult<UtxoStatusResponse> {
        self.try_each("getUtxoStatus", move |p| {
            let request = request.clone();
            async move { p.get_utxo_status(request).await }
        })
        .await
    }

    async fn get_script_history(&self, script_hash: &str) -> WalletResult<Vec<ScriptHistoryEntry>> {
        let script_hash = script_hash.to_string();
        self.try_each("getScriptHistory", move |p| {
            let script_hash = script_hash.clone();
            async move { p.get_script_history(&script_hash).await }
        })
        .await
    }

    async fn get_transaction_status(&self, txid: &str) -> WalletResult<TransactionStatusResponse> {
        let txid = txid.to_string();
        self.try_each("getTransactionStatus", move |p| {
            let txid = txid.clone();
            async move { p.get_transaction_status(&txid).await }
        })
        .await
    }

    async fn get_tx_propagation(&self, txid: &str) -> WalletResult<u32> {
        let txid = txid.to_string();
        self.try_each("getTxPropagation", move |p| {
            let txid = txid.clone();
            async move { p.get_tx_propagation(&txid).await }
        })
        .await
    }

    async fn post_beef(&self, beef: &[u8], txids: &[String]) -> WalletResult<PostBeefResult> {
        // Broadcast must reach every configured provider, not just the
        // first that answers: a later provider might be the only
        // broadcast-capable one. Try in order but report the first success.
        let beef = beef.to_vec();
        let txids = txids.to_vec();
        self.try_each("postBeef", move |p| {
            let beef = beef.clone();
            let txids = txids.clone();
            async move { p.post_beef(&beef, &txids).await }
        })
        .await
    }

    async fn post_beef_array(&self, beefs: &[Vec<u8>]) -> WalletResult<Vec<PostBeefResult>> {
        let beefs = beefs.to_vec();
        self.try_each("postBeefArray", move |p| {
            let beefs = beefs.clone();
            async move { p.post_beef_array(&beefs).await }
        })
        .await
    }

    async fn update_bsv_exchange_rate(&self) -> WalletResult<f64> {
        self.try_each("updateBsvExchangeRate", |p| async move { p.update_bsv_exchange_rate().await })
            .await
    }

    async fn get_fiat_exchange_rate(&self, currency: &str, base: &str) -> WalletResult<f64> {
        let currency = currency.to_string();
        let base = base.to_string();
        self.try_each("getFiatExchangeRate", move |p| {
            let currency = currency.clone();
            let base = base.clone();
            async move { p.get_fiat_exchange_rate(&currency, &base).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyProvider {
        name: &'static str,
        fails: AtomicU32,
        height: u32,
    }

    #[async_trait]
    impl ServiceProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn get_height(&self) -> WalletResult<u32> {
            if self.fails.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(WalletError::runtime("simulated outage"));
            }
            Ok(self.height)
        }
        async fn get_header_for_height(&self, _height: u32) -> WalletResult<[u8; 80]> {
            unimplemented!()
        }
        async fn find_header_for_height(&self, _height: u32) -> WalletResult<Option<BlockHeaderInfo>> {
            unimplemented!()
        }
        async fn find_chain_tip_header(&self) -> WalletResult<BlockHeaderInfo> {
            unimplemented!()
        }
        async fn find_chain_tip_hash(&self) -> WalletResult<String> {
            unimplemented!()
        }
        async fn find_header_for_block_hash(&self, _hash: &str) -> WalletResult<Option<BlockHeaderInfo>> {
            unimplemented!()
        }
        async fn get_raw_tx(&self, _txid: &str) -> WalletResult<Option<String>> {
            unimplemented!()
        }
        async fn get_merkle_path_for_transaction(&self, _txid: &str) -> WalletResult<Option<MerkleProofResponse>> {
            unimplemented!()
        }
        async fn is_valid_root_for_height(&self, _root: &str, _height: u32) -> WalletResult<bool> {
            unimplemented!()
        }
        async fn get_utxo_status(&self, _request: UtxoStatusRequest) -> WalletResult<UtxoStatusResponse> {
            unimplemented!()
        }
        async fn get_script_history(&self, _script_hash: &str) -> WalletResult<Vec<ScriptHistoryEntry>> {
            unimplemented!()
        }
        async fn get_transaction_status(&self, _txid: &str) -> WalletResult<TransactionStatusResponse> {
            unimplemented!()
        }
        async fn get_tx_propagation(&self, _txid: &str) -> WalletResult<u32> {
            unimplemented!()
        }
        async fn post_beef(&self, _beef: &[u8], _txids: &[String]) -> WalletResult<PostBeefResult> {
            unimplemented!()
        }
        async fn post_beef_array(&self, _beefs: &[Vec<u8>]) -> WalletResult<Vec<PostBeefResult>> {
            unimplemented!()
        }
        async fn update_bsv_exchange_rate(&self) -> WalletResult<f64> {
            unimplemented!()
        }
        async fn get_fiat_exchange_rate(&self, _currency: &str, _base: &str) -> WalletResult<f64> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_on_error() {
        let always_fails = Arc::new(FlakyProvider {
            name: "always-fails",
            fails: AtomicU32::new(u32::MAX),
            height: 0,
        });
        let eventually_succeeds = Arc::new(FlakyProvider {
            name: "eventually-succeeds",
            fails: AtomicU32::new(0),
            height: 850_000,
        });
        let services = Services::new(vec![always_fails, eventually_succeeds]);
        assert_eq!(services.get_height().await.unwrap(), 850_000);
    }

    #[tokio::test]
    async fn surfaces_last_error_when_every_provider_fails() {
        let p1 = Arc::new(FlakyProvider {
            name: "p1",
            fails: AtomicU32::new(u32::MAX),
            height: 0,
        });
        let p2 = Arc::new(FlakyProvider {
            name: "p2",
            fails: AtomicU32::new(u32::MAX),
            height: 0,
        });
        let services = Services::new(vec![p1, p2]);
        assert!(services.get_height().await.is_err());
    }
}
