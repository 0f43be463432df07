//! **MonitorCallHistory**, **SyncWhenIdle**, **NewHeader**, and **Reorg**
//!: periodic bookkeeping tasks that don't touch individual
//! transactions.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wallet_toolbox_common::error::WalletResult;
use wallet_toolbox_services::ServiceProvider;

use crate::retry_queue::ReorgRetryQueue;
use crate::task::{MonitorTask, Trigger};

const MONITOR_CALL_HISTORY_INTERVAL_MS: i64 = 300_000;

/// Counts how many times this task itself has been asked to run, as a
/// coarse measure of how long the monitor loop has been alive and ticking.
pub struct MonitorCallHistoryTask {
    last_run_msecs_since_epoch: AtomicI64,
    total_runs: AtomicU64,
}

impl Default for MonitorCallHistoryTask {
    fn default() -> Self {
        Self {
            last_run_msecs_since_epoch: AtomicI64::new(0),
            total_runs: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for MonitorCallHistoryTask {
    fn name(&self) -> &'static str {
        "MonitorCallHistory"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst)
                >= MONITOR_CALL_HISTORY_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);
        let total = self.total_runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("monitor has completed {total} review cycle(s)"))
    }
}

const SYNC_WHEN_IDLE_INTERVAL_MS: i64 = 3_600_000;

/// Refreshes the BSV/fiat exchange rate cache. Named `SyncWhenIdle` because
/// the upstream task this is generalized from deferred outbound sync work
/// to a tick with no broadcast in flight; here it simply runs on its own
/// long interval, since cross-task idleness isn't observable through the
/// single-task `MonitorTask` contract.
pub struct SyncWhenIdleTask {
    services: Arc<dyn ServiceProvider>,
    last_run_msecs_since_epoch: AtomicI64,
}

impl SyncWhenIdleTask {
    pub fn new(services: Arc<dyn ServiceProvider>) -> Self {
        Self {
            services,
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for SyncWhenIdleTask {
    fn name(&self) -> &'static str {
        "SyncWhenIdle"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= SYNC_WHEN_IDLE_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);
        let rate = self.services.update_bsv_exchange_rate().await?;
        Ok(format!("bsv exchange rate refreshed to {rate}"))
    }
}

const NEW_HEADER_INTERVAL_MS: i64 = 30_000;

/// Watches for the chain tip advancing and records the new height; a
/// distinct height with the expected predecessor is an ordinary extension,
/// while [`ReorgTask`] separately watches for the tip *hash* changing at an
/// already-seen height.
pub struct NewHeaderTask {
    services: Arc<dyn ServiceProvider>,
    last_seen_height: AtomicI64,
    last_run_msecs_since_epoch: AtomicI64,
}

impl NewHeaderTask {
    pub fn new(services: Arc<dyn ServiceProvider>) -> Self {
        Self {
            services,
            last_seen_height: AtomicI64::new(-1),
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for NewHeaderTask {
    fn name(&self) -> &'static str {
        "NewHeader"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= NEW_HEADER_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);
        let height = self.services.get_height().await? as i64;
        let previous = self.last_seen_height.swap(height, Ordering::SeqCst);
        if previous < 0 {
            Ok(format!("observed initial chain tip at height {height}"))
        } else if height > previous {
            Ok(format!("chain tip advanced from {previous} to {height}"))
        } else {
            Ok(format!("chain tip unchanged at height {height}"))
        }
    }
}

const REORG_INTERVAL_MS: i64 = 30_000;

/// Detects the chain tip's hash changing at a height this task has already
/// observed, and pushes the deactivated header into `queue` for the proof
/// tasks to re-verify affected transactions.
pub struct ReorgTask {
    services: Arc<dyn ServiceProvider>,
    queue: Arc<Mutex<ReorgRetryQueue>>,
    last_seen: Mutex<Option<(u32, String)>>,
    last_run_msecs_since_epoch: AtomicI64,
}

impl ReorgTask {
    pub fn new(services: Arc<dyn ServiceProvider>, queue: Arc<Mutex<ReorgRetryQueue>>) -> Self {
        Self {
            services,
            queue,
            last_seen: Mutex::new(None),
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for ReorgTask {
    fn name(&self) -> &'static str {
        "Reorg"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= REORG_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);
        let header = self.services.find_chain_tip_header().await?;

        let mut last_seen = self.last_seen.lock().unwrap();
        let reorged = match &*last_seen {
            Some((height, hash)) if *height == header.height && *hash != header.hash => true,
            _ => false,
        };

        if reorged {
            let deactivated = last_seen.clone().expect("reorged implies a prior observation");
            self.queue.lock().unwrap().push_deactivated(
                now_msecs_since_epoch,
                wallet_toolbox_services::BlockHeaderInfo {
                    hash: deactivated.1,
                    height: deactivated.0,
                    version: header.version,
                    previous_hash: header.previous_hash.clone(),
                    merkle_root: header.merkle_root.clone(),
                    time: header.time,
                    bits: header.bits,
                    nonce: header.nonce,
                },
            );
        }
        *last_seen = Some((header.height, header.hash.clone()));

        Ok(if reorged {
            format!("reorg detected at height {}", header.height)
        } else {
            format!("no reorg, tip at height {}", header.height)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as at;
    use wallet_toolbox_services::{
        BlockHeaderInfo, MerkleProofResponse, PostBeefResult, ScriptHistoryEntry, TransactionStatusResponse,
        UtxoStatusRequest, UtxoStatusResponse,
    };

    struct ScriptedChain {
        headers: Mutex<Vec<BlockHeaderInfo>>,
    }

    #[at]
    impl ServiceProvider for ScriptedChain {
        fn name(&self) -> &'static str {
            "scripted"
        }
        async fn get_height(&self) -> WalletResult<u32> {
            Ok(self.headers.lock().unwrap().last().unwrap().height)
        }
        async fn get_header_for_height(&self, _height: u32) -> WalletResult<[u8; 80]> {
            unimplemented!()
        }
        async fn find_header_for_height(&self, _height: u32) -> WalletResult<Option<BlockHeaderInfo>> {
            unimplemented!()
        }
        async fn find_chain_tip_header(&self) -> WalletResult<BlockHeaderInfo> {
            let mut headers = self.headers.lock().unwrap();
            if headers.len() > 1 {
                Ok(headers.remove(0))
            } else {
                Ok(headers[0].clone())
            }
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

    fn header(height: u32, hash: &str) -> BlockHeaderInfo {
        BlockHeaderInfo {
            hash: hash.to_string(),
            height,
            version: 1,
            previous_hash: "00".repeat(32),
            merkle_root: "11".repeat(32),
            time: 0,
            bits: 0,
            nonce: 0,
        }
    }

    #[tokio::test]
    async fn detects_a_hash_change_at_the_same_height() {
        let chain = Arc::new(ScriptedChain {
            headers: Mutex::new(vec![header(100, "b-hash"), header(100, "a-hash")]),
        });
        let queue = Arc::new(Mutex::new(ReorgRetryQueue::new()));
        let task = ReorgTask::new(chain, queue.clone());

        let first = task.run_task(0).await.unwrap();
        assert!(first.contains("no reorg"));
        let second = task.run_task(1000).await.unwrap();
        assert!(second.contains("reorg detected"));
        assert_eq!(queue.lock().unwrap().len(), 1);
    }
}
