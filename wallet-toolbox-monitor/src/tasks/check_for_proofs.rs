//! **CheckForProofs**: for each
//! ProvenTxReq in {callback, unmined, sending, unknown, unconfirmed}, fetch
//! the merkle path from Services; validate that the computed root equals
//! the header's merkle root at `height <= chain_tip - safety`; on success,
//! insert a ProvenTx and call `update_proven_tx_req_with_new_proven_tx` to
//! mark the req `completed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wallet_toolbox_common::beef::MerklePath;
use wallet_toolbox_common::error::WalletResult;
use wallet_toolbox_common::hash::Txid;
use wallet_toolbox_services::ServiceProvider;
use wallet_toolbox_std::backoff;
use wallet_toolbox_storage::provider::{NewProvenTx, StorageProvider};

use crate::task::{storage_err, MonitorTask, Trigger};

const INTERVAL_MS: i64 = 60_000;

/// Minimum number of confirmations a header must clear the chain tip by
/// before its merkle root is trusted (defends against the tip header being
/// reorged out from under an in-flight proof check).
pub const CONFIRMATION_SAFETY: u32 = 2;

/// Initial per-request backoff; doubles (capped) on every miss so a request
/// that's nowhere near proven stops being re-polled every tick. Exposed as a
/// constructor parameter rather than hard-coded, per request still-waiting
/// reqs back off independently of each other.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 60_000;

/// In-memory per-`proven_tx_req_id` retry state: how many consecutive misses
/// and the earliest `now_msecs_since_epoch` at which the next attempt may
/// run. Deliberately not persisted — a process restart just resets the
/// backoff to its initial wait, which is harmless.
#[derive(Default)]
struct RetryState {
    misses: HashMap<i64, (u32, i64)>,
}

pub struct CheckForProofsTask {
    storage: Arc<dyn StorageProvider>,
    services: Arc<dyn ServiceProvider>,
    last_run_msecs_since_epoch: AtomicI64,
    initial_backoff_ms: u64,
    retry_state: Mutex<RetryState>,
}

impl CheckForProofsTask {
    pub fn new(storage: Arc<dyn StorageProvider>, services: Arc<dyn ServiceProvider>) -> Self {
        Self::with_initial_backoff_ms(storage, services, DEFAULT_INITIAL_BACKOFF_MS)
    }

    pub fn with_initial_backoff_ms(
        storage: Arc<dyn StorageProvider>,
        services: Arc<dyn ServiceProvider>,
        initial_backoff_ms: u64,
    ) -> Self {
        Self {
            storage,
            services,
            last_run_msecs_since_epoch: AtomicI64::new(0),
            initial_backoff_ms,
            retry_state: Mutex::new(RetryState::default()),
        }
    }

    /// Whether `proven_tx_req_id` is still within its backoff window at
    /// `now_msecs_since_epoch`.
    fn is_backing_off(&self, proven_tx_req_id: i64, now_msecs_since_epoch: i64) -> bool {
        let state = self.retry_state.lock().expect("retry_state mutex poisoned");
        matches!(state.misses.get(&proven_tx_req_id), Some((_, next_allowed)) if now_msecs_since_epoch < *next_allowed)
    }

    /// Records a miss and schedules the next allowed attempt using
    /// exponential backoff seeded by `initial_backoff_ms`.
    fn record_miss(&self, proven_tx_req_id: i64, now_msecs_since_epoch: i64) {
        let mut state = self.retry_state.lock().expect("retry_state mutex poisoned");
        let entry = state.misses.entry(proven_tx_req_id).or_insert((0, now_msecs_since_epoch));
        let delay = backoff::iter_with_initial_wait_ms(self.initial_backoff_ms)
            .nth(entry.0 as usize)
            .expect("backoff iterator is infinite");
        entry.0 = entry.0.saturating_add(1);
        entry.1 = now_msecs_since_epoch + delay.as_millis() as i64;
    }

    /// Drops retry bookkeeping once a request resolves (proven or removed).
    fn clear_retry_state(&self, proven_tx_req_id: i64) {
        let mut state = self.retry_state.lock().expect("retry_state mutex poisoned");
        state.misses.remove(&proven_tx_req_id);
    }
}

#[async_trait]
impl MonitorTask for CheckForProofsTask {
    fn name(&self) -> &'static str {
        "CheckForProofs"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);

        let chain_tip = self.services.get_height().await?;
        let reqs = self.storage.find_proven_tx_reqs_awaiting_proof().await.map_err(storage_err)?;

        let mut completed = 0usize;
        let mut still_waiting = 0usize;
        let mut backing_off = 0usize;
        for req in reqs {
            if self.is_backing_off(req.proven_tx_req_id, now_msecs_since_epoch) {
                backing_off += 1;
                continue;
            }

            let Some(response) = self.services.get_merkle_path_for_transaction(&req.txid).await? else {
                self.storage.increment_proven_tx_req_attempts(req.proven_tx_req_id).await.map_err(storage_err)?;
                self.record_miss(req.proven_tx_req_id, now_msecs_since_epoch);
                still_waiting += 1;
                continue;
            };
            if response.header.height > chain_tip.saturating_sub(CONFIRMATION_SAFETY) {
                self.storage.increment_proven_tx_req_attempts(req.proven_tx_req_id).await.map_err(storage_err)?;
                self.record_miss(req.proven_tx_req_id, now_msecs_since_epoch);
                still_waiting += 1;
                continue;
            }

            let merkle_path = MerklePath::from_bytes(&response.merkle_path)?;
            let txid = Txid::from_hex(&req.txid)
                .map_err(|e| wallet_toolbox_common::error::WalletError::runtime(format!("malformed txid: {e}")))?;
            let computed_root = merkle_path.compute_root(&txid);
            let expected_root = hex::decode(&response.header.merkle_root)
                .map_err(|e| wallet_toolbox_common::error::WalletError::runtime(format!("malformed merkle root: {e}")))?;

            let mut computed_root_reversed = computed_root;
            computed_root_reversed.reverse();
            if computed_root_reversed.as_slice() != expected_root.as_slice() {
                self.storage.increment_proven_tx_req_attempts(req.proven_tx_req_id).await.map_err(storage_err)?;
                self.record_miss(req.proven_tx_req_id, now_msecs_since_epoch);
                still_waiting += 1;
                continue;
            }

            self.clear_retry_state(req.proven_tx_req_id);
            self.storage
                .update_proven_tx_req_with_new_proven_tx(
                    req.proven_tx_req_id,
                    NewProvenTx {
                        txid: req.txid.clone(),
                        height: response.header.height as i64,
                        index_in_block: merkle_path.leaf_offset as i64,
                        merkle_path: response.merkle_path,
                        raw_tx: req.raw_tx.clone(),
                        block_hash: response.header.hash.clone(),
                        merkle_root: response.header.merkle_root.clone(),
                    },
                )
                .await
                .map_err(storage_err)?;
            completed += 1;
        }

        Ok(format!(
            "completed {completed}, still waiting {still_waiting}, backing off {backing_off}"
        ))
    }
}
