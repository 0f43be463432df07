//! **SendWaiting**: finds transactions in
//! `signed`, fetches their BEEF, broadcasts via Services, and on `accepted`
//! flips the row to `broadcasted`.
//!
//! The spec's transaction-status vocabulary doesn't carry a distinct
//! `broadcasted` state (`TransactionStatus` tops out at `Unproven` before
//! `Completed`); this task advances a newly broadcast transaction to
//! `Unproven`, where CheckForProofs picks it up.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use wallet_toolbox_common::error::WalletResult;
use wallet_toolbox_common::hash::Txid;
use wallet_toolbox_services::ServiceProvider;
use wallet_toolbox_storage::provider::StorageProvider;
use wallet_toolbox_storage::TransactionStatus;

use crate::task::{storage_err, MonitorTask, Trigger};

const INTERVAL_MS: i64 = 8_000;
const MIN_AGE_SECONDS: i64 = 7;

pub struct SendWaitingTask {
    storage: Arc<dyn StorageProvider>,
    services: Arc<dyn ServiceProvider>,
    last_run_msecs_since_epoch: AtomicI64,
}

impl SendWaitingTask {
    pub fn new(storage: Arc<dyn StorageProvider>, services: Arc<dyn ServiceProvider>) -> Self {
        Self {
            storage,
            services,
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for SendWaitingTask {
    fn name(&self) -> &'static str {
        "SendWaiting"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);

        let cutoff = Utc::now() - Duration::seconds(MIN_AGE_SECONDS);
        let candidates = self
            .storage
            .find_transactions_by_status(TransactionStatus::Signed, cutoff)
            .await
            .map_err(storage_err)?;

        let mut broadcast = 0usize;
        let mut retried = 0usize;
        for tx in candidates {
            let Some(raw_tx) = tx.raw_tx.clone() else { continue };
            let txid = Txid::from_raw_tx(&raw_tx).to_hex();

            match self.services.post_beef(&raw_tx, &[txid.clone()]).await {
                Ok(result) if !result.status.is_double_spend() => {
                    self.storage
                        .update_transaction_status(tx.transaction_id, TransactionStatus::Unproven)
                        .await
                        .map_err(storage_err)?;
                    broadcast += 1;
                }
                _ => {
                    retried += 1;
                }
            }
        }

        Ok(format!("broadcast {broadcast}, left for retry {retried}"))
    }
}
