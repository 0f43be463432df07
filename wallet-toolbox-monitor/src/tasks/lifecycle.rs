//! The remaining default tasks that round out transaction
//! lifecycle bookkeeping: **CheckNoSends**, **FailAbandoned**,
//! **ReviewStatus**, **UnFail**, and **Purge**.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use wallet_toolbox_common::error::WalletResult;
use wallet_toolbox_storage::provider::StorageProvider;
use wallet_toolbox_storage::TransactionStatus;

use crate::task::{storage_err, MonitorTask, Trigger};

const FAIL_ABANDONED_INTERVAL_MS: i64 = 60_000;
const FAIL_ABANDONED_AGE_MINUTES: i64 = 5;

/// Abandons transactions stuck in `unprocessed`/`unsigned` past the age
/// threshold.
pub struct FailAbandonedTask {
    storage: Arc<dyn StorageProvider>,
    last_run_msecs_since_epoch: AtomicI64,
}

impl FailAbandonedTask {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for FailAbandonedTask {
    fn name(&self) -> &'static str {
        "FailAbandoned"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= FAIL_ABANDONED_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);

        let cutoff = Utc::now() - Duration::minutes(FAIL_ABANDONED_AGE_MINUTES);
        let mut abandoned = 0usize;
        for status in [TransactionStatus::Unprocessed, TransactionStatus::Unsigned] {
            let stale = self.storage.find_transactions_by_status(status, cutoff).await.map_err(storage_err)?;
            for tx in stale {
                self.storage
                    .update_transaction_status(tx.transaction_id, TransactionStatus::Failed)
                    .await
                    .map_err(storage_err)?;
                abandoned += 1;
            }
        }
        Ok(format!("abandoned {abandoned}"))
    }
}

const CHECK_NO_SENDS_INTERVAL_MS: i64 = 60_000;

/// Reports the current population of `nosend` transactions so an operator
/// can see them age; relinquishing a stale no-send change output is an
/// explicit `abort_action`/`relinquish_output` call, not something this
/// task performs on its own.
pub struct CheckNoSendsTask {
    storage: Arc<dyn StorageProvider>,
    last_run_msecs_since_epoch: AtomicI64,
}

impl CheckNoSendsTask {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for CheckNoSendsTask {
    fn name(&self) -> &'static str {
        "CheckNoSends"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= CHECK_NO_SENDS_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);
        let nosend = self
            .storage
            .find_transactions_by_status(TransactionStatus::Nosend, Utc::now())
            .await
            .map_err(storage_err)?;
        Ok(format!("{} transaction(s) currently nosend", nosend.len()))
    }
}

const REVIEW_STATUS_INTERVAL_MS: i64 = 300_000;

/// Periodic audit summary of every non-terminal transaction status, giving
/// an operator (or the MonitorCallHistory task's caller) a single line to
/// eyeball for stuck rows.
pub struct ReviewStatusTask {
    storage: Arc<dyn StorageProvider>,
    last_run_msecs_since_epoch: AtomicI64,
}

impl ReviewStatusTask {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

const NON_TERMINAL_STATUSES: [TransactionStatus; 5] = [
    TransactionStatus::Unprocessed,
    TransactionStatus::Unsigned,
    TransactionStatus::Signed,
    TransactionStatus::Sending,
    TransactionStatus::Unproven,
];

#[async_trait]
impl MonitorTask for ReviewStatusTask {
    fn name(&self) -> &'static str {
        "ReviewStatus"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= REVIEW_STATUS_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);
        let mut counts = Vec::new();
        for status in NON_TERMINAL_STATUSES {
            let rows = self.storage.find_transactions_by_status(status, Utc::now()).await.map_err(storage_err)?;
            counts.push(format!("{}={}", status.as_str(), rows.len()));
        }
        Ok(counts.join(", "))
    }
}

const UN_FAIL_INTERVAL_MS: i64 = 120_000;

/// Reverses a `failed` transaction whose ProvenTx arrived after all
/// (a proof beats an earlier abandonment — FailAbandoned and CheckForProofs
/// can otherwise race on the same row).
pub struct UnFailTask {
    storage: Arc<dyn StorageProvider>,
    last_run_msecs_since_epoch: AtomicI64,
}

impl UnFailTask {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for UnFailTask {
    fn name(&self) -> &'static str {
        "UnFail"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= UN_FAIL_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);

        let failed = self
            .storage
            .find_transactions_by_status(TransactionStatus::Failed, Utc::now())
            .await
            .map_err(storage_err)?;
        let mut unfailed = 0usize;
        for tx in failed {
            let Some(txid) = &tx.txid else { continue };
            if self.storage.find_proven_tx_by_txid(txid).await.map_err(storage_err)?.is_some() {
                self.storage
                    .update_transaction_status(tx.transaction_id, TransactionStatus::Completed)
                    .await
                    .map_err(storage_err)?;
                unfailed += 1;
            }
        }
        Ok(format!("unfailed {unfailed}"))
    }
}

const PURGE_INTERVAL_MS: i64 = 3_600_000;

/// Parametrized over the three terminal statuses (spent/completed/failed age
/// thresholds): `spent` maps to the
/// `Completed` status an outgoing (change-spending) transaction settles
/// into, distinct from `Failed`/`Aborted`.
pub struct PurgeTask {
    storage: Arc<dyn StorageProvider>,
    completed_age: Duration,
    failed_age: Duration,
    last_run_msecs_since_epoch: AtomicI64,
}

impl PurgeTask {
    pub fn new(storage: Arc<dyn StorageProvider>, completed_age: Duration, failed_age: Duration) -> Self {
        Self {
            storage,
            completed_age,
            failed_age,
            last_run_msecs_since_epoch: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl MonitorTask for PurgeTask {
    fn name(&self) -> &'static str {
        "Purge"
    }

    fn trigger(&self, now_msecs_since_epoch: i64) -> Trigger {
        Trigger {
            run: now_msecs_since_epoch - self.last_run_msecs_since_epoch.load(Ordering::SeqCst) >= PURGE_INTERVAL_MS,
        }
    }

    async fn run_task(&self, now_msecs_since_epoch: i64) -> WalletResult<String> {
        self.last_run_msecs_since_epoch.store(now_msecs_since_epoch, Ordering::SeqCst);

        let completed = self
            .storage
            .purge_transactions_older_than(TransactionStatus::Completed, Utc::now() - self.completed_age)
            .await
            .map_err(storage_err)?;
        let failed = self
            .storage
            .purge_transactions_older_than(TransactionStatus::Failed, Utc::now() - self.failed_age)
            .await
            .map_err(storage_err)?;
        let aborted = self
            .storage
            .purge_transactions_older_than(TransactionStatus::Aborted, Utc::now() - self.failed_age)
            .await
            .map_err(storage_err)?;

        Ok(format!("purged {completed} completed, {failed} failed, {aborted} aborted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeStorage;
    use wallet_toolbox_storage::provider::NewTransaction;

    fn tx(status: TransactionStatus, reference: &str) -> NewTransaction {
        NewTransaction {
            user_id: 1,
            status,
            reference: reference.into(),
            is_outgoing: true,
            satoshis: 0,
            version: None,
            lock_time: None,
            description: "test".into(),
            txid: None,
            input_beef: None,
            raw_tx: None,
        }
    }

    #[tokio::test]
    async fn fail_abandoned_marks_stale_unsigned_transactions_failed() {
        let storage = Arc::new(FakeStorage::new());
        let row = storage.insert_transaction(tx(TransactionStatus::Unsigned, "r1")).await.unwrap();
        storage.transactions.lock().unwrap()[0].created_at = Utc::now() - Duration::minutes(10);

        let task = FailAbandonedTask::new(storage.clone());
        let log = task.run_task(0).await.unwrap();
        assert!(log.contains("abandoned 1"));

        let updated = storage.find_transaction(row.transaction_id).await.unwrap().unwrap();
        assert_eq!(updated.status(), TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn un_fail_restores_a_transaction_with_a_late_proof() {
        let storage = Arc::new(FakeStorage::new());
        let mut failed_tx = tx(TransactionStatus::Failed, "r2");
        failed_tx.txid = Some("deadbeef".into());
        let row = storage.insert_transaction(failed_tx).await.unwrap();

        storage
            .update_proven_tx_req_with_new_proven_tx(
                0,
                wallet_toolbox_storage::provider::NewProvenTx {
                    txid: "deadbeef".into(),
                    height: 100,
                    index_in_block: 0,
                    merkle_path: vec![],
                    raw_tx: vec![],
                    block_hash: "bb".repeat(32),
                    merkle_root: "cc".repeat(32),
                },
            )
            .await
            .unwrap();

        let task = UnFailTask::new(storage.clone());
        let log = task.run_task(0).await.unwrap();
        assert!(log.contains("unfailed 1"));

        let updated = storage.find_transaction(row.transaction_id).await.unwrap().unwrap();
        assert_eq!(updated.status(), TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn purge_removes_old_completed_transactions() {
        let storage = Arc::new(FakeStorage::new());
        storage.insert_transaction(tx(TransactionStatus::Completed, "r3")).await.unwrap();
        storage.transactions.lock().unwrap()[0].created_at = Utc::now() - Duration::days(365);

        let task = PurgeTask::new(storage.clone(), Duration::days(30), Duration::days(30));
        let log = task.run_task(0).await.unwrap();
        assert!(log.contains("purged 1 completed"));
        assert!(storage.find_transactions_by_status(TransactionStatus::Completed, Utc::now()).await.unwrap().is_empty());
    }
}
