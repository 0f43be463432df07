//! An in-memory [`StorageProvider`] double used only by this crate's unit
//! tests. Methods the monitor tasks never call are left `unimplemented!()`.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use wallet_toolbox_storage::error::StorageResult;
use wallet_toolbox_storage::models::*;
use wallet_toolbox_storage::provider::{
    CertificateQuery, MergeOutputUpdate, NewCertificate, NewCertificateField, NewOutput, NewProvenTx, NewProvenTxReq,
    NewTransaction, OutputQuery, StorageProvider,
};

#[derive(Default)]
pub(crate) struct FakeStorage {
    pub transactions: Mutex<Vec<Transaction>>,
    pub proven_tx_reqs: Mutex<Vec<ProvenTxReq>>,
    pub proven_txs: Mutex<Vec<ProvenTx>>,
    pub monitor_events: Mutex<Vec<(String, String, Option<String>)>>,
    pub next_id: Mutex<i64>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }
}

#[async_trait]
impl StorageProvider for FakeStorage {
    async fn find_or_insert_user(&self, _identity_key: &str) -> StorageResult<User> {
        unimplemented!()
    }
    async fn find_user_by_identity_key(&self, _identity_key: &str) -> StorageResult<Option<User>> {
        unimplemented!()
    }
    async fn find_or_insert_default_basket(&self, _user_id: i64) -> StorageResult<OutputBasket> {
        unimplemented!()
    }
    async fn find_or_insert_basket(&self, _user_id: i64, _name: &str) -> StorageResult<OutputBasket> {
        unimplemented!()
    }
    async fn find_basket_by_name(&self, _user_id: i64, _name: &str) -> StorageResult<Option<OutputBasket>> {
        unimplemented!()
    }
    async fn set_wallet_change_params(&self, _user_id: i64, _n: i64, _m: i64) -> StorageResult<()> {
        unimplemented!()
    }
    async fn find_or_insert_tx_label(&self, _user_id: i64, _label: &str) -> StorageResult<TxLabel> {
        unimplemented!()
    }
    async fn find_or_insert_output_tag(&self, _user_id: i64, _tag: &str) -> StorageResult<OutputTag> {
        unimplemented!()
    }
    async fn map_tx_label(&self, _tx_label_id: i64, _transaction_id: i64) -> StorageResult<()> {
        unimplemented!()
    }
    async fn map_output_tag(&self, _output_tag_id: i64, _output_id: i64) -> StorageResult<()> {
        unimplemented!()
    }
    async fn insert_transaction(&self, tx: NewTransaction) -> StorageResult<Transaction> {
        let transaction_id = self.alloc_id();
        let now = Utc::now();
        let row = Transaction {
            transaction_id,
            user_id: tx.user_id,
            proven_tx_id: None,
            status: tx.status.as_str().to_string(),
            reference: tx.reference,
            is_outgoing: tx.is_outgoing,
            satoshis: tx.satoshis,
            version: tx.version,
            lock_time: tx.lock_time,
            description: tx.description,
            txid: tx.txid,
            input_beef: tx.input_beef,
            raw_tx: tx.raw_tx,
            created_at: now,
            updated_at: now,
        };
        self.transactions.lock().unwrap().push(row.clone());
        Ok(row)
    }
    async fn find_transaction_by_reference(&self, reference: &str) -> StorageResult<Option<Transaction>> {
        Ok(self.transactions.lock().unwrap().iter().find(|t| t.reference == reference).cloned())
    }
    async fn find_transaction_by_txid(&self, _user_id: i64, txid: &str) -> StorageResult<Option<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.txid.as_deref() == Some(txid))
            .cloned())
    }
    async fn find_transaction(&self, transaction_id: i64) -> StorageResult<Option<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.transaction_id == transaction_id)
            .cloned())
    }
    async fn find_transactions(
        &self,
        query: wallet_toolbox_storage::provider::TransactionQuery,
    ) -> StorageResult<(Vec<Transaction>, i64)> {
        let all: Vec<Transaction> = self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| query.reference.is_none() || t.reference == *query.reference.as_ref().unwrap())
            .cloned()
            .collect();
        let total = all.len() as i64;
        Ok((all, total))
    }
    async fn find_transactions_by_status(
        &self,
        status: TransactionStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.status() == status && t.created_at <= older_than)
            .cloned()
            .collect())
    }
    async fn purge_transactions_older_than(
        &self,
        status: TransactionStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<u64> {
        let mut transactions = self.transactions.lock().unwrap();
        let before = transactions.len();
        transactions.retain(|t| !(t.status() == status && t.created_at <= older_than));
        Ok((before - transactions.len()) as u64)
    }
    async fn update_transaction_status(&self, transaction_id: i64, status: TransactionStatus) -> StorageResult<()> {
        let mut transactions = self.transactions.lock().unwrap();
        if let Some(tx) = transactions.iter_mut().find(|t| t.transaction_id == transaction_id) {
            tx.status = status.as_str().to_string();
        }
        Ok(())
    }
    async fn update_transaction_signed(&self, _transaction_id: i64, _raw_tx: &[u8], _txid: &str) -> StorageResult<()> {
        unimplemented!()
    }
    async fn insert_output(&self, _output: NewOutput) -> StorageResult<Output> {
        unimplemented!()
    }
    async fn find_output(&self, _transaction_id: i64, _vout: i64) -> StorageResult<Option<Output>> {
        unimplemented!()
    }
    async fn find_outputs_raw(&self, _query: OutputQuery) -> StorageResult<(Vec<Output>, i64)> {
        unimplemented!()
    }
    async fn find_output_by_txid_vout(&self, _user_id: i64, _txid: &str, _vout: i64) -> StorageResult<Option<Output>> {
        unimplemented!()
    }
    async fn update_output_spendable(&self, _output_id: i64, _spendable: bool) -> StorageResult<()> {
        unimplemented!()
    }
    async fn mark_output_spent(&self, _output_id: i64, _spent_by: i64) -> StorageResult<()> {
        unimplemented!()
    }
    async fn tags_for_output(&self, _output_id: i64) -> StorageResult<Vec<String>> {
        unimplemented!()
    }
    async fn labels_for_transaction(&self, _transaction_id: i64) -> StorageResult<Vec<String>> {
        unimplemented!()
    }
    async fn insert_proven_tx_req(&self, req: NewProvenTxReq) -> StorageResult<ProvenTxReq> {
        let proven_tx_req_id = self.alloc_id();
        let row = ProvenTxReq {
            proven_tx_req_id,
            proven_tx_id: None,
            status: req.status.as_str().to_string(),
            attempts: 0,
            notified: false,
            txid: req.txid,
            batch: None,
            history: String::new(),
            notify: String::new(),
            raw_tx: req.raw_tx,
            input_beef: req.input_beef,
        };
        self.proven_tx_reqs.lock().unwrap().push(row.clone());
        Ok(row)
    }
    async fn find_proven_tx_req_by_txid(&self, txid: &str) -> StorageResult<Option<ProvenTxReq>> {
        Ok(self.proven_tx_reqs.lock().unwrap().iter().find(|r| r.txid == txid).cloned())
    }
    async fn find_proven_tx_reqs_awaiting_proof(&self) -> StorageResult<Vec<ProvenTxReq>> {
        Ok(self
            .proven_tx_reqs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| ProvenTxReqStatus::awaiting_proof().contains(&r.status()))
            .cloned()
            .collect())
    }
    async fn update_proven_tx_req_status(&self, proven_tx_req_id: i64, status: ProvenTxReqStatus) -> StorageResult<()> {
        let mut reqs = self.proven_tx_reqs.lock().unwrap();
        if let Some(req) = reqs.iter_mut().find(|r| r.proven_tx_req_id == proven_tx_req_id) {
            req.status = status.as_str().to_string();
        }
        Ok(())
    }
    async fn increment_proven_tx_req_attempts(&self, proven_tx_req_id: i64) -> StorageResult<()> {
        let mut reqs = self.proven_tx_reqs.lock().unwrap();
        if let Some(req) = reqs.iter_mut().find(|r| r.proven_tx_req_id == proven_tx_req_id) {
            req.attempts += 1;
        }
        Ok(())
    }
    async fn update_proven_tx_req_with_new_proven_tx(
        &self,
        proven_tx_req_id: i64,
        proven_tx: NewProvenTx,
    ) -> StorageResult<ProvenTx> {
        let mut proven_txs = self.proven_txs.lock().unwrap();
        if let Some(existing) = proven_txs.iter().find(|p| p.txid == proven_tx.txid) {
            return Ok(existing.clone());
        }
        let proven_tx_id = self.alloc_id();
        let row = ProvenTx {
            proven_tx_id,
            txid: proven_tx.txid,
            height: proven_tx.height,
            index_in_block: proven_tx.index_in_block,
            merkle_path: proven_tx.merkle_path,
            raw_tx: proven_tx.raw_tx,
            block_hash: proven_tx.block_hash,
            merkle_root: proven_tx.merkle_root,
        };
        proven_txs.push(row.clone());
        drop(proven_txs);

        let mut reqs = self.proven_tx_reqs.lock().unwrap();
        if let Some(req) = reqs.iter_mut().find(|r| r.proven_tx_req_id == proven_tx_req_id) {
            req.proven_tx_id = Some(proven_tx_id);
            req.status = ProvenTxReqStatus::Completed.as_str().to_string();
        }
        Ok(row)
    }
    async fn find_proven_tx_by_txid(&self, txid: &str) -> StorageResult<Option<ProvenTx>> {
        Ok(self.proven_txs.lock().unwrap().iter().find(|p| p.txid == txid).cloned())
    }
    async fn ensure_settings(&self, settings: Settings) -> StorageResult<Settings> {
        Ok(settings)
    }
    async fn get_settings(&self) -> StorageResult<Settings> {
        unimplemented!()
    }
    async fn insert_monitor_event(&self, task: &str, event: &str, details: Option<&str>) -> StorageResult<()> {
        self.monitor_events
            .lock()
            .unwrap()
            .push((task.to_string(), event.to_string(), details.map(|s| s.to_string())));
        Ok(())
    }
    async fn abort_action(&self, _reference: &str) -> StorageResult<u64> {
        unimplemented!()
    }
    async fn destroy(&self) -> StorageResult<()> {
        unimplemented!()
    }
    async fn update_output_for_merge(&self, _update: MergeOutputUpdate) -> StorageResult<()> {
        unimplemented!()
    }
    async fn add_to_transaction_satoshis(&self, _transaction_id: i64, _delta: i64) -> StorageResult<()> {
        unimplemented!()
    }
    async fn insert_certificate(&self, _cert: NewCertificate) -> StorageResult<Certificate> {
        unimplemented!()
    }
    async fn insert_certificate_field(&self, _field: NewCertificateField) -> StorageResult<()> {
        unimplemented!()
    }
    async fn find_certificate(&self, _certificate_id: i64) -> StorageResult<Option<Certificate>> {
        unimplemented!()
    }
    async fn find_certificates(&self, _query: CertificateQuery) -> StorageResult<(Vec<Certificate>, i64)> {
        unimplemented!()
    }
    async fn certificate_fields(&self, _certificate_id: i64) -> StorageResult<Vec<CertificateField>> {
        unimplemented!()
    }
    async fn relinquish_certificate(&self, _certificate_id: i64) -> StorageResult<()> {
        unimplemented!()
    }
}
