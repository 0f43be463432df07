//! Storage Client: remotes a [`StorageProvider`] over a
//! JSON-RPC-shaped HTTP transport. The concrete authenticated-HTTP (BRC-104)
//! handshake and 402-payment handling are delegated to the transport layer
//!; this crate owns request framing, sequential request-id
//! correlation, and mapping RPC errors back onto [`StorageError`].

pub mod error;
pub mod rpc;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use wallet_toolbox_storage::provider::{
    CertificateQuery, MergeOutputUpdate, NewCertificate, NewCertificateField, NewOutput,
    NewProvenTx, NewProvenTxReq, NewTransaction, OutputQuery, StorageProvider,
};
use wallet_toolbox_storage::{
    Certificate, CertificateField, Output, OutputBasket, OutputTag, ProvenTx, ProvenTxReq,
    ProvenTxReqStatus, Settings, StorageError, StorageResult, Transaction, TransactionStatus,
    TxLabel, User,
};

use crate::error::ClientError;
use crate::rpc::{RpcRequest, RpcResponse};

/// A remote [`StorageProvider`] reached over HTTP using the JSON-RPC 2.0
/// envelope this transport speaks. `base_url` should already include any path
/// prefix; authentication headers are the transport's concern and are
/// attached by `http_client` (e.g. via a `reqwest::ClientBuilder` default
/// header or middleware configured by the caller).
pub struct StorageClient {
    http_client: reqwest::Client,
    base_url: String,
    next_id: AtomicU64,
    seen_ids: Mutex<std::collections::HashSet<u64>>,
}

impl StorageClient {
    pub fn new(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            next_id: AtomicU64::new(1),
            seen_ids: Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn next_request_id(&self) -> Result<u64, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if !self.seen_ids.lock().unwrap().insert(id) {
            return Err(ClientError::DuplicateRequestId(id));
        }
        Ok(id)
    }

    async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> StorageResult<R> {
        self.call_inner(method, params).await.map_err(StorageError::from)
    }

    async fn call_inner<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R, ClientError> {
        let id = self.next_request_id()?;
        let req = RpcRequest::new(id, method, serde_json::to_value(params)?);
        let http_resp = self
            .http_client
            .post(&self.base_url)
            .json(&req)
            .send()
            .await?;
        let resp: RpcResponse = http_resp.json().await.map_err(ClientError::Transport)?;
        if resp.id != id {
            return Err(ClientError::Rpc {
                code: rpc::INVALID_REQUEST,
                message: format!("response id {} did not match request id {id}", resp.id),
            });
        }
        if let Some(err) = resp.error {
            return Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = resp.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(ClientError::Malformed)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Malformed(e)
    }
}

#[async_trait]
impl StorageProvider for StorageClient {
    async fn find_or_insert_user(&self, identity_key: &str) -> StorageResult<User> {
        self.call("findOrInsertUser", json!([identity_key])).await
    }

    async fn find_user_by_identity_key(&self, identity_key: &str) -> StorageResult<Option<User>> {
        self.call("findUserByIdentityKey", json!([identity_key])).await
    }

    async fn find_or_insert_default_basket(&self, user_id: i64) -> StorageResult<OutputBasket> {
        self.call("findOrInsertDefaultBasket", json!([user_id])).await
    }

    async fn find_or_insert_basket(&self, user_id: i64, name: &str) -> StorageResult<OutputBasket> {
        self.call("findOrInsertBasket", json!([user_id, name])).await
    }

    async fn find_basket_by_name(&self, user_id: i64, name: &str) -> StorageResult<Option<OutputBasket>> {
        self.call("findBasketByName", json!([user_id, name])).await
    }

    async fn set_wallet_change_params(
        &self,
        user_id: i64,
        number_of_desired_utxos: i64,
        minimum_desired_utxo_value: i64,
    ) -> StorageResult<()> {
        self.call(
            "setWalletChangeParams",
            json!([user_id, number_of_desired_utxos, minimum_desired_utxo_value]),
        )
        .await
    }

    async fn find_or_insert_tx_label(&self, user_id: i64, label: &str) -> StorageResult<TxLabel> {
        self.call("findOrInsertTxLabel", json!([user_id, label])).await
    }

    async fn find_or_insert_output_tag(&self, user_id: i64, tag: &str) -> StorageResult<OutputTag> {
        self.call("findOrInsertOutputTag", json!([user_id, tag])).await
    }

    async fn map_tx_label(&self, tx_label_id: i64, transaction_id: i64) -> StorageResult<()> {
        self.call("mapTxLabel", json!([tx_label_id, transaction_id])).await
    }

    async fn map_output_tag(&self, output_tag_id: i64, output_id: i64) -> StorageResult<()> {
        self.call("mapOutputTag", json!([output_tag_id, output_id])).await
    }

    async fn insert_transaction(&self, tx: NewTransaction) -> StorageResult<Transaction> {
        self.call("insertTransaction", json!([tx])).await
    }

    async fn find_transaction_by_reference(&self, reference: &str) -> StorageResult<Option<Transaction>> {
        self.call("findTransactionByReference", json!([reference])).await
    }

    async fn find_transaction_by_txid(&self, user_id: i64, txid: &str) -> StorageResult<Option<Transaction>> {
        self.call("findTransactionByTxid", json!([user_id, txid])).await
    }

    async fn find_transaction(&self, transaction_id: i64) -> StorageResult<Option<Transaction>> {
        self.call("findTransaction", json!([transaction_id])).await
    }

    async fn find_transactions(
        &self,
        query: wallet_toolbox_storage::provider::TransactionQuery,
    ) -> StorageResult<(Vec<Transaction>, i64)> {
        self.call("listActions", json!([query])).await
    }

    async fn find_transactions_by_status(
        &self,
        status: TransactionStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<Vec<Transaction>> {
        self.call("findTransactionsByStatus", json!([status, older_than])).await
    }

    async fn purge_transactions_older_than(
        &self,
        status: TransactionStatus,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> StorageResult<u64> {
        self.call("purgeTransactionsOlderThan", json!([status, older_than])).await
    }

    async fn update_transaction_status(&self, transaction_id: i64, status: TransactionStatus) -> StorageResult<()> {
        self.call("updateTransactionStatus", json!([transaction_id, status])).await
    }

    async fn update_transaction_signed(&self, transaction_id: i64, raw_tx: &[u8], txid: &str) -> StorageResult<()> {
        self.call("updateTransactionSigned", json!([transaction_id, raw_tx, txid])).await
    }

    async fn insert_output(&self, output: NewOutput) -> StorageResult<Output> {
        self.call("insertOutput", json!([output])).await
    }

    async fn find_output(&self, transaction_id: i64, vout: i64) -> StorageResult<Option<Output>> {
        self.call("findOutput", json!([transaction_id, vout])).await
    }

    async fn find_outputs_raw(&self, query: OutputQuery) -> StorageResult<(Vec<Output>, i64)> {
        self.call("listOutputs", json!([query])).await
    }

    async fn find_output_by_txid_vout(&self, user_id: i64, txid: &str, vout: i64) -> StorageResult<Option<Output>> {
        self.call("findOutputByTxidVout", json!([user_id, txid, vout])).await
    }

    async fn update_output_spendable(&self, output_id: i64, spendable: bool) -> StorageResult<()> {
        self.call("updateOutputSpendable", json!([output_id, spendable])).await
    }

    async fn mark_output_spent(&self, output_id: i64, spent_by: i64) -> StorageResult<()> {
        self.call("markOutputSpent", json!([output_id, spent_by])).await
    }

    async fn tags_for_output(&self, output_id: i64) -> StorageResult<Vec<String>> {
        self.call("tagsForOutput", json!([output_id])).await
    }

    async fn labels_for_transaction(&self, transaction_id: i64) -> StorageResult<Vec<String>> {
        self.call("labelsForTransaction", json!([transaction_id])).await
    }

    async fn insert_proven_tx_req(&self, req: NewProvenTxReq) -> StorageResult<ProvenTxReq> {
        self.call("insertProvenTxReq", json!([req])).await
    }

    async fn find_proven_tx_req_by_txid(&self, txid: &str) -> StorageResult<Option<ProvenTxReq>> {
        self.call("findProvenTxReqByTxid", json!([txid])).await
    }

    async fn find_proven_tx_reqs_awaiting_proof(&self) -> StorageResult<Vec<ProvenTxReq>> {
        self.call("findProvenTxReqsAwaitingProof", json!([])).await
    }

    async fn update_proven_tx_req_status(&self, proven_tx_req_id: i64, status: ProvenTxReqStatus) -> StorageResult<()> {
        self.call("updateProvenTxReqStatus", json!([proven_tx_req_id, status])).await
    }

    async fn increment_proven_tx_req_attempts(&self, proven_tx_req_id: i64) -> StorageResult<()> {
        self.call("incrementProvenTxReqAttempts", json!([proven_tx_req_id])).await
    }

    async fn update_proven_tx_req_with_new_proven_tx(
        &self,
        proven_tx_req_id: i64,
        proven_tx: NewProvenTx,
    ) -> StorageResult<ProvenTx> {
        self.call("updateProvenTxReqWithNewProvenTx", json!([proven_tx_req_id, proven_tx])).await
    }

    async fn find_proven_tx_by_txid(&self, txid: &str) -> StorageResult<Option<ProvenTx>> {
        self.call("findProvenTxByTxid", json!([txid])).await
    }

    async fn ensure_settings(&self, settings: Settings) -> StorageResult<Settings> {
        self.call("ensureSettings", json!([settings])).await
    }

    async fn get_settings(&self) -> StorageResult<Settings> {
        self.call("getSettings", json!([])).await
    }

    async fn insert_monitor_event(&self, task: &str, event: &str, details: Option<&str>) -> StorageResult<()> {
        self.call("insertMonitorEvent", json!([task, event, details])).await
    }

    async fn abort_action(&self, reference: &str) -> StorageResult<u64> {
        self.call("abortAction", json!([reference])).await
    }

    async fn destroy(&self) -> StorageResult<()> {
        self.call("destroy", json!([])).await
    }

    async fn update_output_for_merge(&self, update: MergeOutputUpdate) -> StorageResult<()> {
        self.call("updateOutputForMerge", json!([update])).await
    }

    async fn add_to_transaction_satoshis(&self, transaction_id: i64, delta: i64) -> StorageResult<()> {
        self.call("addToTransactionSatoshis", json!([transaction_id, delta])).await
    }

    async fn insert_certificate(&self, cert: NewCertificate) -> StorageResult<Certificate> {
        self.call("insertCertificate", json!([cert])).await
    }

    async fn insert_certificate_field(&self, field: NewCertificateField) -> StorageResult<()> {
        self.call("insertCertificateField", json!([field])).await
    }

    async fn find_certificate(&self, certificate_id: i64) -> StorageResult<Option<Certificate>> {
        self.call("findCertificate", json!([certificate_id])).await
    }

    async fn find_certificates(&self, query: CertificateQuery) -> StorageResult<(Vec<Certificate>, i64)> {
        self.call("findCertificates", json!([query])).await
    }

    async fn certificate_fields(&self, certificate_id: i64) -> StorageResult<Vec<CertificateField>> {
        self.call("certificateFields", json!([certificate_id])).await
    }

    async fn relinquish_certificate(&self, certificate_id: i64) -> StorageResult<()> {
        self.call("relinquishCertificate", json!([certificate_id])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_sequential_and_unique() {
        let client = StorageClient::new("http://localhost", reqwest::Client::new());
        let ids: Vec<u64> = (0..5).map(|_| client.next_request_id().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }
}
