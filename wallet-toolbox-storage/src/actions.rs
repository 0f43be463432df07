//! Action-pipeline primitives layered on [`StorageProvider`]: `create_action`
//! persistence, `list_actions`, `relinquish_output`, CRUD siblings of `list_outputs`.

use rand::RngCore;

use crate::error::{StorageError, StorageResult};
use crate::models::{ProvenTxReqStatus, Transaction, TransactionStatus};
use crate::provider::{NewOutput, NewProvenTxReq, NewTransaction, StorageProvider, TransactionQuery};

/// One output the caller wants `create_action` to persist, prior to any
/// signing; mirrors the subset of BRC-100 `CreateActionOutput` storage cares
/// about.
pub struct PendingOutput {
    pub satoshis: i64,
    pub basket: Option<String>,
    pub change: bool,
    pub purpose: String,
    pub output_description: Option<String>,
    pub custom_instructions: Option<String>,
    pub locking_script: Vec<u8>,
    /// BRC-42 derivation data for a change output's key; `None` for an
    /// externally-specified (non-change) output.
    pub derivation_prefix: Option<String>,
    pub derivation_suffix: Option<String>,
}

pub struct CreateActionRequest {
    pub user_id: i64,
    pub description: String,
    pub version: Option<i64>,
    pub lock_time: Option<i64>,
    pub labels: Vec<String>,
    pub input_beef: Option<Vec<u8>>,
    pub outputs: Vec<PendingOutput>,
    pub is_no_send: bool,
}

pub struct CreateActionOutcome {
    pub reference: String,
    pub transaction: Transaction,
    pub change_vouts: Vec<i64>,
}

/// Generates a URL-safe random 16-byte reference.
pub fn new_reference() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64_url(&bytes)
}

fn base64_url(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Persists the pending side of `create_action`: a `Transaction` row in
/// `unsigned` status, a matching `ProvenTxReq` in `unknown` status, and one
/// `Output` row per requested output.
pub async fn create_action(
    storage: &dyn StorageProvider,
    req: CreateActionRequest,
) -> StorageResult<CreateActionOutcome> {
    let reference = new_reference();
    let satoshis: i64 = req.outputs.iter().map(|o| o.satoshis).sum();

    let tx = storage
        .insert_transaction(NewTransaction {
            user_id: req.user_id,
            status: TransactionStatus::Unsigned,
            reference: reference.clone(),
            is_outgoing: true,
            satoshis,
            version: req.version,
            lock_time: req.lock_time,
            description: req.description,
            txid: None,
            input_beef: req.input_beef,
            raw_tx: None,
        })
        .await?;

    for label in &req.labels {
        let row = storage.find_or_insert_tx_label(req.user_id, label).await?;
        storage.map_tx_label(row.tx_label_id, tx.transaction_id).await?;
    }

    let default_basket = storage.find_or_insert_default_basket(req.user_id).await?;
    let mut change_vouts = Vec::new();

    for (vout, out) in req.outputs.iter().enumerate() {
        let basket_id = if out.change {
            Some(default_basket.basket_id)
        } else if let Some(name) = &out.basket {
            Some(storage.find_or_insert_basket(req.user_id, name).await?.basket_id)
        } else {
            None
        };

        let row = storage
            .insert_output(NewOutput {
                user_id: req.user_id,
                transaction_id: tx.transaction_id,
                basket_id,
                spendable: true,
                change: out.change,
                vout: vout as i64,
                satoshis: out.satoshis,
                provided_by: if out.change { "storage".to_string() } else { "you".to_string() },
                purpose: out.purpose.clone(),
                r#type: "custom".to_string(),
                output_description: out.output_description.clone(),
                txid: None,
                sender_identity_key: None,
                derivation_prefix: out.derivation_prefix.clone(),
                derivation_suffix: out.derivation_suffix.clone(),
                custom_instructions: out.custom_instructions.clone(),
                script_length: Some(out.locking_script.len() as i64),
                script_offset: None,
                locking_script: Some(out.locking_script.clone()),
            })
            .await?;

        if out.change {
            change_vouts.push(row.vout);
        }
    }

    if req.is_no_send {
        storage
            .insert_proven_tx_req(NewProvenTxReq {
                txid: format!("pending:{reference}"),
                raw_tx: Vec::new(),
                input_beef: None,
                status: ProvenTxReqStatus::Nosend,
            })
            .await?;
    }

    Ok(CreateActionOutcome {
        reference,
        transaction: tx,
        change_vouts,
    })
}

/// A Transaction row together with its attached labels, as returned to a
/// `list_actions` caller.
pub struct ActionWithLabels {
    pub transaction: Transaction,
    pub labels: Vec<String>,
}

/// `list_actions`: CRUD sibling of `list_outputs` sharing
/// its pagination/count-before-page shape, applied to transaction rows.
pub async fn list_actions(
    storage: &dyn StorageProvider,
    query: TransactionQuery,
) -> StorageResult<(Vec<ActionWithLabels>, i64)> {
    let (transactions, total) = storage.find_transactions(query).await?;
    let mut out = Vec::with_capacity(transactions.len());
    for transaction in transactions {
        let labels = storage.labels_for_transaction(transaction.transaction_id).await?;
        out.push(ActionWithLabels { transaction, labels });
    }
    Ok((out, total))
}

/// Releases an output from the wallet's spendable set without marking it
/// spent by a transaction (`relinquish_output`).
pub async fn relinquish_output(storage: &dyn StorageProvider, output_id: i64) -> StorageResult<()> {
    storage.update_output_spendable(output_id, false).await
}
