//! `internalize_action` persistence: a stateful
//! `Context`-shaped pipeline of three phases — setup (classify + detect
//! merge), satoshi delta calculation, and write — driven by the signer,
//! which has already parsed the Atomic BEEF and classified each declared
//! output as a wallet payment or a basket insertion before calling here.

use crate::error::{StorageError, StorageResult};
use crate::models::{Output, Transaction, TransactionStatus, DEFAULT_BASKET_NAME};
use crate::provider::{MergeOutputUpdate, NewOutput, NewTransaction, StorageProvider};

/// The two BRC-100 output-declaration shapes `internalize_action` accepts;
/// exactly one remittance kind per declared output.
pub enum DeclaredOutputProtocol {
    WalletPayment {
        sender_identity_key: String,
        derivation_prefix: String,
        derivation_suffix: String,
    },
    BasketInsertion {
        basket: String,
        tags: Vec<String>,
        custom_instructions: Option<String>,
    },
}

pub struct DeclaredOutput {
    pub output_index: i64,
    pub satoshis: i64,
    pub locking_script: Vec<u8>,
    pub protocol: DeclaredOutputProtocol,
}

pub struct InternalizeRequest {
    pub user_id: i64,
    pub txid: String,
    pub raw_tx: Vec<u8>,
    pub input_beef: Option<Vec<u8>>,
    pub outputs: Vec<DeclaredOutput>,
    pub labels: Vec<String>,
    pub description: String,
}

pub struct InternalizeOutcome {
    pub accepted: bool,
    pub is_merge: bool,
    pub txid: String,
    pub satoshis: i64,
}

/// Prior statuses a Transaction may be in for this txid to be treated as a
/// merge target rather than a conflict.
fn allowed_merge_status(status: TransactionStatus) -> bool {
    matches!(
        status,
        TransactionStatus::Completed | TransactionStatus::Unproven | TransactionStatus::Nosend
    )
}

/// Runs all three phases of `internalize_action` against already-classified
/// output declarations.
pub async fn internalize_action(
    storage: &dyn StorageProvider,
    req: InternalizeRequest,
) -> StorageResult<InternalizeOutcome> {
    // --- Phase 1: setup ---
    let existing = storage.find_transaction_by_txid(req.user_id, &req.txid).await?;
    reject_unmergeable(&existing, &req.txid)?;
    let is_merge = existing.is_some();

    let default_basket = storage
        .find_basket_by_name(req.user_id, DEFAULT_BASKET_NAME)
        .await?
        .ok_or_else(|| StorageError::NotFound("default basket".into()))?;

    let mut prior_outputs: Vec<Option<Output>> = Vec::with_capacity(req.outputs.len());
    for d in &req.outputs {
        match &existing {
            Some(tx) => prior_outputs.push(storage.find_output(tx.transaction_id, d.output_index).await?),
            None => prior_outputs.push(None),
        }
    }

    // --- Phase 2: satoshi delta ---
    let delta = compute_satoshi_delta(&req.outputs, &prior_outputs);

    // --- Phase 3: write ---
    let transaction_id = match &existing {
        Some(tx) => {
            storage.add_to_transaction_satoshis(tx.transaction_id, delta).await?;
            tx.transaction_id
        }
        None => {
            let tx = storage
                .insert_transaction(NewTransaction {
                    user_id: req.user_id,
                    status: TransactionStatus::Unproven,
                    reference: crate::actions::new_reference(),
                    is_outgoing: false,
                    satoshis: delta,
                    version: None,
                    lock_time: None,
                    description: req.description.clone(),
                    txid: Some(req.txid.clone()),
                    input_beef: req.input_beef.clone(),
                    raw_tx: Some(req.raw_tx.clone()),
                })
                .await?;
            tx.transaction_id
        }
    };

    for label in &req.labels {
        let row = storage.find_or_insert_tx_label(req.user_id, label).await?;
        storage.map_tx_label(row.tx_label_id, transaction_id).await?;
    }

    for (d, prior) in req.outputs.iter().zip(prior_outputs.iter()) {
        write_one_output(storage, &req, transaction_id, default_basket.basket_id, d, prior.as_ref()).await?;
    }

    Ok(InternalizeOutcome {
        accepted: true,
        is_merge,
        txid: req.txid,
        satoshis: delta,
    })
}

fn reject_unmergeable(existing: &Option<Transaction>, txid: &str) -> StorageResult<()> {
    if let Some(tx) = existing {
        if !allowed_merge_status(tx.status()) {
            return Err(StorageError::invalid(
                "tx",
                format!("transaction {txid} is in status '{}' and cannot be merged into", tx.status),
            ));
        }
    }
    Ok(())
}

/// Satoshi delta calculation: five cases, four of which move
/// the total and one ("ignored") which does not.
fn compute_satoshi_delta(outputs: &[DeclaredOutput], priors: &[Option<Output>]) -> i64 {
    let mut delta = 0i64;
    for (d, prior) in outputs.iter().zip(priors.iter()) {
        delta += match (&d.protocol, prior) {
            (DeclaredOutputProtocol::BasketInsertion { .. }, Some(p)) if p.change => -d.satoshis,
            (DeclaredOutputProtocol::BasketInsertion { .. }, _) => 0,
            (DeclaredOutputProtocol::WalletPayment { .. }, None) => d.satoshis,
            (DeclaredOutputProtocol::WalletPayment { .. }, Some(p)) if p.change => 0,
            (DeclaredOutputProtocol::WalletPayment { .. }, Some(_non_change)) => d.satoshis,
        };
    }
    delta
}

async fn write_one_output(
    storage: &dyn StorageProvider,
    req: &InternalizeRequest,
    transaction_id: i64,
    default_basket_id: i64,
    d: &DeclaredOutput,
    prior: Option<&Output>,
) -> StorageResult<()> {
    match (&d.protocol, prior) {
        (
            DeclaredOutputProtocol::WalletPayment {
                sender_identity_key,
                derivation_prefix,
                derivation_suffix,
            },
            None,
        ) => {
            storage
                .insert_output(NewOutput {
                    user_id: req.user_id,
                    transaction_id,
                    basket_id: Some(default_basket_id),
                    spendable: true,
                    change: true,
                    vout: d.output_index,
                    satoshis: d.satoshis,
                    provided_by: "storage".to_string(),
                    purpose: "change".to_string(),
                    r#type: "custom".to_string(),
                    output_description: None,
                    txid: Some(req.txid.clone()),
                    sender_identity_key: Some(sender_identity_key.clone()),
                    derivation_prefix: Some(derivation_prefix.clone()),
                    derivation_suffix: Some(derivation_suffix.clone()),
                    custom_instructions: None,
                    script_length: Some(d.locking_script.len() as i64),
                    script_offset: None,
                    locking_script: Some(d.locking_script.clone()),
                })
                .await?;
        }
        (
            DeclaredOutputProtocol::WalletPayment {
                sender_identity_key,
                derivation_prefix,
                derivation_suffix,
            },
            Some(p),
        ) if !p.change => {
            storage
                .update_output_for_merge(MergeOutputUpdate {
                    output_id: p.output_id,
                    basket_id: Some(default_basket_id),
                    change: true,
                    provided_by: "storage".to_string(),
                    purpose: "change".to_string(),
                    sender_identity_key: Some(sender_identity_key.clone()),
                    derivation_prefix: Some(derivation_prefix.clone()),
                    derivation_suffix: Some(derivation_suffix.clone()),
                    custom_instructions: None,
                })
                .await?;
        }
        (DeclaredOutputProtocol::WalletPayment { .. }, Some(_already_change)) => {
            // Wallet payment merged into an existing change output: already
            // counted, nothing to persist.
        }
        (DeclaredOutputProtocol::BasketInsertion { basket, tags, custom_instructions }, prior_row) => {
            let basket_row = storage.find_or_insert_basket(req.user_id, basket).await?;
            let output_id = match prior_row {
                Some(p) => {
                    storage
                        .update_output_for_merge(MergeOutputUpdate {
                            output_id: p.output_id,
                            basket_id: Some(basket_row.basket_id),
                            change: false,
                            provided_by: p.provided_by.clone(),
                            purpose: p.purpose.clone(),
                            sender_identity_key: None,
                            derivation_prefix: None,
                            derivation_suffix: None,
                            custom_instructions: custom_instructions.clone(),
                        })
                        .await?;
                    p.output_id
                }
                None => {
                    storage
                        .insert_output(NewOutput {
                            user_id: req.user_id,
                            transaction_id,
                            basket_id: Some(basket_row.basket_id),
                            spendable: true,
                            change: false,
                            vout: d.output_index,
                            satoshis: d.satoshis,
                            provided_by: "external".to_string(),
                            purpose: "basket insertion".to_string(),
                            r#type: "custom".to_string(),
                            output_description: None,
                            txid: Some(req.txid.clone()),
                            sender_identity_key: None,
                            derivation_prefix: None,
                            derivation_suffix: None,
                            custom_instructions: custom_instructions.clone(),
                            script_length: Some(d.locking_script.len() as i64),
                            script_offset: None,
                            locking_script: Some(d.locking_script.clone()),
                        })
                        .await?
                        .output_id
                }
            };
            for tag in tags {
                let tag_row = storage.find_or_insert_output_tag(req.user_id, tag).await?;
                storage.map_output_tag(tag_row.output_tag_id, output_id).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(change: bool) -> Output {
        Output {
            output_id: 1,
            user_id: 1,
            transaction_id: 1,
            basket_id: Some(1),
            spendable: true,
            change,
            vout: 2,
            satoshis: 500,
            provided_by: "storage".into(),
            purpose: "change".into(),
            r#type: "custom".into(),
            output_description: None,
            txid: Some("a".repeat(64)),
            sender_identity_key: None,
            derivation_prefix: None,
            derivation_suffix: None,
            custom_instructions: None,
            spent_by: None,
            sequence_number: None,
            spending_description: None,
            script_length: None,
            script_offset: None,
            locking_script: None,
            spent: false,
        }
    }

    fn wallet_payment(satoshis: i64) -> DeclaredOutput {
        DeclaredOutput {
            output_index: 2,
            satoshis,
            locking_script: vec![0x76, 0xa9],
            protocol: DeclaredOutputProtocol::WalletPayment {
                sender_identity_key: "02".to_string() + &"aa".repeat(32),
                derivation_prefix: "prefix".into(),
                derivation_suffix: "suffix".into(),
            },
        }
    }

    #[test]
    fn wallet_payment_merge_into_existing_change_is_ignored() {
        let outputs = vec![wallet_payment(500)];
        let priors = vec![Some(output(true))];
        assert_eq!(compute_satoshi_delta(&outputs, &priors), 0);
    }

    #[test]
    fn wallet_payment_new_tx_adds_full_value() {
        let outputs = vec![wallet_payment(700)];
        let priors = vec![None];
        assert_eq!(compute_satoshi_delta(&outputs, &priors), 700);
    }

    #[test]
    fn wallet_payment_promoting_non_change_adds_value() {
        let outputs = vec![wallet_payment(300)];
        let priors = vec![Some(output(false))];
        assert_eq!(compute_satoshi_delta(&outputs, &priors), 300);
    }

    #[test]
    fn basket_insertion_demoting_change_subtracts_value() {
        let outputs = vec![DeclaredOutput {
            output_index: 2,
            satoshis: 500,
            locking_script: vec![],
            protocol: DeclaredOutputProtocol::BasketInsertion {
                basket: "tokens".into(),
                tags: vec![],
                custom_instructions: None,
            },
        }];
        let priors = vec![Some(output(true))];
        assert_eq!(compute_satoshi_delta(&outputs, &priors), -500);
    }

    #[test]
    fn basket_insertion_new_output_contributes_zero() {
        let outputs = vec![DeclaredOutput {
            output_index: 2,
            satoshis: 500,
            locking_script: vec![],
            protocol: DeclaredOutputProtocol::BasketInsertion {
                basket: "tokens".into(),
                tags: vec![],
                custom_instructions: None,
            },
        }];
        let priors = vec![None];
        assert_eq!(compute_satoshi_delta(&outputs, &priors), 0);
    }
}
