//! `create_action` / `sign_action` / `process_action`.

use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bitcoin::consensus::{Decodable, Encodable};
use bitcoin::{absolute::LockTime, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use rand::RngCore;
use wallet_toolbox_common::error::{
    ReviewActionResult, ReviewActionStatus, SendWithResult, SendWithStatus, WalletError, WalletResult,
};
use wallet_toolbox_common::types::{Counterparty, Protocol};
use wallet_toolbox_crypto::KeyDeriver;
use wallet_toolbox_services::ServiceProvider;
use wallet_toolbox_storage::actions::{self, CreateActionRequest, PendingOutput};
use wallet_toolbox_storage::{ProvenTxReqStatus, StorageProvider, TransactionStatus};

/// Byte-size fee model: a P2PKH input/output's typical size times a flat
/// sats-per-kilobyte rate. No dust/rbf modeling; this is the same order of
/// estimate the original `PendingStorageApi` make-change step uses.
const P2PKH_INPUT_VBYTES: u64 = 148;
const P2PKH_OUTPUT_VBYTES: u64 = 34;
const TX_OVERHEAD_VBYTES: u64 = 10;
const FEE_RATE_SAT_PER_KB: u64 = 50;

fn estimate_fee(num_inputs: usize, num_outputs: usize) -> u64 {
    let size = TX_OVERHEAD_VBYTES + num_inputs as u64 * P2PKH_INPUT_VBYTES + num_outputs as u64 * P2PKH_OUTPUT_VBYTES;
    (size * FEE_RATE_SAT_PER_KB + 999) / 1000
}

/// Parses the `"{txid}.{vout}"` outpoint convention this workspace uses on
/// the wire (distinct from `bitcoin::OutPoint`'s colon-separated `Display`).
fn parse_outpoint(outpoint: &str) -> WalletResult<(String, i64)> {
    let (txid, vout) = outpoint
        .rsplit_once('.')
        .ok_or_else(|| WalletError::invalid_parameter("inputs[].outpoint", "expected '<txid>.<vout>'"))?;
    let vout: i64 = vout
        .parse()
        .map_err(|_| WalletError::invalid_parameter("inputs[].outpoint", "vout must be an integer"))?;
    Ok((txid.to_string(), vout))
}

/// Resolves one input's satoshi value: first against a previously-tracked
/// Output for this user (the input spends the wallet's own change/UTXO),
/// falling back to decoding `input_beef` as the raw funding transaction (this
/// workspace's BEEF simplification; see `internalize::InternalizeActionArgs`).
async fn resolve_input_satoshis(
    storage: &dyn StorageProvider,
    user_id: i64,
    input: &CreateActionInput,
    input_beef: Option<&[u8]>,
) -> WalletResult<i64> {
    let (txid, vout) = parse_outpoint(&input.outpoint)?;

    if let Some(output) = storage
        .find_output_by_txid_vout(user_id, &txid, vout)
        .await
        .map_err(|e| WalletError::runtime(format!("{e}")))?
    {
        return Ok(output.satoshis);
    }

    if let Some(raw_tx) = input_beef {
        if wallet_toolbox_common::hash::Txid::from_raw_tx(raw_tx).to_hex() == txid {
            if let Ok(tx) = Transaction::consensus_decode(&mut raw_tx.as_ref()) {
                if let Some(txout) = tx.output.get(vout as usize) {
                    return Ok(txout.value.to_sat() as i64);
                }
            }
        }
    }

    Err(WalletError::invalid_parameter(
        "inputs[].outpoint",
        format!(
            "cannot resolve the value of input '{}': not a tracked output and no matching inputBEEF transaction was provided",
            input.outpoint
        ),
    ))
}

fn random_derivation_component() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derives a fresh BRC-42-style change-output locking script: a random
/// `derivation_prefix`/`derivation_suffix` pair forms the key ID, the public
/// key is derived under the wallet-payment protocol for `self`, and the
/// output is a plain P2PKH to that key.
fn derive_change_output(key_deriver: &dyn KeyDeriver) -> WalletResult<(Vec<u8>, String, String)> {
    let prefix = random_derivation_component();
    let suffix = random_derivation_component();
    let key_id = format!("{prefix} {suffix}");
    let protocol = Protocol::wallet_payment();
    let public_key = key_deriver.derive_public_key(&protocol, &key_id, &Counterparty::Myself, true)?;
    let pubkey_hash = bitcoin::PublicKey::new(public_key).pubkey_hash();
    let script = ScriptBuf::new_p2pkh(&pubkey_hash);
    Ok((script.into_bytes(), prefix, suffix))
}

/// Splits `leftover` (already net of the fee a single change output would
/// add) into up to `number_of_desired_utxos` shares of at least
/// `minimum_desired_utxo_value`, shrinking the count until each share clears
/// the floor net of the extra outputs' own fee cost. Largest-remainder share
/// absorbs the rounding; same "simple and dumb" split a basket's
/// fragmentation target implies rather than an optimal packing.
fn split_change(
    leftover: i64,
    number_of_desired_utxos: i64,
    minimum_desired_utxo_value: i64,
    num_inputs: usize,
    num_other_outputs: usize,
) -> Vec<i64> {
    if leftover <= 0 {
        return Vec::new();
    }
    let min_value = minimum_desired_utxo_value.max(1);
    let max_by_target = number_of_desired_utxos.max(1);
    let max_by_value = (leftover / min_value).max(1);
    let mut count = max_by_target.min(max_by_value).max(1) as usize;

    loop {
        let fee_for_one = estimate_fee(num_inputs, num_other_outputs + 1) as i64;
        let fee_for_count = estimate_fee(num_inputs, num_other_outputs + count) as i64;
        let distributable = leftover - (fee_for_count - fee_for_one).max(0);
        let base = distributable / count as i64;
        if count == 1 || base >= min_value {
            let mut shares = vec![base; count];
            let remainder = distributable - base * count as i64;
            if let Some(last) = shares.last_mut() {
                *last += remainder;
            }
            return shares;
        }
        count -= 1;
    }
}

/// One input the caller wants included, resolved against an outpoint the
/// input BEEF or a prior stored rawTx can vouch for.
#[derive(Debug, Clone)]
pub struct CreateActionInput {
    pub outpoint: String,
    pub sequence_number: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CreateActionOutputSpec {
    pub satoshis: i64,
    pub locking_script: Vec<u8>,
    pub output_description: Option<String>,
    pub basket: Option<String>,
    pub change: bool,
    pub custom_instructions: Option<String>,
    /// BRC-42 derivation data for a computed change output; `None` for an
    /// externally-specified output.
    pub derivation_prefix: Option<String>,
    pub derivation_suffix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateActionArgs {
    pub user_id: i64,
    pub description: String,
    pub input_beef: Option<Vec<u8>>,
    pub inputs: Vec<CreateActionInput>,
    pub outputs: Vec<CreateActionOutputSpec>,
    pub lock_time: Option<u32>,
    pub version: Option<u32>,
    pub labels: Vec<String>,
    pub send_with: Vec<String>,
    /// `options.acceptDelayedBroadcast`; defaults to `true`.
    pub accept_delayed_broadcast: bool,
    pub is_no_send: bool,
}

/// The derived booleans computed before persisting a new action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionFlags {
    pub is_send_with: bool,
    pub is_remix_change: bool,
    pub is_new_tx: bool,
    pub is_delayed: bool,
    pub is_no_send: bool,
}

pub fn compute_action_flags(args: &CreateActionArgs) -> ActionFlags {
    let is_send_with = !args.send_with.is_empty();
    let is_remix_change = args.inputs.is_empty() && args.outputs.is_empty() && !is_send_with;
    let is_new_tx = is_remix_change || !args.inputs.is_empty() || !args.outputs.is_empty();
    ActionFlags {
        is_send_with,
        is_remix_change,
        is_new_tx,
        is_delayed: args.accept_delayed_broadcast,
        is_no_send: args.is_no_send,
    }
}

#[derive(Debug, Clone)]
pub struct CreateActionResult {
    pub reference: String,
    pub version: u32,
    pub lock_time: u32,
    pub change_vouts: Vec<i64>,
    /// Present whenever `is_new_tx`: the unsigned skeleton the application
    /// signs before calling `sign_action`.
    pub signable_tx: Option<Vec<u8>>,
}

/// Builds the unsigned transaction skeleton: inputs with empty scriptSigs in
/// request order, outputs in request order (change outputs were already
/// appended to `outputs` by the caller per the default basket's targets).
fn assemble_signable_transaction(
    inputs: &[CreateActionInput],
    outputs: &[CreateActionOutputSpec],
    version: u32,
    lock_time: u32,
) -> WalletResult<Vec<u8>> {
    let tx_in = inputs
        .iter()
        .map(|i| {
            let outpoint = OutPoint::from_str(&i.outpoint)
                .map_err(|e| WalletError::invalid_parameter("inputs[].outpoint", format!("{e}")))?;
            Ok(TxIn {
                previous_output: outpoint,
                script_sig: ScriptBuf::new(),
                sequence: i
                    .sequence_number
                    .map(Sequence)
                    .unwrap_or(Sequence::MAX),
                witness: Witness::new(),
            })
        })
        .collect::<WalletResult<Vec<_>>>()?;

    let tx_out = outputs
        .iter()
        .map(|o| TxOut {
            value: bitcoin::Amount::from_sat(o.satoshis.max(0) as u64),
            script_pubkey: ScriptBuf::from_bytes(o.locking_script.clone()),
        })
        .collect();

    let tx = Transaction {
        version: bitcoin::transaction::Version(version as i32),
        lock_time: LockTime::from_consensus(lock_time),
        input: tx_in,
        output: tx_out,
    };

    let mut bytes = Vec::new();
    tx.consensus_encode(&mut bytes)
        .map_err(|e| WalletError::runtime(format!("failed to encode signable transaction: {e}")))?;
    Ok(bytes)
}

/// `create_action`: validate + normalize, select change
/// per the default basket's targets, persist the pending side in Storage,
/// and assemble the signable transaction for any new-tx path.
pub async fn create_action(
    storage: &dyn StorageProvider,
    key_deriver: &dyn KeyDeriver,
    args: CreateActionArgs,
) -> WalletResult<CreateActionResult> {
    let flags = compute_action_flags(&args);
    let version = args.version.unwrap_or(1);
    let lock_time = args.lock_time.unwrap_or(0);

    let mut outputs = args.outputs.clone();

    if !args.inputs.is_empty() {
        let mut input_total: i64 = 0;
        for input in &args.inputs {
            input_total += resolve_input_satoshis(storage, args.user_id, input, args.input_beef.as_deref()).await?;
        }
        let output_total: i64 = outputs.iter().map(|o| o.satoshis).sum();
        let fee = estimate_fee(args.inputs.len(), outputs.len() + 1) as i64;
        let leftover = input_total - output_total - fee;

        if leftover < 0 {
            return Err(WalletError::InsufficientFunds {
                total_satoshis_needed: (output_total + fee).max(0) as u64,
                more_satoshis_needed: (-leftover) as u64,
            });
        }

        if leftover > 0 {
            let basket = storage
                .find_or_insert_default_basket(args.user_id)
                .await
                .map_err(|e| WalletError::runtime(format!("default basket lookup failed: {e}")))?;
            let shares = split_change(
                leftover,
                basket.number_of_desired_utxos,
                basket.minimum_desired_utxo_value,
                args.inputs.len(),
                outputs.len(),
            );
            for share in shares {
                let (locking_script, derivation_prefix, derivation_suffix) = derive_change_output(key_deriver)?;
                outputs.push(CreateActionOutputSpec {
                    satoshis: share,
                    locking_script,
                    output_description: None,
                    basket: None,
                    change: true,
                    custom_instructions: None,
                    derivation_prefix: Some(derivation_prefix),
                    derivation_suffix: Some(derivation_suffix),
                });
            }
        }
    }

    let outcome = actions::create_action(
        storage,
        CreateActionRequest {
            user_id: args.user_id,
            description: args.description.clone(),
            version: Some(version as i64),
            lock_time: Some(lock_time as i64),
            labels: args.labels.clone(),
            input_beef: args.input_beef.clone(),
            outputs: outputs
                .iter()
                .map(|o| PendingOutput {
                    satoshis: o.satoshis,
                    basket: o.basket.clone(),
                    change: o.change,
                    purpose: if o.change { "change".to_string() } else { "general".to_string() },
                    output_description: o.output_description.clone(),
                    custom_instructions: o.custom_instructions.clone(),
                    locking_script: o.locking_script.clone(),
                    derivation_prefix: o.derivation_prefix.clone(),
                    derivation_suffix: o.derivation_suffix.clone(),
                })
                .collect(),
            is_no_send: flags.is_no_send,
        },
    )
    .await
    .map_err(|e| WalletError::runtime(format!("create_action storage step failed: {e}")))?;

    let signable_tx = if flags.is_new_tx {
        Some(assemble_signable_transaction(&args.inputs, &outputs, version, lock_time)?)
    } else {
        None
    };

    Ok(CreateActionResult {
        reference: outcome.reference,
        version,
        lock_time,
        change_vouts: outcome.change_vouts,
        signable_tx,
    })
}

#[derive(Debug, Clone)]
pub struct SignActionResult {
    pub transaction_id: i64,
    pub txid: String,
    pub process_outcome: Option<ProcessActionOutcome>,
}

/// `sign_action`: persist the signed raw transaction and,
/// unless the action is delayed, hand off to [`process_action`]. `send_with`
/// is the list of sibling action references (from the original
/// `create_action` call) to broadcast together with this transaction.
pub async fn sign_action(
    storage: &dyn StorageProvider,
    services: &dyn ServiceProvider,
    transaction_id: i64,
    raw_tx: Vec<u8>,
    is_delayed: bool,
    send_with: &[String],
) -> WalletResult<SignActionResult> {
    let txid = wallet_toolbox_common::hash::Txid::from_raw_tx(&raw_tx).to_hex();

    storage
        .update_transaction_signed(transaction_id, &raw_tx, &txid)
        .await
        .map_err(|e| WalletError::runtime(format!("failed to persist signed transaction: {e}")))?;
    storage
        .update_transaction_status(transaction_id, TransactionStatus::Signed)
        .await
        .map_err(|e| WalletError::runtime(format!("failed to update transaction status: {e}")))?;

    if let Some(req) = storage.find_proven_tx_req_by_txid(&txid).await.ok().flatten() {
        let _ = storage
            .update_proven_tx_req_status(req.proven_tx_req_id, ProvenTxReqStatus::Unmined)
            .await;
    }

    let process_outcome = if is_delayed {
        None
    } else {
        Some(process_action(storage, services, transaction_id, &raw_tx, &txid, send_with).await?)
    };

    Ok(SignActionResult {
        transaction_id,
        txid,
        process_outcome,
    })
}

#[derive(Debug, Clone)]
pub struct ProcessActionOutcome {
    pub txid: String,
    pub status: TransactionStatus,
    pub review_action_results: Vec<ReviewActionResult>,
}

/// `process_action`: broadcast via Services, update the
/// Transaction's terminal status, and (for the undelayed path) surface a
/// `ReviewActions` error on rejection instead of a bare `Err`. When
/// `send_with` is non-empty, every listed sibling reference is resolved to
/// its own signed-but-not-yet-broadcast transaction and the whole batch is
/// posted to Services together via `post_beef_array`, one entry per txid.
pub async fn process_action(
    storage: &dyn StorageProvider,
    services: &dyn ServiceProvider,
    transaction_id: i64,
    raw_tx: &[u8],
    txid: &str,
    send_with: &[String],
) -> WalletResult<ProcessActionOutcome> {
    storage
        .update_transaction_status(transaction_id, TransactionStatus::Sending)
        .await
        .map_err(|e| WalletError::runtime(format!("{e}")))?;

    if send_with.is_empty() {
        let post_result = services.post_beef(raw_tx, std::slice::from_ref(&txid.to_string())).await;
        return match post_result {
            Ok(result) if !result.status.is_double_spend() => {
                storage
                    .update_transaction_status(transaction_id, TransactionStatus::Completed)
                    .await
                    .map_err(|e| WalletError::runtime(format!("{e}")))?;
                Ok(ProcessActionOutcome {
                    txid: txid.to_string(),
                    status: TransactionStatus::Completed,
                    review_action_results: vec![ReviewActionResult {
                        txid: Some(txid.to_string()),
                        status: ReviewActionStatus::Success,
                        competing_txs: None,
                        competing_beef: None,
                    }],
                })
            }
            Ok(result) => {
                storage
                    .update_transaction_status(transaction_id, TransactionStatus::Failed)
                    .await
                    .map_err(|e| WalletError::runtime(format!("{e}")))?;
                let review = ReviewActionResult {
                    txid: Some(txid.to_string()),
                    status: ReviewActionStatus::DoubleSpend,
                    competing_txs: result.competing_txs.clone(),
                    competing_beef: None,
                };
                Err(WalletError::ReviewActions {
                    review_action_results: vec![review],
                    send_with_results: Vec::new(),
                    txid: Some(txid.to_string()),
                    tx: Some(raw_tx.to_vec()),
                    no_send_change: None,
                })
            }
            Err(e) => {
                storage
                    .update_transaction_status(transaction_id, TransactionStatus::Failed)
                    .await
                    .map_err(|e| WalletError::runtime(format!("{e}")))?;
                tracing::warn!(%txid, error = %e, "broadcast failed");
                let review = ReviewActionResult {
                    txid: Some(txid.to_string()),
                    status: ReviewActionStatus::ServiceError,
                    competing_txs: None,
                    competing_beef: None,
                };
                Err(WalletError::ReviewActions {
                    review_action_results: vec![review],
                    send_with_results: Vec::new(),
                    txid: Some(txid.to_string()),
                    tx: Some(raw_tx.to_vec()),
                    no_send_change: None,
                })
            }
        };
    }

    let mut siblings = Vec::with_capacity(send_with.len());
    for reference in send_with {
        let tx = storage
            .find_transaction_by_reference(reference)
            .await
            .map_err(|e| WalletError::runtime(format!("{e}")))?
            .ok_or_else(|| WalletError::invalid_parameter("sendWith", format!("no transaction for reference '{reference}'")))?;
        let sibling_raw_tx = tx.raw_tx.clone().ok_or_else(|| {
            WalletError::invalid_parameter("sendWith", format!("transaction '{reference}' has not been signed yet"))
        })?;
        let sibling_txid = tx.txid.clone().ok_or_else(|| {
            WalletError::invalid_parameter("sendWith", format!("transaction '{reference}' has no txid yet"))
        })?;
        storage
            .update_transaction_status(tx.transaction_id, TransactionStatus::Sending)
            .await
            .map_err(|e| WalletError::runtime(format!("{e}")))?;
        siblings.push((tx.transaction_id, sibling_txid, sibling_raw_tx));
    }

    let mut beefs = Vec::with_capacity(1 + siblings.len());
    beefs.push(raw_tx.to_vec());
    beefs.extend(siblings.iter().map(|(_, _, raw)| raw.clone()));

    match services.post_beef_array(&beefs).await {
        Ok(results) if results.len() == beefs.len() => {
            let subject_failed = results[0].status.is_double_spend();
            storage
                .update_transaction_status(
                    transaction_id,
                    if subject_failed { TransactionStatus::Failed } else { TransactionStatus::Completed },
                )
                .await
                .map_err(|e| WalletError::runtime(format!("{e}")))?;

            let mut send_with_results = Vec::with_capacity(siblings.len());
            for ((sib_id, sib_txid, _), result) in siblings.iter().zip(&results[1..]) {
                let sib_failed = result.status.is_double_spend();
                storage
                    .update_transaction_status(
                        *sib_id,
                        if sib_failed { TransactionStatus::Failed } else { TransactionStatus::Completed },
                    )
                    .await
                    .map_err(|e| WalletError::runtime(format!("{e}")))?;
                send_with_results.push(SendWithResult {
                    txid: sib_txid.clone(),
                    status: if sib_failed { SendWithStatus::Failed } else { SendWithStatus::Unproven },
                });
            }

            if subject_failed {
                let review = ReviewActionResult {
                    txid: Some(txid.to_string()),
                    status: ReviewActionStatus::DoubleSpend,
                    competing_txs: results[0].competing_txs.clone(),
                    competing_beef: None,
                };
                return Err(WalletError::ReviewActions {
                    review_action_results: vec![review],
                    send_with_results,
                    txid: Some(txid.to_string()),
                    tx: Some(raw_tx.to_vec()),
                    no_send_change: None,
                });
            }

            Ok(ProcessActionOutcome {
                txid: txid.to_string(),
                status: TransactionStatus::Completed,
                review_action_results: vec![ReviewActionResult {
                    txid: Some(txid.to_string()),
                    status: ReviewActionStatus::Success,
                    competing_txs: None,
                    competing_beef: None,
                }],
            })
        }
        Ok(_) => {
            storage
                .update_transaction_status(transaction_id, TransactionStatus::Failed)
                .await
                .map_err(|e| WalletError::runtime(format!("{e}")))?;
            for (sib_id, _, _) in &siblings {
                let _ = storage.update_transaction_status(*sib_id, TransactionStatus::Failed).await;
            }
            tracing::warn!(%txid, "post_beef_array returned a result count that did not match the batch size");
            let review = ReviewActionResult {
                txid: Some(txid.to_string()),
                status: ReviewActionStatus::ServiceError,
                competing_txs: None,
                competing_beef: None,
            };
            Err(WalletError::ReviewActions {
                review_action_results: vec![review],
                send_with_results: siblings
                    .iter()
                    .map(|(_, sib_txid, _)| SendWithResult { txid: sib_txid.clone(), status: SendWithStatus::Failed })
                    .collect(),
                txid: Some(txid.to_string()),
                tx: Some(raw_tx.to_vec()),
                no_send_change: None,
            })
        }
        Err(e) => {
            storage
                .update_transaction_status(transaction_id, TransactionStatus::Failed)
                .await
                .map_err(|e| WalletError::runtime(format!("{e}")))?;
            for (sib_id, _, _) in &siblings {
                let _ = storage.update_transaction_status(*sib_id, TransactionStatus::Failed).await;
            }
            tracing::warn!(%txid, error = %e, "batch broadcast failed");
            let review = ReviewActionResult {
                txid: Some(txid.to_string()),
                status: ReviewActionStatus::ServiceError,
                competing_txs: None,
                competing_beef: None,
            };
            Err(WalletError::ReviewActions {
                review_action_results: vec![review],
                send_with_results: siblings
                    .iter()
                    .map(|(_, sib_txid, _)| SendWithResult { txid: sib_txid.clone(), status: SendWithStatus::Failed })
                    .collect(),
                txid: Some(txid.to_string()),
                tx: Some(raw_tx.to_vec()),
                no_send_change: None,
            })
        }
    }
}
