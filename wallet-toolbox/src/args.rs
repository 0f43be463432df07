//! Closed argument/result variants for the BRC-100 method surface. Each method's wire args are `serde_json`-deserialized into one of
//! these structs at the façade boundary, then validated into the
//! `wallet-toolbox-common::types` closed variants (`Counterparty`,
//! `Protocol`) before anything touches storage or signing.
//!
//! Byte arrays are plain `Vec<u8>`; `serde_json` already renders those as
//! `list[int]` on the wire.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPublicKeyArgs {
    #[serde(default)]
    pub identity_key: bool,
    pub protocol_id: Option<(u8, String)>,
    pub key_id: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub for_self: bool,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPublicKeyResult {
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignatureArgs {
    pub data: Option<Vec<u8>>,
    pub hash_to_directly_sign: Option<[u8; 32]>,
    pub protocol_id: (u8, String),
    pub key_id: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignatureResult {
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignatureArgs {
    pub data: Option<Vec<u8>>,
    pub hash_to_directly_verify: Option<[u8; 32]>,
    pub signature: Vec<u8>,
    pub protocol_id: (u8, String),
    pub key_id: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignatureResult {
    pub valid: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptArgs {
    pub plaintext: Vec<u8>,
    pub protocol_id: (u8, String),
    pub key_id: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptResult {
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptArgs {
    pub ciphertext: Vec<u8>,
    pub protocol_id: (u8, String),
    pub key_id: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptResult {
    pub plaintext: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHmacArgs {
    pub data: Vec<u8>,
    pub protocol_id: (u8, String),
    pub key_id: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHmacResult {
    pub hmac: [u8; 32],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyHmacArgs {
    pub data: Vec<u8>,
    pub hmac: [u8; 32],
    pub protocol_id: (u8, String),
    pub key_id: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyHmacResult {
    pub valid: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActionInputArg {
    pub outpoint: String,
    pub sequence_number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActionOutputArg {
    pub satoshis: i64,
    pub locking_script: Vec<u8>,
    pub output_description: Option<String>,
    pub basket: Option<String>,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

/// `create_action` wire args. Carries the same shape
/// `wallet-toolbox-signer::CreateActionArgs` wants, minus `user_id` (which
/// the façade fills in from `auth`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActionArgs {
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<CreateActionInputArg>,
    #[serde(default)]
    pub outputs: Vec<CreateActionOutputArg>,
    pub lock_time: Option<u32>,
    pub version: Option<u32>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub input_beef: Option<Vec<u8>>,
    #[serde(default)]
    pub send_with: Vec<String>,
    #[serde(default = "default_true")]
    pub accept_delayed_broadcast: bool,
    #[serde(default)]
    pub is_no_send: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActionResult {
    pub reference: String,
    pub txid: Option<String>,
    pub tx: Option<Vec<u8>>,
    pub no_send_change: Option<Vec<String>>,
    pub signable_transaction: Option<SignableTransaction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignableTransaction {
    pub reference: String,
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignActionArgs {
    pub reference: String,
    pub raw_tx: Vec<u8>,
    #[serde(default = "default_true")]
    pub accept_delayed_broadcast: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignActionResult {
    pub txid: Option<String>,
    pub tx: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortActionArgs {
    pub reference: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortActionResult {
    pub aborted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRemittanceArg {
    pub sender_identity_key: String,
    pub derivation_prefix: String,
    pub derivation_suffix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertionRemittanceArg {
    pub basket: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalizeOutputArg {
    pub output_index: i64,
    pub payment_remittance: Option<PaymentRemittanceArg>,
    pub insertion_remittance: Option<InsertionRemittanceArg>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalizeActionArgs {
    pub tx: Vec<u8>,
    pub outputs: Vec<InternalizeOutputArg>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalizeActionResult {
    pub accepted: bool,
    pub is_merge: bool,
    pub txid: String,
    pub satoshis: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListOutputsArgs {
    pub basket: Option<String>,
    pub tags: Vec<String>,
    pub tag_query_mode: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(default)]
    pub include_locking_scripts: bool,
    #[serde(default)]
    pub include_tags: bool,
    #[serde(default)]
    pub include_labels: bool,
    #[serde(default)]
    pub include_custom_instructions: bool,
    #[serde(default)]
    pub include_spent: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOutputsOutput {
    pub outpoint: String,
    pub satoshis: i64,
    pub locking_script: Option<Vec<u8>>,
    pub spendable: bool,
    pub tags: Option<Vec<String>>,
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOutputsResult {
    pub total_outputs: i64,
    pub outputs: Vec<ListOutputsOutput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResult {
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub satoshis: i64,
    pub outpoint: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAndUtxosResult {
    pub total: i64,
    pub utxos: Vec<Utxo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewSpendableOutputsArgs {
    pub all: bool,
    pub release: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListActionsArgs {
    pub labels: Vec<String>,
    pub label_query_mode: Option<String>,
    pub reference: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListActionsAction {
    pub reference: String,
    pub txid: Option<String>,
    pub satoshis: i64,
    pub status: String,
    pub description: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListActionsResult {
    pub total_actions: i64,
    pub actions: Vec<ListActionsAction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelinquishOutputArgs {
    pub output_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelinquishCertificateArgs {
    pub certificate_id: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListCertificatesArgs {
    pub r#type: Option<String>,
    pub certifiers: Vec<String>,
    pub subject: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCertificatesResult {
    pub total_certificates: i64,
    pub certificates: Vec<CertificateOut>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateOut {
    pub certificate_id: i64,
    pub r#type: String,
    pub serial_number: String,
    pub certifier: String,
    pub subject: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireCertificateFieldArg {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireCertificateArgs {
    pub r#type: String,
    pub serial_number: String,
    pub certifier: String,
    pub subject: String,
    pub verifier: Option<String>,
    pub revocation_outpoint: String,
    #[serde(default)]
    pub fields: Vec<AcquireCertificateFieldArg>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveCertificateArgs {
    pub certificate_id: i64,
    pub fields_to_reveal: Vec<String>,
    pub verifier: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveCertificateResult {
    pub keyring_for_verifier: Vec<(String, Vec<u8>)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_public_key_args_accepts_camel_case_wire_shape() {
        let args: GetPublicKeyArgs = serde_json::from_str(
            r#"{"identityKey":true,"protocolID":[2,"tests"],"keyID":"1","counterparty":"self","forSelf":true}"#,
        )
        .unwrap();
        assert!(args.identity_key);
        assert_eq!(args.protocol_id, Some((2, "tests".to_string())));
        assert!(args.for_self);
        assert!(!args.privileged);
    }

    #[test]
    fn get_public_key_args_defaults_flags_when_omitted() {
        let args: GetPublicKeyArgs = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!args.identity_key);
        assert!(!args.for_self);
        assert!(!args.privileged);
        assert!(args.protocol_id.is_none());
    }

    #[test]
    fn create_action_args_defaults_accept_delayed_broadcast_to_true() {
        let args: CreateActionArgs = serde_json::from_str(r#"{"description":"pay"}"#).unwrap();
        assert!(args.accept_delayed_broadcast);
        assert!(!args.is_no_send);
        assert!(args.outputs.is_empty());
        assert!(args.inputs.is_empty());
    }

    #[test]
    fn list_outputs_args_round_trips_basket_and_tags_from_wire_json() {
        let args: ListOutputsArgs =
            serde_json::from_str(r#"{"basket":"default","tags":["a","b"],"tagQueryMode":"all","limit":10}"#).unwrap();
        assert_eq!(args.basket.as_deref(), Some("default"));
        assert_eq!(args.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(args.tag_query_mode.as_deref(), Some("all"));
        assert_eq!(args.limit, Some(10));
        assert!(!args.include_spent);
    }

    #[test]
    fn list_outputs_result_serializes_camel_case() {
        let result = ListOutputsResult {
            total_outputs: 1,
            outputs: vec![ListOutputsOutput {
                outpoint: "ff".repeat(32) + ".0",
                satoshis: 100,
                locking_script: None,
                spendable: true,
                tags: None,
                custom_instructions: None,
            }],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["totalOutputs"], 1);
        assert_eq!(json["outputs"][0]["satoshis"], 100);
    }
}
