//! Row types for every table. Column names are snake_case
//! internally; the wallet façade's serde boundary renders camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `Transaction.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    Unprocessed,
    Unsigned,
    Signed,
    Sending,
    Unproven,
    Nosend,
    Completed,
    Failed,
    Aborted,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Unsigned => "unsigned",
            Self::Signed => "signed",
            Self::Sending => "sending",
            Self::Unproven => "unproven",
            Self::Nosend => "nosend",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "unprocessed" => Self::Unprocessed,
            "unsigned" => Self::Unsigned,
            "signed" => Self::Signed,
            "sending" => Self::Sending,
            "unproven" => Self::Unproven,
            "nosend" => Self::Nosend,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "aborted" => Self::Aborted,
            _ => return None,
        })
    }
}

/// `ProvenTxReq.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvenTxReqStatus {
    Unknown,
    Callback,
    Unmined,
    Sending,
    Unconfirmed,
    Nosend,
    Notifying,
    Completed,
    Invalid,
    Aborted,
}

impl ProvenTxReqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Callback => "callback",
            Self::Unmined => "unmined",
            Self::Sending => "sending",
            Self::Unconfirmed => "unconfirmed",
            Self::Nosend => "nosend",
            Self::Notifying => "notifying",
            Self::Completed => "completed",
            Self::Invalid => "invalid",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Invalid | Self::Aborted)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "unknown" => Self::Unknown,
            "callback" => Self::Callback,
            "unmined" => Self::Unmined,
            "sending" => Self::Sending,
            "unconfirmed" => Self::Unconfirmed,
            "nosend" => Self::Nosend,
            "notifying" => Self::Notifying,
            "completed" => Self::Completed,
            "invalid" => Self::Invalid,
            "aborted" => Self::Aborted,
            _ => return None,
        })
    }

    /// Statuses [`crate::services::CheckForProofsScope`] polls.
    pub fn awaiting_proof() -> &'static [Self] {
        &[
            Self::Callback,
            Self::Unmined,
            Self::Sending,
            Self::Unknown,
            Self::Unconfirmed,
        ]
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub identity_key: String,
    pub active_storage: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: i64,
    pub user_id: i64,
    pub proven_tx_id: Option<i64>,
    pub status: String,
    pub reference: String,
    pub is_outgoing: bool,
    pub satoshis: i64,
    pub version: Option<i64>,
    pub lock_time: Option<i64>,
    pub description: String,
    pub txid: Option<String>,
    pub input_beef: Option<Vec<u8>>,
    pub raw_tx: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::parse(&self.status).unwrap_or(TransactionStatus::Failed)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Output {
    pub output_id: i64,
    pub user_id: i64,
    pub transaction_id: i64,
    pub basket_id: Option<i64>,
    pub spendable: bool,
    pub change: bool,
    pub vout: i64,
    pub satoshis: i64,
    pub provided_by: String,
    pub purpose: String,
    pub r#type: String,
    pub output_description: Option<String>,
    pub txid: Option<String>,
    pub sender_identity_key: Option<String>,
    pub derivation_prefix: Option<String>,
    pub derivation_suffix: Option<String>,
    pub custom_instructions: Option<String>,
    pub spent_by: Option<i64>,
    pub sequence_number: Option<i64>,
    pub spending_description: Option<String>,
    pub script_length: Option<i64>,
    pub script_offset: Option<i64>,
    pub locking_script: Option<Vec<u8>>,
    pub spent: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct OutputBasket {
    pub basket_id: i64,
    pub user_id: i64,
    pub name: String,
    pub number_of_desired_utxos: i64,
    pub minimum_desired_utxo_value: i64,
    pub is_deleted: bool,
}

pub const DEFAULT_BASKET_NAME: &str = "default";

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct OutputTag {
    pub output_tag_id: i64,
    pub user_id: i64,
    pub tag: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TxLabel {
    pub tx_label_id: i64,
    pub user_id: i64,
    pub label: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProvenTx {
    pub proven_tx_id: i64,
    pub txid: String,
    pub height: i64,
    pub index_in_block: i64,
    pub merkle_path: Vec<u8>,
    pub raw_tx: Vec<u8>,
    pub block_hash: String,
    pub merkle_root: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProvenTxReq {
    pub proven_tx_req_id: i64,
    pub proven_tx_id: Option<i64>,
    pub status: String,
    pub attempts: i64,
    pub notified: bool,
    pub txid: String,
    pub batch: Option<String>,
    pub history: String,
    pub notify: String,
    pub raw_tx: Vec<u8>,
    pub input_beef: Option<Vec<u8>>,
}

impl ProvenTxReq {
    pub fn status(&self) -> ProvenTxReqStatus {
        ProvenTxReqStatus::parse(&self.status).unwrap_or(ProvenTxReqStatus::Invalid)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Certificate {
    pub certificate_id: i64,
    pub user_id: i64,
    pub r#type: String,
    pub serial_number: String,
    pub certifier: String,
    pub subject: String,
    pub verifier: Option<String>,
    pub revocation_outpoint: String,
    pub signature: String,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct CertificateField {
    pub certificate_id: i64,
    pub field_name: String,
    pub field_value: String,
    pub master_key: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Commission {
    pub commission_id: i64,
    pub user_id: i64,
    pub transaction_id: i64,
    pub satoshis: i64,
    pub key_offset: String,
    pub is_redeemed: bool,
    pub locking_script: Vec<u8>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub monitor_event_id: i64,
    pub task: String,
    pub event: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct SyncState {
    pub sync_state_id: i64,
    pub user_id: i64,
    pub storage_identity_key: String,
    pub status: String,
    pub when: Option<DateTime<Utc>>,
    pub satoshis: Option<i64>,
    pub error_local: Option<String>,
    pub error_other: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Settings {
    pub storage_identity_key: String,
    pub storage_name: String,
    pub chain: String,
    pub dbtype: String,
    pub max_output_script: i64,
}
