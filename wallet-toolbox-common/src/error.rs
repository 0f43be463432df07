//! [`WalletError`] and its wire-facing companions.
//!
//! Every fallible operation in this workspace returns `Result<T, WalletError>`.
//! The variants are exactly the error *kinds* the BRC-100 surface is allowed
//! to produce; each carries the data bag a caller needs to recover (retry
//! with more funds, resolve a double spend, re-enter a password, ...).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-txid outcome of an undelayed broadcast attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReviewActionStatus {
    Success,
    DoubleSpend,
    ServiceError,
    InvalidTx,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewActionResult {
    pub txid: Option<String>,
    pub status: ReviewActionStatus,
    pub competing_txs: Option<Vec<String>>,
    pub competing_beef: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SendWithStatus {
    Unproven,
    Sending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendWithResult {
    pub txid: String,
    pub status: SendWithStatus,
}

/// The error kinds. The variant name *is* the wire kind (via
/// [`WalletError::kind`]); do not rename variants without updating callers
/// that match on `kind()` strings rather than the enum itself.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WalletError {
    #[error("invalid parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error(
        "insufficient funds in the available inputs to cover the cost of the \
         required outputs and the transaction fee ({more_satoshis_needed} \
         more satoshis are needed, for a total of {total_satoshis_needed})"
    )]
    InsufficientFunds {
        total_satoshis_needed: u64,
        more_satoshis_needed: u64,
    },

    #[error("transaction broadcast failed: {message}")]
    TransactionBroadcast { message: String },

    #[error("transaction size error: {message}")]
    TransactionSize { message: String },

    #[error(
        "undelayed createAction or signAction results require review \
         ({} action(s))",
        review_action_results.len()
    )]
    ReviewActions {
        review_action_results: Vec<ReviewActionResult>,
        send_with_results: Vec<SendWithResult>,
        txid: Option<String>,
        tx: Option<Vec<u8>>,
        no_send_change: Option<Vec<String>>,
    },

    #[error("authentication required: {message}")]
    Authentication { message: String },

    #[error("runtime misconfiguration: {message}")]
    Runtime { message: String },

    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    #[error("decryption failed: {message}")]
    Decryption { message: String },
}

impl WalletError {
    /// The stable kind string carried in wire responses (`kind` field of the
    /// tagged serde representation).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameter { .. } => "invalidParameter",
            Self::InsufficientFunds { .. } => "insufficientFunds",
            Self::TransactionBroadcast { .. } => "transactionBroadcast",
            Self::TransactionSize { .. } => "transactionSize",
            Self::ReviewActions { .. } => "reviewActions",
            Self::Authentication { .. } => "authentication",
            Self::Runtime { .. } => "runtime",
            Self::Timeout { .. } => "timeout",
            Self::Decryption { .. } => "decryption",
        }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }
}

pub type WalletResult<T> = Result<T, WalletError>;
