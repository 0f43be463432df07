//! Storage-local error type. Translated to [`wallet_toolbox_common::WalletError`]
//! by callers that sit above the storage boundary (the signer, the façade).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument '{field}': {message}")]
    InvalidArgument { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
