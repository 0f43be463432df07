use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("duplicate request id {0}")]
    DuplicateRequestId(u64),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl From<ClientError> for wallet_toolbox_storage::StorageError {
    fn from(e: ClientError) -> Self {
        wallet_toolbox_storage::StorageError::Other(e.to_string())
    }
}
