//! The seam storage uses to ask the Chain Services layer whether a
//! candidate change output is still a live UTXO, without this crate
//! depending on `wallet-toolbox-services`.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::Output;

#[async_trait]
pub trait UtxoLivenessCheck: Send + Sync {
    /// `true` if `output` is still unspent according to the chain.
    async fn is_utxo(&self, output: &Output) -> StorageResult<bool>;
}
