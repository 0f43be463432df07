//! Adapts the multiplexed Chain Services view to the narrow
//! `UtxoLivenessCheck` seam Storage uses for the `invalid-change` SpecOp
//!, so `wallet-toolbox-storage` never has to depend on
//! `wallet-toolbox-services`.

use std::sync::Arc;

use async_trait::async_trait;
use wallet_toolbox_services::{ServiceProvider, UtxoStatusFormat, UtxoStatusRequest};
use wallet_toolbox_storage::services::UtxoLivenessCheck;
use wallet_toolbox_storage::{Output, StorageError, StorageResult};

pub struct ServicesLivenessCheck {
    services: Arc<dyn ServiceProvider>,
}

impl ServicesLivenessCheck {
    pub fn new(services: Arc<dyn ServiceProvider>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl UtxoLivenessCheck for ServicesLivenessCheck {
    async fn is_utxo(&self, output: &Output) -> StorageResult<bool> {
        let outpoint = match &output.txid {
            Some(txid) => format!("{txid}.{}", output.vout),
            None => return Ok(false),
        };
        let request = UtxoStatusRequest {
            output: output
                .locking_script
                .as_ref()
                .map(hex::encode)
                .unwrap_or_default(),
            format: UtxoStatusFormat::Outpoint,
            outpoint: Some(outpoint),
        };
        let response = self
            .services
            .get_utxo_status(request)
            .await
            .map_err(|e| StorageError::Other(format!("chain services UTXO status lookup failed: {e}")))?;
        Ok(response.is_utxo)
    }
}
