//! Default provider implementations selected at startup.
//!
//! Real deployments plug in Bitcoin/Lightning RPC clients; the disabled
//! variants surface `provider_unavailable` so callers degrade cleanly.

use async_trait::async_trait;
use edgecoder_economy::{InvoiceHandle, InvoiceRequest, LightningProvider, Settlement};
use edgecoder_ledger::{AnchorConfirmation, AnchorProvider, AnchorTx};
use edgecoder_types::error::ProviderError;

/// Anchoring disabled: every call reports the provider unavailable.
pub struct DisabledAnchor;

#[async_trait]
impl AnchorProvider for DisabledAnchor {
    async fn broadcast_op_return(&self, _data_hex: &str) -> Result<AnchorTx, ProviderError> {
        Err(ProviderError::Unavailable("anchoring disabled".into()))
    }

    async fn get_confirmations(&self, _txid: &str) -> Result<AnchorConfirmation, ProviderError> {
        Err(ProviderError::Unavailable("anchoring disabled".into()))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Err(ProviderError::Unavailable("anchoring disabled".into()))
    }
}

/// Lightning disabled: intent creation fails with `provider_unavailable`.
pub struct DisabledLightning;

#[async_trait]
impl LightningProvider for DisabledLightning {
    async fn create_invoice(
        &self,
        _request: InvoiceRequest,
    ) -> Result<InvoiceHandle, ProviderError> {
        Err(ProviderError::Unavailable("lightning disabled".into()))
    }

    async fn check_settlement(&self, _invoice_ref: &str) -> Result<Settlement, ProviderError> {
        Err(ProviderError::Unavailable("lightning disabled".into()))
    }
}
