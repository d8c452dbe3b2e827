//! Lightning payment intents over a pluggable provider.
//!
//! Settled invoices become `credit_purchase:<intentId>` earn transactions,
//! which the contribution-first policy recognizes as purchased credits.

use crate::credits::CreditEngine;
use async_trait::async_trait;
use edgecoder_types::credit::{PaymentIntent, PaymentIntentStatus};
use edgecoder_types::error::{CreditError, ProviderError};
use edgecoder_types::time::now_ms;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Invoice creation request.
#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    pub amount_sats: u64,
    pub memo: String,
    pub expires_in_seconds: u64,
}

/// A created invoice.
#[derive(Debug, Clone)]
pub struct InvoiceHandle {
    pub invoice_ref: String,
    pub payment_hash: String,
    pub expires_at_ms: u64,
}

/// Settlement status of an invoice.
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    pub settled: bool,
    pub tx_ref: Option<String>,
}

/// The pluggable Lightning boundary.
#[async_trait]
pub trait LightningProvider: Send + Sync {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<InvoiceHandle, ProviderError>;
    async fn check_settlement(&self, invoice_ref: &str) -> Result<Settlement, ProviderError>;
}

/// Tracks payment intents and converts settlements into purchased credits.
pub struct PaymentManager {
    provider: Arc<dyn LightningProvider>,
    intents: Mutex<HashMap<String, PaymentIntent>>,
}

impl PaymentManager {
    pub fn new(provider: Arc<dyn LightningProvider>) -> Self {
        Self {
            provider,
            intents: Mutex::new(HashMap::new()),
        }
    }

    /// Create an intent to purchase `credits` for `amount_sats`.
    pub async fn create_intent(
        &self,
        account_id: &str,
        credits: f64,
        amount_sats: u64,
    ) -> Result<PaymentIntent, ProviderError> {
        let intent_id = uuid::Uuid::new_v4().to_string();
        let invoice = self
            .provider
            .create_invoice(InvoiceRequest {
                amount_sats,
                memo: format!("edgecoder credits {credits} for {account_id}"),
                expires_in_seconds: 15 * 60,
            })
            .await?;
        let intent = PaymentIntent {
            intent_id: intent_id.clone(),
            account_id: account_id.to_string(),
            credits,
            amount_sats,
            invoice_ref: invoice.invoice_ref,
            payment_hash: invoice.payment_hash,
            status: PaymentIntentStatus::Pending,
            created_at_ms: now_ms(),
            expires_at_ms: invoice.expires_at_ms,
        };
        self.intents.lock().insert(intent_id, intent.clone());
        info!(target: "economy", intent = %intent.intent_id, account = %intent.account_id, "payment intent created");
        Ok(intent)
    }

    pub fn get(&self, intent_id: &str) -> Result<PaymentIntent, CreditError> {
        self.intents
            .lock()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| CreditError::NotFound(intent_id.to_string()))
    }

    /// Poll every pending intent; settled ones credit the purchasing account
    /// and expired ones are closed out. Returns ids settled this pass.
    pub async fn poll_settlements(&self, engine: &CreditEngine) -> Vec<String> {
        let pending: Vec<PaymentIntent> = self
            .intents
            .lock()
            .values()
            .filter(|i| i.status == PaymentIntentStatus::Pending)
            .cloned()
            .collect();

        let mut settled_ids = Vec::new();
        let now = now_ms();
        for intent in pending {
            match self.provider.check_settlement(&intent.invoice_ref).await {
                Ok(settlement) if settlement.settled => {
                    let mut intents = self.intents.lock();
                    let Some(stored) = intents.get_mut(&intent.intent_id) else {
                        continue;
                    };
                    if stored.status != PaymentIntentStatus::Pending {
                        continue;
                    }
                    stored.status = PaymentIntentStatus::Settled;
                    drop(intents);
                    engine.earn(
                        &intent.account_id,
                        intent.credits,
                        format!("credit_purchase:{}", intent.intent_id),
                        None,
                    );
                    info!(target: "economy", intent = %intent.intent_id, "invoice settled, credits purchased");
                    settled_ids.push(intent.intent_id);
                }
                Ok(_) if now > intent.expires_at_ms => {
                    if let Some(stored) = self.intents.lock().get_mut(&intent.intent_id) {
                        stored.status = PaymentIntentStatus::Expired;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "economy", intent = %intent.intent_id, error = %e, "settlement check failed");
                }
            }
        }
        settled_ids
    }
}
