//! Credit economy records: transactions, contribution reports, pricing.

use crate::ids::{AccountId, TaskId};
use crate::task::ResourceClass;
use serde::{Deserialize, Serialize};

/// The reason prefix that marks a transaction as purchased credits.
pub const CREDIT_PURCHASE_PREFIX: &str = "credit_purchase:";

/// Kind of ledger entry in an account's append-only transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditTxType {
    Earn,
    Spend,
    Adjust,
    /// An audit annotation for credits promised against future work. Does not
    /// move balance.
    Held,
}

/// One append-only row in an account's credit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub tx_id: String,
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub tx_type: CreditTxType,
    pub credits: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<TaskId>,
    pub timestamp_ms: u64,
}

impl CreditTransaction {
    /// Whether this row represents purchased (as opposed to contributed)
    /// credits.
    pub fn is_purchase(&self) -> bool {
        self.tx_type == CreditTxType::Earn && self.reason.starts_with(CREDIT_PURCHASE_PREFIX)
    }
}

/// A worker's metered usage report, the input to accrual.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionReport {
    pub report_id: String,
    pub account_id: AccountId,
    pub cpu_seconds_equivalent: f64,
    pub resource_class: ResourceClass,
    /// Quality score in [0, 1] attached by the verifier pipeline, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<TaskId>,
}

/// A point-in-time load observation used by accrual and pricing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSnapshot {
    pub queued_tasks: u64,
    pub active_agents: u64,
    pub capacity: u64,
}

impl LoadSnapshot {
    /// `(queuedTasks + activeAgents) / capacity`, guarding the zero case.
    pub fn pressure(&self) -> f64 {
        let cap = self.capacity.max(1) as f64;
        (self.queued_tasks + self.active_agents) as f64 / cap
    }
}

/// A compute price quote in satoshis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub resource_class: ResourceClass,
    pub price_per_compute_unit_sats: f64,
    pub scarcity: f64,
}

/// Lifecycle of a Lightning payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    Pending,
    Settled,
    Expired,
}

/// A pending purchase of credits via a Lightning invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub intent_id: String,
    pub account_id: AccountId,
    pub credits: f64,
    pub amount_sats: u64,
    pub invoice_ref: String,
    pub payment_hash: String,
    pub status: PaymentIntentStatus,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}
