//! Rolling issuance records: epochs, per-account allocations, payout events.

use crate::ids::{AccountId, PeerId};
use serde::{Deserialize, Serialize};

/// One recomputation window of the rolling issuance schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceEpoch {
    pub issuance_epoch_id: String,
    pub coordinator_id: PeerId,
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    /// EMA-smoothed load index the pool size was derived from.
    pub load_index: f64,
    pub daily_pool_tokens: f64,
    pub hourly_tokens: f64,
    pub total_weighted_contribution: f64,
    pub contribution_count: u64,
    pub finalized: bool,
    pub created_at_ms: u64,
}

/// Tokens allocated to one account inside an epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceAllocation {
    pub issuance_epoch_id: String,
    pub account_id: AccountId,
    pub weighted_contribution: f64,
    pub issued_tokens: f64,
}

/// Recipient class of a payout tranche.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutTranche {
    Contributor,
    Coordinator,
    Reserve,
}

/// One tranche disbursed for an epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuancePayoutEvent {
    pub issuance_epoch_id: String,
    pub tranche: PayoutTranche,
    pub account_id: AccountId,
    pub tokens: f64,
    pub created_at_ms: u64,
}
