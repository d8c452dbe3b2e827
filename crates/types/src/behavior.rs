//! Derived behavioral statistics and anomaly events.

use crate::ids::AgentId;
use serde::{Deserialize, Serialize};

/// Rolling-window statistics for one agent.
///
/// Always derived on demand from the event tracker, never stored as a source
/// of truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBehaviorStats {
    pub tasks_total: u64,
    pub tasks_success: u64,
    pub tasks_empty: u64,
    /// Longest run of consecutive identical output hashes.
    pub tasks_identical_streak: u64,
    pub duration_mean_ms: f64,
    pub duration_min_ms: f64,
    pub duration_stddev_ms: f64,
    pub suspiciously_fast_count: u64,
    pub signature_failures: u64,
    pub replay_attempts: u64,
    pub rate_limit_hits: u64,
    pub registrations: u64,
    pub concurrent_claims: u64,
    pub requeues: u64,
    pub max_heartbeat_gap_ms: u64,
    /// Whether the agent claimed work after its longest heartbeat gap.
    pub claimed_during_gap: bool,
    pub avg_success_output_len: f64,
}

/// Severity of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalySeverity {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

/// One rule firing for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEvent {
    pub rule_id: String,
    pub agent_id: AgentId,
    pub severity: AnomalySeverity,
    /// The reason code a resulting blacklist entry would carry.
    pub blacklist_reason: String,
    pub description: String,
}
