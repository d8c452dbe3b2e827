//! The strike-based auto-blacklister.
//!
//! CRITICAL anomalies blacklist immediately. HIGH and WARN accumulate
//! strikes inside a sliding window; crossing the threshold blacklists.

use edgecoder_types::behavior::{AnomalyEvent, AnomalySeverity};
use edgecoder_types::AgentId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Strike window: 1 hour.
pub const STRIKE_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Strikes inside the window that trigger a blacklist.
pub const STRIKE_THRESHOLD: usize = 3;

/// A decided blacklist action, ready to become a signed audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistAction {
    pub agent_id: AgentId,
    pub rule_id: String,
    pub reason_code: String,
    pub reason: String,
    pub severity: AnomalySeverity,
    pub strikes: usize,
}

/// Converts anomaly events into blacklist actions.
pub struct AutoBlacklister {
    strikes: Mutex<HashMap<AgentId, VecDeque<u64>>>,
}

impl AutoBlacklister {
    pub fn new() -> Self {
        Self {
            strikes: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one anomaly; returns an action when the agent crosses the line.
    pub fn on_anomaly(&self, event: &AnomalyEvent, now_ms: u64) -> Option<BlacklistAction> {
        match event.severity {
            AnomalySeverity::Critical => {
                warn!(
                    target: "defense",
                    agent = %event.agent_id,
                    rule = %event.rule_id,
                    "critical anomaly, immediate blacklist"
                );
                Some(BlacklistAction {
                    agent_id: event.agent_id.clone(),
                    rule_id: event.rule_id.clone(),
                    reason_code: event.blacklist_reason.clone(),
                    reason: event.description.clone(),
                    severity: event.severity,
                    strikes: 0,
                })
            }
            AnomalySeverity::High | AnomalySeverity::Warn => {
                let mut strikes = self.strikes.lock();
                let window = strikes.entry(event.agent_id.clone()).or_default();
                while let Some(front) = window.front() {
                    if now_ms.saturating_sub(*front) >= STRIKE_WINDOW_MS {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
                window.push_back(now_ms);
                let count = window.len();
                if count >= STRIKE_THRESHOLD {
                    window.clear();
                    warn!(
                        target: "defense",
                        agent = %event.agent_id,
                        rule = %event.rule_id,
                        strikes = count,
                        "strike threshold reached, blacklisting"
                    );
                    Some(BlacklistAction {
                        agent_id: event.agent_id.clone(),
                        rule_id: event.rule_id.clone(),
                        reason_code: event.blacklist_reason.clone(),
                        reason: format!("{} ({} strikes)", event.description, count),
                        severity: event.severity,
                        strikes: count,
                    })
                } else {
                    None
                }
            }
            AnomalySeverity::Info => None,
        }
    }

    /// Strikes currently on record for an agent.
    pub fn strike_count(&self, agent_id: &str, now_ms: u64) -> usize {
        self.strikes
            .lock()
            .get(agent_id)
            .map(|w| {
                w.iter()
                    .filter(|t| now_ms.saturating_sub(**t) < STRIKE_WINDOW_MS)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for AutoBlacklister {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anomaly(severity: AnomalySeverity) -> AnomalyEvent {
        AnomalyEvent {
            rule_id: "BHV009".into(),
            agent_id: "agent-1".into(),
            severity,
            blacklist_reason: "robot_precision".into(),
            description: "test anomaly".into(),
        }
    }

    #[test]
    fn critical_blacklists_immediately() {
        let striker = AutoBlacklister::new();
        let action = striker
            .on_anomaly(&anomaly(AnomalySeverity::Critical), 0)
            .unwrap();
        assert_eq!(action.agent_id, "agent-1");
        assert_eq!(action.strikes, 0);
    }

    #[test]
    fn three_strikes_inside_window() {
        let striker = AutoBlacklister::new();
        assert!(striker.on_anomaly(&anomaly(AnomalySeverity::High), 0).is_none());
        assert!(striker.on_anomaly(&anomaly(AnomalySeverity::Warn), 1_000).is_none());
        let action = striker
            .on_anomaly(&anomaly(AnomalySeverity::High), 2_000)
            .unwrap();
        assert_eq!(action.strikes, 3);
        // The counter reset after firing.
        assert_eq!(striker.strike_count("agent-1", 2_000), 0);
    }

    #[test]
    fn strikes_age_out() {
        let striker = AutoBlacklister::new();
        striker.on_anomaly(&anomaly(AnomalySeverity::High), 0);
        striker.on_anomaly(&anomaly(AnomalySeverity::High), 1);
        // The first two strikes fall outside the window by the third.
        let third = striker.on_anomaly(&anomaly(AnomalySeverity::High), STRIKE_WINDOW_MS + 10);
        assert!(third.is_none());
        assert_eq!(striker.strike_count("agent-1", STRIKE_WINDOW_MS + 10), 1);
    }

    #[test]
    fn info_never_strikes() {
        let striker = AutoBlacklister::new();
        for t in 0..10 {
            assert!(striker.on_anomaly(&anomaly(AnomalySeverity::Info), t).is_none());
        }
        assert_eq!(striker.strike_count("agent-1", 10), 0);
    }
}
