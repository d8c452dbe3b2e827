//! The ten anomaly rules, BHV001–BHV010.
//!
//! Each rule maps rolling stats to an optional [`AnomalyEvent`]. Thresholds
//! live next to their rule and match what federated coordinators enforce.

use crate::tracker::HEARTBEAT_GAP_MS;
use edgecoder_types::behavior::{AgentBehaviorStats, AnomalyEvent, AnomalySeverity};

/// Knobs the rules need from the scheduler's configuration.
#[derive(Debug, Clone, Copy)]
pub struct RulesConfig {
    /// Allowed concurrent claims per agent; BHV007 fires above double this.
    pub max_concurrent_claims: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_concurrent_claims: 4,
        }
    }
}

fn event(
    rule_id: &str,
    agent_id: &str,
    severity: AnomalySeverity,
    blacklist_reason: &str,
    description: String,
) -> AnomalyEvent {
    AnomalyEvent {
        rule_id: rule_id.to_string(),
        agent_id: agent_id.to_string(),
        severity,
        blacklist_reason: blacklist_reason.to_string(),
        description,
    }
}

/// Run every rule against one agent's stats.
pub fn evaluate(
    agent_id: &str,
    stats: &AgentBehaviorStats,
    config: &RulesConfig,
) -> Vec<AnomalyEvent> {
    let mut events = Vec::new();

    // BHV001: results far below plausible inference latency.
    if stats.suspiciously_fast_count >= 3 && stats.duration_mean_ms < 1_000.0 {
        events.push(event(
            "BHV001",
            agent_id,
            AnomalySeverity::Critical,
            "suspiciously_fast_results",
            format!(
                "{} results under 500ms with mean {:.0}ms",
                stats.suspiciously_fast_count, stats.duration_mean_ms
            ),
        ));
    }

    // BHV002: mass empty output.
    if stats.tasks_empty >= 5
        && stats.tasks_total > 0
        && stats.tasks_empty as f64 / stats.tasks_total as f64 > 0.6
    {
        events.push(event(
            "BHV002",
            agent_id,
            AnomalySeverity::High,
            "mass_empty_results",
            format!("{}/{} results empty", stats.tasks_empty, stats.tasks_total),
        ));
    }

    // BHV003: consecutive identical output hashes.
    if stats.tasks_identical_streak >= 3 {
        events.push(event(
            "BHV003",
            agent_id,
            AnomalySeverity::Critical,
            "forged_results",
            format!(
                "{} consecutive identical output hashes",
                stats.tasks_identical_streak
            ),
        ));
    }

    // BHV004: success collapse.
    if stats.tasks_total >= 10 {
        let success_rate = stats.tasks_success as f64 / stats.tasks_total as f64;
        if success_rate < 0.15 {
            events.push(event(
                "BHV004",
                agent_id,
                AnomalySeverity::High,
                "success_collapse",
                format!("success rate {:.0}% over {} tasks", success_rate * 100.0, stats.tasks_total),
            ));
        }
    }

    // BHV005: protocol abuse.
    if stats.signature_failures + stats.replay_attempts >= 5 {
        events.push(event(
            "BHV005",
            agent_id,
            AnomalySeverity::Critical,
            "protocol_abuse",
            format!(
                "{} signature failures, {} replays",
                stats.signature_failures, stats.replay_attempts
            ),
        ));
    }

    // BHV006: heartbeat manipulation while still claiming.
    if stats.max_heartbeat_gap_ms > HEARTBEAT_GAP_MS && stats.claimed_during_gap {
        events.push(event(
            "BHV006",
            agent_id,
            AnomalySeverity::High,
            "heartbeat_manipulation",
            format!("claimed work across a {}ms heartbeat gap", stats.max_heartbeat_gap_ms),
        ));
    }

    // BHV007: task hoarding.
    if stats.concurrent_claims > 2 * config.max_concurrent_claims || stats.requeues >= 8 {
        events.push(event(
            "BHV007",
            agent_id,
            AnomalySeverity::High,
            "task_hoarding",
            format!(
                "{} concurrent claims, {} requeues",
                stats.concurrent_claims, stats.requeues
            ),
        ));
    }

    // BHV008: registration storm.
    if stats.registrations >= 10 {
        events.push(event(
            "BHV008",
            agent_id,
            AnomalySeverity::High,
            "registration_storm",
            format!("{} registrations in 10 minutes", stats.registrations),
        ));
    }

    // BHV009: inhumanly uniform timings.
    if stats.tasks_total >= 10 && stats.duration_stddev_ms < 50.0 {
        events.push(event(
            "BHV009",
            agent_id,
            AnomalySeverity::Warn,
            "robot_precision",
            format!(
                "duration stddev {:.1}ms over {} tasks",
                stats.duration_stddev_ms, stats.tasks_total
            ),
        ));
    }

    // BHV010: trivially small "successful" outputs.
    if stats.tasks_success >= 5 && stats.avg_success_output_len < 10.0 {
        events.push(event(
            "BHV010",
            agent_id,
            AnomalySeverity::Warn,
            "tiny_outputs",
            format!(
                "avg output length {:.1} over {} successes",
                stats.avg_success_output_len, stats.tasks_success
            ),
        ));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> AgentBehaviorStats {
        AgentBehaviorStats::default()
    }

    fn rule_ids(events: &[AnomalyEvent]) -> Vec<&str> {
        events.iter().map(|e| e.rule_id.as_str()).collect()
    }

    #[test]
    fn clean_agent_fires_nothing() {
        let s = AgentBehaviorStats {
            tasks_total: 20,
            tasks_success: 18,
            duration_mean_ms: 4_000.0,
            duration_stddev_ms: 900.0,
            avg_success_output_len: 240.0,
            ..stats()
        };
        assert!(evaluate("a", &s, &RulesConfig::default()).is_empty());
    }

    #[test]
    fn bhv001_fast_results() {
        let s = AgentBehaviorStats {
            suspiciously_fast_count: 3,
            duration_mean_ms: 400.0,
            tasks_total: 3,
            ..stats()
        };
        let events = evaluate("a", &s, &RulesConfig::default());
        assert_eq!(rule_ids(&events), vec!["BHV001"]);
        assert_eq!(events[0].severity, AnomalySeverity::Critical);
    }

    #[test]
    fn bhv001_requires_low_mean() {
        let s = AgentBehaviorStats {
            suspiciously_fast_count: 3,
            duration_mean_ms: 1_500.0,
            tasks_total: 10,
            tasks_success: 10,
            duration_stddev_ms: 2_000.0,
            avg_success_output_len: 100.0,
            ..stats()
        };
        assert!(evaluate("a", &s, &RulesConfig::default()).is_empty());
    }

    #[test]
    fn bhv002_mass_empty() {
        let s = AgentBehaviorStats {
            tasks_total: 7,
            tasks_empty: 5,
            duration_mean_ms: 2_000.0,
            ..stats()
        };
        assert_eq!(rule_ids(&evaluate("a", &s, &RulesConfig::default())), vec!["BHV002"]);
    }

    #[test]
    fn bhv003_identical_streak() {
        let s = AgentBehaviorStats {
            tasks_identical_streak: 3,
            tasks_total: 3,
            duration_mean_ms: 2_000.0,
            ..stats()
        };
        let events = evaluate("a", &s, &RulesConfig::default());
        assert_eq!(events[0].rule_id, "BHV003");
        assert_eq!(events[0].blacklist_reason, "forged_results");
        assert_eq!(events[0].severity, AnomalySeverity::Critical);
    }

    #[test]
    fn bhv004_success_collapse_needs_volume() {
        let low_volume = AgentBehaviorStats {
            tasks_total: 9,
            tasks_success: 0,
            duration_mean_ms: 2_000.0,
            ..stats()
        };
        assert!(evaluate("a", &low_volume, &RulesConfig::default()).is_empty());

        let collapsed = AgentBehaviorStats {
            tasks_total: 10,
            tasks_success: 1,
            duration_mean_ms: 2_000.0,
            ..stats()
        };
        assert_eq!(
            rule_ids(&evaluate("a", &collapsed, &RulesConfig::default())),
            vec!["BHV004"]
        );
    }

    #[test]
    fn bhv005_protocol_abuse_sums_failures_and_replays() {
        let s = AgentBehaviorStats {
            signature_failures: 3,
            replay_attempts: 2,
            ..stats()
        };
        assert_eq!(rule_ids(&evaluate("a", &s, &RulesConfig::default())), vec!["BHV005"]);
    }

    #[test]
    fn bhv006_gap_claiming() {
        let s = AgentBehaviorStats {
            max_heartbeat_gap_ms: HEARTBEAT_GAP_MS + 1,
            claimed_during_gap: true,
            ..stats()
        };
        assert_eq!(rule_ids(&evaluate("a", &s, &RulesConfig::default())), vec!["BHV006"]);
    }

    #[test]
    fn bhv007_hoarding_by_claims_or_requeues() {
        let claims = AgentBehaviorStats {
            concurrent_claims: 9,
            ..stats()
        };
        assert_eq!(rule_ids(&evaluate("a", &claims, &RulesConfig::default())), vec!["BHV007"]);

        let requeues = AgentBehaviorStats {
            requeues: 8,
            ..stats()
        };
        assert_eq!(
            rule_ids(&evaluate("a", &requeues, &RulesConfig::default())),
            vec!["BHV007"]
        );
    }

    #[test]
    fn bhv008_registration_storm() {
        let s = AgentBehaviorStats {
            registrations: 10,
            ..stats()
        };
        assert_eq!(rule_ids(&evaluate("a", &s, &RulesConfig::default())), vec!["BHV008"]);
    }

    #[test]
    fn bhv009_robot_precision() {
        let s = AgentBehaviorStats {
            tasks_total: 10,
            tasks_success: 10,
            duration_mean_ms: 2_000.0,
            duration_stddev_ms: 20.0,
            avg_success_output_len: 100.0,
            ..stats()
        };
        let events = evaluate("a", &s, &RulesConfig::default());
        assert_eq!(rule_ids(&events), vec!["BHV009"]);
        assert_eq!(events[0].severity, AnomalySeverity::Warn);
    }

    #[test]
    fn bhv010_tiny_outputs() {
        let s = AgentBehaviorStats {
            tasks_total: 5,
            tasks_success: 5,
            duration_mean_ms: 2_000.0,
            duration_stddev_ms: 600.0,
            avg_success_output_len: 4.0,
            ..stats()
        };
        assert_eq!(rule_ids(&evaluate("a", &s, &RulesConfig::default())), vec!["BHV010"]);
    }
}
