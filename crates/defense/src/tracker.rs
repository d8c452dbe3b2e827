//! Rolling per-agent behavior tracking.
//!
//! Events are recorded with timestamps; each query prunes entries outside the
//! window and derives [`AgentBehaviorStats`] on demand. Nothing here is a
//! source of truth.

use edgecoder_crypto::sha256_hex;
use edgecoder_types::behavior::AgentBehaviorStats;
use edgecoder_types::AgentId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Default rolling window: 1 hour.
pub const DEFAULT_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Registration-storm detection uses this narrower sub-window.
pub const REGISTRATION_WINDOW_MS: u64 = 10 * 60 * 1000;

/// Heartbeat gaps beyond this count as manipulation when claims continue.
pub const HEARTBEAT_GAP_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone)]
enum Event {
    TaskResult {
        ok: bool,
        empty: bool,
        output_hash: String,
        output_len: u64,
        duration_ms: u64,
    },
    SignatureFailure,
    ReplayAttempt,
    RateLimitHit,
    Registration,
    Claim,
    Requeue,
    Heartbeat,
}

type Timeline = VecDeque<(u64, Event)>;

/// Records behavioral events and derives rolling statistics.
pub struct BehaviorTracker {
    window_ms: u64,
    agents: Mutex<HashMap<AgentId, Timeline>>,
}

impl BehaviorTracker {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            agents: Mutex::new(HashMap::new()),
        }
    }

    fn push(&self, agent_id: &str, at_ms: u64, event: Event) {
        let mut agents = self.agents.lock();
        agents
            .entry(agent_id.to_string())
            .or_default()
            .push_back((at_ms, event));
    }

    pub fn record_task_result(
        &self,
        agent_id: &str,
        at_ms: u64,
        ok: bool,
        output: &str,
        duration_ms: u64,
    ) {
        self.push(
            agent_id,
            at_ms,
            Event::TaskResult {
                ok,
                empty: output.trim().is_empty(),
                output_hash: sha256_hex(output.as_bytes()),
                output_len: output.len() as u64,
                duration_ms,
            },
        );
    }

    pub fn record_signature_failure(&self, agent_id: &str, at_ms: u64) {
        self.push(agent_id, at_ms, Event::SignatureFailure);
    }

    pub fn record_replay(&self, agent_id: &str, at_ms: u64) {
        self.push(agent_id, at_ms, Event::ReplayAttempt);
    }

    pub fn record_rate_limit_hit(&self, agent_id: &str, at_ms: u64) {
        self.push(agent_id, at_ms, Event::RateLimitHit);
    }

    pub fn record_registration(&self, agent_id: &str, at_ms: u64) {
        self.push(agent_id, at_ms, Event::Registration);
    }

    pub fn record_claim(&self, agent_id: &str, at_ms: u64) {
        self.push(agent_id, at_ms, Event::Claim);
    }

    pub fn record_requeue(&self, agent_id: &str, at_ms: u64) {
        self.push(agent_id, at_ms, Event::Requeue);
    }

    pub fn record_heartbeat(&self, agent_id: &str, at_ms: u64) {
        self.push(agent_id, at_ms, Event::Heartbeat);
    }

    /// Derive the rolling stats for one agent, pruning expired events.
    pub fn stats(&self, agent_id: &str, now_ms: u64) -> AgentBehaviorStats {
        let mut agents = self.agents.lock();
        let Some(timeline) = agents.get_mut(agent_id) else {
            return AgentBehaviorStats::default();
        };
        while let Some((at, _)) = timeline.front() {
            if now_ms.saturating_sub(*at) >= self.window_ms {
                timeline.pop_front();
            } else {
                break;
            }
        }

        let mut stats = AgentBehaviorStats::default();
        let mut durations: Vec<f64> = Vec::new();
        let mut success_len_sum = 0u64;
        let mut identical_run = 0u64;
        let mut last_hash: Option<&str> = None;
        let mut claims = 0u64;
        let mut results = 0u64;
        let mut heartbeats: Vec<u64> = Vec::new();
        let mut claim_times: Vec<u64> = Vec::new();

        for (at, event) in timeline.iter() {
            match event {
                Event::TaskResult {
                    ok,
                    empty,
                    output_hash,
                    output_len,
                    duration_ms,
                } => {
                    results += 1;
                    stats.tasks_total += 1;
                    if *ok {
                        stats.tasks_success += 1;
                        success_len_sum += output_len;
                    }
                    if *empty {
                        stats.tasks_empty += 1;
                    }
                    if *duration_ms < 500 {
                        stats.suspiciously_fast_count += 1;
                    }
                    durations.push(*duration_ms as f64);
                    if last_hash == Some(output_hash.as_str()) {
                        identical_run += 1;
                    } else {
                        identical_run = 1;
                        last_hash = Some(output_hash.as_str());
                    }
                    stats.tasks_identical_streak = stats.tasks_identical_streak.max(identical_run);
                }
                Event::SignatureFailure => stats.signature_failures += 1,
                Event::ReplayAttempt => stats.replay_attempts += 1,
                Event::RateLimitHit => stats.rate_limit_hits += 1,
                Event::Registration => {
                    if now_ms.saturating_sub(*at) < REGISTRATION_WINDOW_MS {
                        stats.registrations += 1;
                    }
                }
                Event::Claim => {
                    claims += 1;
                    claim_times.push(*at);
                }
                Event::Requeue => stats.requeues += 1,
                Event::Heartbeat => heartbeats.push(*at),
            }
        }

        stats.concurrent_claims = claims.saturating_sub(results);
        if !durations.is_empty() {
            let n = durations.len() as f64;
            let mean = durations.iter().sum::<f64>() / n;
            stats.duration_mean_ms = mean;
            stats.duration_min_ms = durations.iter().cloned().fold(f64::INFINITY, f64::min);
            let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
            stats.duration_stddev_ms = variance.sqrt();
        }
        if stats.tasks_success > 0 {
            stats.avg_success_output_len = success_len_sum as f64 / stats.tasks_success as f64;
        }

        // Heartbeat gaps: between consecutive beats, and from the last beat
        // to now.
        let mut max_gap = 0u64;
        for pair in heartbeats.windows(2) {
            max_gap = max_gap.max(pair[1].saturating_sub(pair[0]));
        }
        if let Some(last) = heartbeats.last() {
            max_gap = max_gap.max(now_ms.saturating_sub(*last));
        }
        stats.max_heartbeat_gap_ms = max_gap;
        stats.claimed_during_gap = claim_times.iter().any(|claim_at| {
            let last_beat_before = heartbeats.iter().filter(|h| *h <= claim_at).max();
            match last_beat_before {
                Some(beat) => claim_at.saturating_sub(*beat) > HEARTBEAT_GAP_MS,
                None => false,
            }
        });
        stats
    }
}

impl Default for BehaviorTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_outside_window_are_pruned() {
        let tracker = BehaviorTracker::new(1_000);
        tracker.record_task_result("a", 0, true, "out", 800);
        tracker.record_task_result("a", 900, true, "out2", 800);
        let stats = tracker.stats("a", 1_000);
        assert_eq!(stats.tasks_total, 1);
    }

    #[test]
    fn identical_streak_requires_consecutive_hashes() {
        let tracker = BehaviorTracker::default();
        tracker.record_task_result("a", 1, true, "same", 700);
        tracker.record_task_result("a", 2, true, "same", 700);
        tracker.record_task_result("a", 3, true, "different", 700);
        tracker.record_task_result("a", 4, true, "same", 700);
        let stats = tracker.stats("a", 5);
        assert_eq!(stats.tasks_identical_streak, 2);
    }

    #[test]
    fn duration_moments() {
        let tracker = BehaviorTracker::default();
        for d in [100u64, 200, 300] {
            tracker.record_task_result("a", 1, true, "x", d);
        }
        let stats = tracker.stats("a", 2);
        assert!((stats.duration_mean_ms - 200.0).abs() < 1e-9);
        assert!((stats.duration_min_ms - 100.0).abs() < 1e-9);
        assert_eq!(stats.suspiciously_fast_count, 3);
        assert!(stats.duration_stddev_ms > 0.0);
    }

    #[test]
    fn registrations_use_narrow_window() {
        let tracker = BehaviorTracker::default();
        tracker.record_registration("a", 0);
        tracker.record_registration("a", REGISTRATION_WINDOW_MS + 1_000);
        let stats = tracker.stats("a", REGISTRATION_WINDOW_MS + 2_000);
        assert_eq!(stats.registrations, 1);
    }

    #[test]
    fn claim_during_heartbeat_gap_detected() {
        let tracker = BehaviorTracker::default();
        tracker.record_heartbeat("a", 0);
        // Claim six minutes after the last heartbeat.
        tracker.record_claim("a", HEARTBEAT_GAP_MS + 60_000);
        let stats = tracker.stats("a", HEARTBEAT_GAP_MS + 61_000);
        assert!(stats.claimed_during_gap);
        assert!(stats.max_heartbeat_gap_ms > HEARTBEAT_GAP_MS);
    }

    #[test]
    fn concurrent_claims_is_claims_minus_results() {
        let tracker = BehaviorTracker::default();
        for i in 0..5 {
            tracker.record_claim("a", i);
        }
        tracker.record_task_result("a", 6, true, "x", 1_000);
        assert_eq!(tracker.stats("a", 7).concurrent_claims, 4);
    }

    #[test]
    fn unknown_agent_is_all_zeroes() {
        let tracker = BehaviorTracker::default();
        let stats = tracker.stats("nobody", 0);
        assert_eq!(stats.tasks_total, 0);
        assert_eq!(stats.duration_mean_ms, 0.0);
    }
}
