//! Agent eligibility bookkeeping: heartbeats, power policy, claim gating.

use crate::rate_limit::SlidingWindowLimiter;
use edgecoder_types::error::ScheduleError;
use edgecoder_types::AgentId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Heartbeats older than this make an agent ineligible. Default 90 s.
pub const DEFAULT_HEARTBEAT_FRESH_MS: u64 = 90_000;

/// Default claim limiter: 30 claims per minute per agent.
pub const DEFAULT_CLAIMS_PER_MINUTE: usize = 30;

#[derive(Debug, Clone)]
struct AgentState {
    last_heartbeat_ms: u64,
    /// Battery/thermal policy reported by the device; phones on battery
    /// saver decline work without being penalized.
    power_ok: bool,
}

/// Registry of known worker agents and the claim eligibility gate.
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentState>>,
    claim_limiter: SlidingWindowLimiter,
    heartbeat_fresh_ms: u64,
}

impl AgentRegistry {
    pub fn new(heartbeat_fresh_ms: u64, claims_per_minute: usize) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            claim_limiter: SlidingWindowLimiter::new(claims_per_minute, 60_000),
            heartbeat_fresh_ms,
        }
    }

    /// Record a heartbeat (registration counts as one).
    pub fn heartbeat(&self, agent_id: &str, power_ok: bool, now_ms: u64) {
        let mut agents = self.agents.write();
        agents.insert(
            agent_id.to_string(),
            AgentState {
                last_heartbeat_ms: now_ms,
                power_ok,
            },
        );
    }

    /// Agents with a fresh heartbeat.
    pub fn active_count(&self, now_ms: u64) -> u64 {
        self.agents
            .read()
            .values()
            .filter(|a| now_ms.saturating_sub(a.last_heartbeat_ms) < self.heartbeat_fresh_ms)
            .count() as u64
    }

    /// The §4.3 eligibility gate: not blacklisted, heartbeat fresh, power
    /// policy satisfied, claim rate within limit.
    pub fn check_eligible(
        &self,
        agent_id: &str,
        blacklisted: bool,
        now_ms: u64,
    ) -> Result<(), ScheduleError> {
        if blacklisted {
            return Err(ScheduleError::NoEligibleAgent("agent is blacklisted".into()));
        }
        let agents = self.agents.read();
        let state = agents
            .get(agent_id)
            .ok_or_else(|| ScheduleError::NoEligibleAgent("agent not registered".into()))?;
        if now_ms.saturating_sub(state.last_heartbeat_ms) >= self.heartbeat_fresh_ms {
            return Err(ScheduleError::NoEligibleAgent("heartbeat stale".into()));
        }
        if !state.power_ok {
            return Err(ScheduleError::NoEligibleAgent(
                "power policy declined work".into(),
            ));
        }
        drop(agents);
        self.claim_limiter.check(agent_id, now_ms)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_FRESH_MS, DEFAULT_CLAIMS_PER_MINUTE)
    }
}
