//! Per-peer reconnection state with exponential backoff.

use dashmap::DashMap;
use edgecoder_types::PeerId;
use rand::Rng;

/// Backoff tuning. Defaults: base 500 ms, cap 30 s, ±10 % jitter, 8 attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            cap_ms: 30_000,
            jitter: 0.10,
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PeerBackoff {
    attempts: u32,
    not_before_ms: u64,
    gave_up: bool,
}

/// Reconnection bookkeeping for every peer we talk to.
///
/// Entries are mutated under their own map shard, so one peer's failure
/// handling never blocks another's.
pub struct ReconnectRegistry {
    policy: BackoffPolicy,
    peers: DashMap<PeerId, PeerBackoff>,
}

impl ReconnectRegistry {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            peers: DashMap::new(),
        }
    }

    /// Whether we may attempt delivery to this peer right now.
    pub fn ready(&self, peer_id: &str, now_ms: u64) -> bool {
        match self.peers.get(peer_id) {
            Some(s) => !s.gave_up && now_ms >= s.not_before_ms,
            None => true,
        }
    }

    /// Whether the peer exhausted its attempts.
    pub fn gave_up(&self, peer_id: &str) -> bool {
        self.peers.get(peer_id).map(|s| s.gave_up).unwrap_or(false)
    }

    /// Record a failed interaction; returns the delay before the next
    /// attempt, or `None` once the peer is given up on.
    pub fn on_failure(&self, peer_id: &str, now_ms: u64) -> Option<u64> {
        let mut entry = self.peers.entry(peer_id.to_string()).or_default();
        entry.attempts += 1;
        if entry.attempts >= self.policy.max_attempts {
            entry.gave_up = true;
            return None;
        }
        let exp = self
            .policy
            .base_ms
            .saturating_mul(1u64 << (entry.attempts - 1).min(31))
            .min(self.policy.cap_ms);
        let jitter_span = (exp as f64 * self.policy.jitter) as i64;
        let jitter = if jitter_span > 0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };
        let delay = (exp as i64 + jitter).max(0) as u64;
        entry.not_before_ms = now_ms.saturating_add(delay);
        Some(delay)
    }

    /// A successful interaction resets the peer's state.
    pub fn on_success(&self, peer_id: &str) {
        self.peers.remove(peer_id);
    }

    /// Operator action or peer-exchange re-learning restarts a given-up peer.
    pub fn restart(&self, peer_id: &str) {
        self.peers.remove(peer_id);
    }
}

impl Default for ReconnectRegistry {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict_policy() -> BackoffPolicy {
        BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        }
    }

    #[test]
    fn delays_double_up_to_cap() {
        let reg = ReconnectRegistry::new(strict_policy());
        let delays: Vec<u64> = (0..7).filter_map(|_| reg.on_failure("p", 0)).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 8_000, 16_000, 30_000]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let reg = ReconnectRegistry::new(strict_policy());
        for _ in 0..7 {
            assert!(reg.on_failure("p", 0).is_some());
        }
        assert_eq!(reg.on_failure("p", 0), None);
        assert!(reg.gave_up("p"));
        assert!(!reg.ready("p", u64::MAX));
    }

    #[test]
    fn success_resets() {
        let reg = ReconnectRegistry::new(strict_policy());
        reg.on_failure("p", 0);
        reg.on_failure("p", 0);
        reg.on_success("p");
        assert!(reg.ready("p", 0));
        assert_eq!(reg.on_failure("p", 0), Some(500));
    }

    #[test]
    fn restart_revives_given_up_peer() {
        let reg = ReconnectRegistry::new(strict_policy());
        for _ in 0..8 {
            reg.on_failure("p", 0);
        }
        assert!(reg.gave_up("p"));
        reg.restart("p");
        assert!(reg.ready("p", 0));
    }

    #[test]
    fn not_ready_until_delay_elapses() {
        let reg = ReconnectRegistry::new(strict_policy());
        let delay = reg.on_failure("p", 1_000).unwrap();
        assert!(!reg.ready("p", 1_000 + delay - 1));
        assert!(reg.ready("p", 1_000 + delay));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let reg = ReconnectRegistry::default();
        for _ in 0..50 {
            let d = reg.on_failure("q", 0).unwrap();
            assert!((450..=550).contains(&d), "first delay {d} out of range");
            reg.on_success("q");
        }
    }
}
