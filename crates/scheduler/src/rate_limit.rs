//! Sliding-window rate limiting, keyed by account or agent.

use edgecoder_types::error::ScheduleError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A per-key sliding window limiter: at most `limit` events per `window_ms`.
pub struct SlidingWindowLimiter {
    limit: usize,
    window_ms: u64,
    events: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Default submission limiter: 5 intent-creations per 15 minutes.
    pub fn submissions() -> Self {
        Self::new(5, 15 * 60 * 1000)
    }

    /// Record an event for `key`, rejecting it when the window is full.
    pub fn check(&self, key: &str, now_ms: u64) -> Result<(), ScheduleError> {
        let mut events = self.events.lock();
        let window = events.entry(key.to_string()).or_default();
        while let Some(front) = window.front() {
            if now_ms.saturating_sub(*front) >= self.window_ms {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.limit {
            return Err(ScheduleError::RateLimited);
        }
        window.push_back(now_ms);
        Ok(())
    }

    /// Events currently inside the window for `key`.
    pub fn in_window(&self, key: &str, now_ms: u64) -> usize {
        let events = self.events.lock();
        events
            .get(key)
            .map(|w| {
                w.iter()
                    .filter(|t| now_ms.saturating_sub(**t) < self.window_ms)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop keys whose entire window has lapsed (periodic housekeeping).
    pub fn prune(&self, now_ms: u64) {
        self.events.lock().retain(|_, w| {
            w.back()
                .map(|t| now_ms.saturating_sub(*t) < self.window_ms)
                .unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = SlidingWindowLimiter::new(3, 1_000);
        for _ in 0..3 {
            limiter.check("a", 0).unwrap();
        }
        assert_eq!(
            limiter.check("a", 999).unwrap_err(),
            ScheduleError::RateLimited
        );
        // Keys are independent.
        limiter.check("b", 999).unwrap();
    }

    #[test]
    fn window_slides() {
        let limiter = SlidingWindowLimiter::new(2, 1_000);
        limiter.check("a", 0).unwrap();
        limiter.check("a", 500).unwrap();
        assert!(limiter.check("a", 999).is_err());
        // The first event ages out exactly at the window edge.
        limiter.check("a", 1_000).unwrap();
    }

    #[test]
    fn prune_drops_idle_keys() {
        let limiter = SlidingWindowLimiter::new(2, 1_000);
        limiter.check("a", 0).unwrap();
        limiter.prune(2_000);
        assert_eq!(limiter.in_window("a", 2_000), 0);
    }
}
