//! Federated capability summaries and cross-coordinator routing.

use edgecoder_types::peer::CapabilitySummary;
use edgecoder_types::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Summaries older than this are ignored for routing decisions.
pub const SUMMARY_STALE_MS: u64 = 5 * 60 * 1000;

/// Latest capability summary per remote coordinator.
pub struct CapabilityRegistry {
    federated: RwLock<HashMap<PeerId, CapabilitySummary>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            federated: RwLock::new(HashMap::new()),
        }
    }

    /// Record a received `capability_summary`. Older summaries never replace
    /// newer ones (gossip delivery order is not preserved).
    pub fn update(&self, summary: CapabilitySummary) {
        let mut map = self.federated.write();
        match map.get(&summary.coordinator_id) {
            Some(existing) if existing.timestamp >= summary.timestamp => {}
            _ => {
                map.insert(summary.coordinator_id.clone(), summary);
            }
        }
    }

    /// All currently-known summaries.
    pub fn all(&self) -> Vec<CapabilitySummary> {
        self.federated.read().values().cloned().collect()
    }

    /// Pick a coordinator advertising live agents for `model`, preferring the
    /// least-loaded advertisement. Used when no local agent can serve a task.
    pub fn route_for_model(&self, model: &str, now_ms: u64) -> Option<PeerId> {
        let map = self.federated.read();
        map.values()
            .filter(|s| now_ms.saturating_sub(s.timestamp) < SUMMARY_STALE_MS)
            .filter_map(|s| {
                s.model_availability
                    .get(model)
                    .filter(|m| m.agent_count > 0)
                    .map(|m| (s.coordinator_id.clone(), m.avg_load))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id)
    }

    /// Drop summaries past the staleness horizon.
    pub fn prune(&self, now_ms: u64) {
        self.federated
            .write()
            .retain(|_, s| now_ms.saturating_sub(s.timestamp) < SUMMARY_STALE_MS);
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecoder_types::peer::ModelAvailability;
    use std::collections::BTreeMap;

    fn summary(id: &str, model: &str, agents: u32, load: f64, ts: u64) -> CapabilitySummary {
        let mut availability = BTreeMap::new();
        availability.insert(
            model.to_string(),
            ModelAvailability {
                agent_count: agents,
                total_param_capacity: 7_000_000_000,
                avg_load: load,
            },
        );
        CapabilitySummary {
            coordinator_id: id.into(),
            agent_count: agents,
            model_availability: availability,
            timestamp: ts,
        }
    }

    #[test]
    fn routes_to_least_loaded_coordinator() {
        let reg = CapabilityRegistry::new();
        reg.update(summary("c1", "starcoder-7b", 3, 0.9, 1_000));
        reg.update(summary("c2", "starcoder-7b", 2, 0.2, 1_000));
        assert_eq!(
            reg.route_for_model("starcoder-7b", 1_000),
            Some("c2".to_string())
        );
        assert_eq!(reg.route_for_model("unknown-model", 1_000), None);
    }

    #[test]
    fn zero_agent_summaries_never_route() {
        let reg = CapabilityRegistry::new();
        reg.update(summary("c1", "m", 0, 0.0, 1_000));
        assert_eq!(reg.route_for_model("m", 1_000), None);
    }

    #[test]
    fn stale_summaries_excluded_and_pruned() {
        let reg = CapabilityRegistry::new();
        reg.update(summary("c1", "m", 4, 0.1, 0));
        assert_eq!(reg.route_for_model("m", SUMMARY_STALE_MS), None);
        reg.prune(SUMMARY_STALE_MS);
        assert!(reg.all().is_empty());
    }

    #[test]
    fn out_of_order_updates_keep_newest() {
        let reg = CapabilityRegistry::new();
        reg.update(summary("c1", "m", 4, 0.1, 2_000));
        reg.update(summary("c1", "m", 9, 0.9, 1_000));
        assert_eq!(reg.all()[0].agent_count, 4);
    }
}
