//! The peer table: identities keyed by peer id with last-seen bookkeeping.

use edgecoder_types::peer::{PeerIdentity, PeerRole};
use edgecoder_types::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Default eviction age: 120 seconds.
pub const DEFAULT_PEER_TTL_MS: u64 = 120_000;

/// One row of the peer table.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub identity: PeerIdentity,
    pub last_seen_ms: u64,
}

/// Thread-safe peer table with TTL eviction.
pub struct PeerTable {
    entries: RwLock<HashMap<PeerId, PeerEntry>>,
    ttl_ms: u64,
}

impl PeerTable {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_ms,
        }
    }

    /// Insert or refresh a peer. `last_seen_ms` only ever advances.
    pub fn upsert(&self, identity: PeerIdentity, seen_at_ms: u64) {
        let mut entries = self.entries.write();
        entries
            .entry(identity.peer_id.clone())
            .and_modify(|e| {
                e.last_seen_ms = e.last_seen_ms.max(seen_at_ms);
                e.identity = identity.clone();
            })
            .or_insert_with(|| PeerEntry {
                identity,
                last_seen_ms: seen_at_ms,
            });
    }

    /// Advance `last_seen_ms` after any successful interaction.
    pub fn touch(&self, peer_id: &str, seen_at_ms: u64) {
        if let Some(e) = self.entries.write().get_mut(peer_id) {
            e.last_seen_ms = e.last_seen_ms.max(seen_at_ms);
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerEntry> {
        self.entries.read().get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.entries.read().contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All current entries, unordered.
    pub fn all(&self) -> Vec<PeerEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Peers with a given role.
    pub fn with_role(&self, role: PeerRole) -> Vec<PeerEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| e.identity.role == role)
            .cloned()
            .collect()
    }

    /// Up to `limit` most-recently-seen peers, newest first.
    pub fn most_recent(&self, limit: usize) -> Vec<PeerEntry> {
        let mut peers = self.all();
        peers.sort_by(|a, b| b.last_seen_ms.cmp(&a.last_seen_ms));
        peers.truncate(limit);
        peers
    }

    /// Remove entries whose age is at least the table TTL. Returns the
    /// evicted peer ids.
    pub fn sweep(&self, now_ms: u64) -> Vec<PeerId> {
        let mut entries = self.entries.write();
        let expired: Vec<PeerId> = entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.last_seen_ms) >= self.ttl_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
            debug!(target: "mesh", peer = %id, "evicted stale peer");
        }
        expired
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_TTL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecoder_types::peer::NetworkMode;

    pub(crate) fn identity(id: &str) -> PeerIdentity {
        PeerIdentity {
            peer_id: id.into(),
            public_key_pem: String::new(),
            role: PeerRole::Coordinator,
            network_mode: NetworkMode::PublicMesh,
            url: format!("http://{id}.mesh:8440"),
        }
    }

    #[test]
    fn upsert_keeps_max_last_seen() {
        let table = PeerTable::default();
        table.upsert(identity("a"), 100);
        table.upsert(identity("a"), 50);
        assert_eq!(table.get("a").unwrap().last_seen_ms, 100);
        table.upsert(identity("a"), 200);
        assert_eq!(table.get("a").unwrap().last_seen_ms, 200);
    }

    #[test]
    fn sweep_evicts_exactly_at_ttl() {
        let table = PeerTable::new(1_000);
        table.upsert(identity("old"), 0);
        table.upsert(identity("fresh"), 500);

        // Age 999 survives; age exactly 1000 is evicted on the next sweep.
        assert!(table.sweep(999).is_empty());
        let evicted = table.sweep(1_000);
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(table.contains("fresh"));
    }

    #[test]
    fn most_recent_orders_and_limits() {
        let table = PeerTable::default();
        for (id, seen) in [("a", 10), ("b", 30), ("c", 20)] {
            table.upsert(identity(id), seen);
        }
        let top: Vec<String> = table
            .most_recent(2)
            .into_iter()
            .map(|e| e.identity.peer_id)
            .collect();
        assert_eq!(top, vec!["b".to_string(), "c".to_string()]);
    }
}
