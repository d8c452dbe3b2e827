//! Peer exchange: periodic advertisement and merge of peer tables.
//!
//! Eventual consistency of the peer set with bounded propagation delay: every
//! cycle each coordinator gossips its most-recently-seen peers; receivers
//! merge unknown entries and advance known ones to the freshest sighting.

use crate::backoff::ReconnectRegistry;
use crate::peer_table::PeerTable;
use edgecoder_crypto::KeyRing;
use edgecoder_types::peer::PeerIdentity;
use edgecoder_types::time::now_ms;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cap on peers advertised per exchange message.
pub const EXCHANGE_PEER_LIMIT: usize = 50;

/// One advertised peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePeer {
    pub identity: PeerIdentity,
    pub last_seen_ms: u64,
}

/// The `peer_exchange` gossip payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerExchangePayload {
    pub peers: Vec<ExchangePeer>,
}

/// Build this coordinator's exchange payload: up to 50 most-recently-seen
/// peers plus its own identity.
pub fn build_payload(table: &PeerTable, own: &PeerIdentity) -> PeerExchangePayload {
    let mut peers: Vec<ExchangePeer> = table
        .most_recent(EXCHANGE_PEER_LIMIT.saturating_sub(1))
        .into_iter()
        .map(|e| ExchangePeer {
            identity: e.identity,
            last_seen_ms: e.last_seen_ms,
        })
        .collect();
    peers.push(ExchangePeer {
        identity: own.clone(),
        last_seen_ms: now_ms(),
    });
    PeerExchangePayload { peers }
}

/// Merge a received exchange payload into the local peer table and key ring.
///
/// Unknown peers are added (and their keys registered); for known peers
/// `lastSeenMs` advances to the max of current and remote. Given-up
/// reconnection state is cleared for re-learned peers. Returns the number of
/// newly-learned peers.
pub fn apply_payload(
    payload: &PeerExchangePayload,
    own_peer_id: &str,
    table: &PeerTable,
    keyring: &KeyRing,
    reconnect: &ReconnectRegistry,
) -> usize {
    let now = now_ms();
    let mut learned = 0;
    for peer in &payload.peers {
        let id = &peer.identity.peer_id;
        if id == own_peer_id {
            continue;
        }
        if !peer.identity.public_key_pem.is_empty() {
            if let Err(e) = keyring.register_pem(id, &peer.identity.public_key_pem, now) {
                debug!(target: "mesh", peer = %id, error = %e, "skipping peer with bad key");
                continue;
            }
        }
        if !table.contains(id) {
            learned += 1;
        }
        if reconnect.gave_up(id) {
            reconnect.restart(id);
        }
        table.upsert(peer.identity.clone(), peer.last_seen_ms.min(now));
    }
    learned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use edgecoder_crypto::Keypair;
    use edgecoder_types::peer::{NetworkMode, PeerRole};
    use std::collections::HashSet;

    struct Node {
        id: String,
        identity: PeerIdentity,
        table: PeerTable,
        keyring: KeyRing,
        reconnect: ReconnectRegistry,
    }

    fn node(i: usize, kp: &Keypair) -> Node {
        let id = format!("node-{i}");
        Node {
            identity: PeerIdentity {
                peer_id: id.clone(),
                public_key_pem: kp.public_key().to_spki_pem().unwrap(),
                role: PeerRole::Coordinator,
                network_mode: NetworkMode::PublicMesh,
                url: format!("http://node-{i}.mesh:8440"),
            },
            table: PeerTable::default(),
            keyring: KeyRing::default(),
            reconnect: ReconnectRegistry::new(BackoffPolicy::default()),
            id,
        }
    }

    /// Five nodes wired in a line 0-1-2-3-4: after two exchange cycles every
    /// node knows every other node.
    #[test]
    fn line_topology_converges_in_two_cycles() {
        let kp = Keypair::generate();
        let nodes: Vec<Node> = (0..5).map(|i| node(i, &kp)).collect();

        // Registration makes each link mutual.
        for i in 0..4 {
            let now = now_ms();
            nodes[i].table.upsert(nodes[i + 1].identity.clone(), now);
            nodes[i + 1].table.upsert(nodes[i].identity.clone(), now);
        }

        for _cycle in 0..2 {
            // Snapshot payloads first: one cycle is simultaneous across nodes.
            let payloads: Vec<PeerExchangePayload> = nodes
                .iter()
                .map(|n| build_payload(&n.table, &n.identity))
                .collect();
            for (i, sender) in nodes.iter().enumerate() {
                for target in sender.table.all() {
                    let j = nodes
                        .iter()
                        .position(|n| n.id == target.identity.peer_id)
                        .unwrap();
                    apply_payload(
                        &payloads[i],
                        &nodes[j].id,
                        &nodes[j].table,
                        &nodes[j].keyring,
                        &nodes[j].reconnect,
                    );
                }
            }
        }

        for n in &nodes {
            let known: HashSet<String> = n
                .table
                .all()
                .into_iter()
                .map(|e| e.identity.peer_id)
                .collect();
            let expected: HashSet<String> = (0..5)
                .map(|i| format!("node-{i}"))
                .filter(|id| *id != n.id)
                .collect();
            assert_eq!(known, expected, "peer table of {} incomplete", n.id);
        }
    }

    #[test]
    fn merge_advances_last_seen_to_max() {
        let kp = Keypair::generate();
        let a = node(0, &kp);
        let b = node(1, &kp);
        a.table.upsert(b.identity.clone(), 0);

        let stale = PeerExchangePayload {
            peers: vec![ExchangePeer {
                identity: b.identity.clone(),
                last_seen_ms: 0,
            }],
        };
        let seen_before = a.table.get(&b.id).unwrap().last_seen_ms;
        apply_payload(&stale, &a.id, &a.table, &a.keyring, &a.reconnect);
        assert!(a.table.get(&b.id).unwrap().last_seen_ms >= seen_before);
    }

    #[test]
    fn own_identity_not_merged() {
        let kp = Keypair::generate();
        let a = node(0, &kp);
        let payload = PeerExchangePayload {
            peers: vec![ExchangePeer {
                identity: a.identity.clone(),
                last_seen_ms: now_ms(),
            }],
        };
        apply_payload(&payload, &a.id, &a.table, &a.keyring, &a.reconnect);
        assert!(a.table.is_empty());
    }

    #[test]
    fn relearning_restarts_given_up_peer() {
        let kp = Keypair::generate();
        let a = node(0, &kp);
        let b = node(1, &kp);
        for _ in 0..8 {
            a.reconnect.on_failure(&b.id, 0);
        }
        assert!(a.reconnect.gave_up(&b.id));

        let payload = PeerExchangePayload {
            peers: vec![ExchangePeer {
                identity: b.identity.clone(),
                last_seen_ms: now_ms(),
            }],
        };
        apply_payload(&payload, &a.id, &a.table, &a.keyring, &a.reconnect);
        assert!(a.reconnect.ready(&b.id, now_ms()));
    }
}
