//! Startup federation: seed contact, registration, peer learning.
//!
//! Bootstrap order: for each configured seed URL fetch `/identity`, register
//! ourselves, then fetch `/mesh/peers` and register with every newly-learned
//! peer. A coordinator that cannot reach any seed or learned peer across
//! consecutive rounds is persistently isolated (exit code 2 territory).

use crate::backoff::ReconnectRegistry;
use crate::peer_table::PeerTable;
use crate::MeshNetError;
use edgecoder_crypto::KeyRing;
use edgecoder_types::peer::PeerIdentity;
use edgecoder_types::time::now_ms;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Consecutive all-seed-failure rounds before isolation is declared.
pub const ISOLATION_ROUNDS: u32 = 3;

/// What one bootstrap round achieved.
#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapReport {
    pub seeds_contacted: usize,
    pub peers_learned: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeersResponse {
    peers: Vec<PeerIdentity>,
}

/// Runs seed bootstrap rounds and tracks persistent isolation.
pub struct Bootstrapper {
    client: reqwest::Client,
    own_identity: PeerIdentity,
    seeds: Vec<String>,
    table: Arc<PeerTable>,
    keyring: Arc<KeyRing>,
    reconnect: Arc<ReconnectRegistry>,
    mesh_token: Option<String>,
    failed_rounds: AtomicU32,
}

impl Bootstrapper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: reqwest::Client,
        own_identity: PeerIdentity,
        seeds: Vec<String>,
        table: Arc<PeerTable>,
        keyring: Arc<KeyRing>,
        reconnect: Arc<ReconnectRegistry>,
        mesh_token: Option<String>,
    ) -> Self {
        Self {
            client,
            own_identity,
            seeds,
            table,
            keyring,
            reconnect,
            mesh_token,
            failed_rounds: AtomicU32::new(0),
        }
    }

    /// One full bootstrap round across every configured seed.
    pub async fn run_round(&self) -> BootstrapReport {
        let mut report = BootstrapReport::default();
        for seed in &self.seeds {
            match self.contact_seed(seed).await {
                Ok(learned) => {
                    report.seeds_contacted += 1;
                    report.peers_learned += learned;
                }
                Err(e) => {
                    warn!(target: "mesh", %seed, error = %e, "seed bootstrap failed");
                }
            }
        }
        if report.seeds_contacted == 0 && !self.seeds.is_empty() && self.table.is_empty() {
            let rounds = self.failed_rounds.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(target: "mesh", rounds, "bootstrap round reached no peers");
        } else {
            self.failed_rounds.store(0, Ordering::SeqCst);
        }
        info!(
            target: "mesh",
            seeds = report.seeds_contacted,
            learned = report.peers_learned,
            "bootstrap round complete"
        );
        report
    }

    /// Whether the coordinator is persistently isolated from the mesh.
    pub fn isolated(&self) -> bool {
        self.failed_rounds.load(Ordering::SeqCst) >= ISOLATION_ROUNDS
    }

    async fn contact_seed(&self, seed: &str) -> Result<usize, MeshNetError> {
        let identity = self.fetch_identity(seed).await?;
        if identity.peer_id == self.own_identity.peer_id {
            return Ok(0);
        }
        self.keyring
            .register_pem(&identity.peer_id, &identity.public_key_pem, now_ms())
            .map_err(|e| MeshNetError::Decode(e.to_string()))?;
        self.register_with(seed).await?;
        self.table.upsert(identity, now_ms());

        // Learn the seed's peer set and introduce ourselves to each newcomer.
        let peers = self.fetch_peers(seed).await?;
        let mut learned = 0;
        for peer in peers {
            if peer.peer_id == self.own_identity.peer_id || self.table.contains(&peer.peer_id) {
                continue;
            }
            if self
                .keyring
                .register_pem(&peer.peer_id, &peer.public_key_pem, now_ms())
                .is_err()
            {
                continue;
            }
            if self.register_with(&peer.url).await.is_ok() {
                self.table.upsert(peer, now_ms());
                learned += 1;
            }
        }
        Ok(learned)
    }

    async fn fetch_identity(&self, base_url: &str) -> Result<PeerIdentity, MeshNetError> {
        let url = format!("{}/identity", base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| MeshNetError::Network(e.to_string()))?;
        resp.json::<PeerIdentity>()
            .await
            .map_err(|e| MeshNetError::Decode(e.to_string()))
    }

    async fn fetch_peers(&self, base_url: &str) -> Result<Vec<PeerIdentity>, MeshNetError> {
        let url = format!("{}/mesh/peers", base_url.trim_end_matches('/'));
        let mut req = self.client.get(&url).timeout(Duration::from_secs(5));
        if let Some(token) = &self.mesh_token {
            req = req.header("x-mesh-token", token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MeshNetError::Network(e.to_string()))?;
        resp.json::<PeersResponse>()
            .await
            .map(|p| p.peers)
            .map_err(|e| MeshNetError::Decode(e.to_string()))
    }

    async fn register_with(&self, base_url: &str) -> Result<(), MeshNetError> {
        let url = format!("{}/mesh/register-peer", base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(5))
            .json(&self.own_identity);
        if let Some(token) = &self.mesh_token {
            req = req.header("x-mesh-token", token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MeshNetError::Network(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(MeshNetError::Network(format!(
                "registration rejected with {}",
                resp.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use edgecoder_crypto::Keypair;
    use edgecoder_types::peer::{NetworkMode, PeerRole};

    fn bootstrapper(seeds: Vec<String>) -> Bootstrapper {
        let kp = Keypair::generate();
        Bootstrapper::new(
            reqwest::Client::new(),
            PeerIdentity {
                peer_id: "me".into(),
                public_key_pem: kp.public_key().to_spki_pem().unwrap(),
                role: PeerRole::Coordinator,
                network_mode: NetworkMode::PublicMesh,
                url: "http://me.mesh:8440".into(),
            },
            seeds,
            Arc::new(PeerTable::default()),
            Arc::new(KeyRing::default()),
            Arc::new(ReconnectRegistry::new(BackoffPolicy::default())),
            None,
        )
    }

    #[tokio::test]
    async fn isolation_declared_after_consecutive_failed_rounds() {
        let b = bootstrapper(vec!["http://127.0.0.1:9".into()]);
        for _ in 0..ISOLATION_ROUNDS {
            assert!(!b.isolated());
            b.run_round().await;
        }
        assert!(b.isolated());
    }

    #[tokio::test]
    async fn empty_seed_list_is_not_isolation() {
        let b = bootstrapper(Vec::new());
        b.run_round().await;
        b.run_round().await;
        b.run_round().await;
        assert!(!b.isolated());
    }
}
