//! Signed gossip fan-out.

use crate::backoff::ReconnectRegistry;
use crate::peer_table::PeerTable;
use edgecoder_crypto::Keypair;
use edgecoder_types::peer::{signing_bytes, MeshMessage};
use edgecoder_types::time::now_ms;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome counts of one broadcast. Partial failure never fails the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Signs and fans out mesh messages to every known peer URL in parallel.
pub struct Broadcaster {
    client: reqwest::Client,
    keypair: Arc<Keypair>,
    own_peer_id: String,
    peers: Arc<PeerTable>,
    reconnect: Arc<ReconnectRegistry>,
    mesh_token: Option<String>,
    per_peer_timeout: Duration,
}

impl Broadcaster {
    pub fn new(
        client: reqwest::Client,
        keypair: Arc<Keypair>,
        own_peer_id: impl Into<String>,
        peers: Arc<PeerTable>,
        reconnect: Arc<ReconnectRegistry>,
        mesh_token: Option<String>,
    ) -> Self {
        Self {
            client,
            keypair,
            own_peer_id: own_peer_id.into(),
            peers,
            reconnect,
            mesh_token,
            per_peer_timeout: Duration::from_secs(5),
        }
    }

    /// Construct and sign an envelope for `payload`.
    pub fn build_message(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        ttl_ms: u64,
    ) -> Option<MeshMessage> {
        let id = uuid::Uuid::new_v4().to_string();
        let issued_at_ms = now_ms();
        let bytes = signing_bytes(
            &id,
            message_type,
            &self.own_peer_id,
            issued_at_ms,
            ttl_ms,
            &payload,
        )
        .ok()?;
        Some(MeshMessage {
            id,
            message_type: message_type.to_string(),
            from_peer_id: self.own_peer_id.clone(),
            issued_at_ms,
            ttl_ms,
            payload,
            signature: self.keypair.sign_base64(&bytes),
        })
    }

    /// Sign `payload` and deliver it to every peer in the table.
    ///
    /// Peers in backoff are skipped and counted as failed; a successful
    /// delivery resets the peer's reconnection state and bumps its
    /// last-seen timestamp.
    pub async fn broadcast(
        &self,
        message_type: &str,
        payload: serde_json::Value,
        ttl_ms: u64,
    ) -> DeliveryReport {
        let Some(message) = self.build_message(message_type, payload, ttl_ms) else {
            warn!(target: "mesh", %message_type, "failed to canonicalize broadcast payload");
            return DeliveryReport::default();
        };
        self.fan_out(&message).await
    }

    /// Deliver an already-signed envelope (e.g. relayed gossip) to all peers.
    pub async fn fan_out(&self, message: &MeshMessage) -> DeliveryReport {
        let now = now_ms();
        let targets: Vec<(String, String)> = self
            .peers
            .all()
            .into_iter()
            .filter(|e| e.identity.peer_id != self.own_peer_id)
            .map(|e| (e.identity.peer_id, e.identity.url))
            .collect();

        let mut report = DeliveryReport::default();
        let mut sends = Vec::new();
        for (peer_id, url) in targets {
            if !self.reconnect.ready(&peer_id, now) {
                report.failed += 1;
                continue;
            }
            let this = self;
            let msg = message.clone();
            sends.push(async move {
                let ok = this.send_to(&url, &msg).await;
                (peer_id, ok)
            });
        }

        for (peer_id, ok) in join_all(sends).await {
            if ok {
                report.delivered += 1;
                self.reconnect.on_success(&peer_id);
                self.peers.touch(&peer_id, now_ms());
            } else {
                report.failed += 1;
                self.reconnect.on_failure(&peer_id, now_ms());
            }
        }
        debug!(
            target: "mesh",
            message_type = %message.message_type,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }

    async fn send_to(&self, base_url: &str, message: &MeshMessage) -> bool {
        let url = format!("{}/mesh/ingest", base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .timeout(self.per_peer_timeout)
            .json(message);
        if let Some(token) = &self.mesh_token {
            req = req.header("x-mesh-token", token);
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                debug!(target: "mesh", %url, status = %resp.status(), "gossip delivery rejected");
                false
            }
            Err(e) => {
                debug!(target: "mesh", %url, error = %e, "gossip delivery failed");
                false
            }
        }
    }
}
