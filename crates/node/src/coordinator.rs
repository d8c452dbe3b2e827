//! Coordinator assembly: components, periodic timers, lifecycle.

use crate::config::NodeConfig;
use crate::providers::{DisabledAnchor, DisabledLightning};
use anyhow::Context;
use edgecoder_crypto::{key_file, sha256_hex, KeyRing, Keypair};
use edgecoder_defense::{AutoBlacklister, BehaviorTracker, BlacklistChain, RulesConfig};
use edgecoder_economy::{
    ContributionWeight, CreditEngine, CreditPolicy, FixedQuality, IssuanceEngine, PaymentManager,
};
use edgecoder_gateway::{run_server, AppState, GatewayConfig};
use edgecoder_ledger::{
    AnchorManager, OrderingChain, QueueEventInput, QuorumLedger, VotePayload,
};
use edgecoder_mesh::bootstrap::Bootstrapper;
use edgecoder_mesh::{
    exchange, message_type, BackoffPolicy, Broadcaster, CapabilityRegistry, MessageValidator,
    PeerTable, ReconnectRegistry,
};
use edgecoder_scheduler::{AgentRegistry, DirectWorkBook, FairShareQueue, SlidingWindowLimiter};
use edgecoder_telemetry::metrics as tm;
use edgecoder_trust::{ReleaseKey, ReleaseManifest, ReleaseVerifier, SignedRequestVerifier};
use edgecoder_types::peer::{CapabilitySummary, PeerIdentity, PeerRole};
use edgecoder_types::time::now_ms;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Why the daemon stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Clean,
    /// No seed or learned peer was reachable across consecutive rounds.
    Isolated,
}

pub struct Coordinator {
    pub state: AppState,
    bootstrapper: Arc<Bootstrapper>,
    config: NodeConfig,
    client: reqwest::Client,
}

impl Coordinator {
    /// Wire every component from configuration. Fails fast on bad config or
    /// unusable key material (exit code 1 territory).
    pub fn build(config: NodeConfig) -> anyhow::Result<Self> {
        let network_mode = config.parsed_network_mode()?;

        let keypair = match &config.private_key_pem {
            Some(pem) => Keypair::from_pkcs8_pem(pem).context("COORDINATOR_PRIVATE_KEY_PEM")?,
            None => key_file::load_or_generate(&config.key_file).context("coordinator key file")?,
        };
        let keypair = Arc::new(keypair);
        let public_key_pem = keypair
            .public_key()
            .to_spki_pem()
            .context("encode public key")?;
        let peer_id = config.peer_id.clone().unwrap_or_else(|| {
            format!("coord-{}", &sha256_hex(public_key_pem.as_bytes())[..16])
        });

        let keyring = Arc::new(KeyRing::default());
        keyring
            .register_pem(&peer_id, &public_key_pem, now_ms())
            .context("register own key")?;

        let identity = PeerIdentity {
            peer_id: peer_id.clone(),
            public_key_pem,
            role: PeerRole::Coordinator,
            network_mode,
            url: config.coordinator_url.clone(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("http client")?;

        let peers = Arc::new(PeerTable::default());
        let reconnect = Arc::new(ReconnectRegistry::new(BackoffPolicy::default()));
        let broadcaster = Arc::new(Broadcaster::new(
            client.clone(),
            keypair.clone(),
            peer_id.clone(),
            peers.clone(),
            reconnect.clone(),
            config.mesh_auth_token.clone(),
        ));

        let credit_policy = CreditPolicy {
            min_contribution_ratio: config.min_contribution_ratio,
            contribution_burst_credits: config.contribution_burst_credits,
            ..CreditPolicy::default()
        };

        let state = AppState {
            identity: identity.clone(),
            keypair: keypair.clone(),
            keyring: keyring.clone(),
            peers: peers.clone(),
            validator: Arc::new(MessageValidator::new(peer_id.clone())),
            broadcaster,
            capabilities: Arc::new(CapabilityRegistry::new()),
            reconnect: reconnect.clone(),
            queue: Arc::new(FairShareQueue::default()),
            agents: Arc::new(AgentRegistry::default()),
            direct_work: Arc::new(DirectWorkBook::new()),
            submission_limiter: Arc::new(SlidingWindowLimiter::submissions()),
            credits: {
                let archive =
                    edgecoder_storage::MemoryStore::<edgecoder_types::credit::CreditTransaction>::shared();
                Arc::new(
                    CreditEngine::new(credit_policy, Arc::new(FixedQuality)).with_archive(archive),
                )
            },
            payments: Arc::new(PaymentManager::new(Arc::new(DisabledLightning))),
            issuance: Arc::new(IssuanceEngine::new(
                config.issuance_params(),
                peer_id.clone(),
            )),
            ordering: Arc::new(OrderingChain::new(peer_id.clone(), keypair.clone())),
            quorum: Arc::new(QuorumLedger::new(peer_id.clone(), keypair.clone())),
            anchors: Arc::new(AnchorManager::new(
                Arc::new(DisabledAnchor),
                config.anchor_confirmation_threshold,
            )),
            blacklist: Arc::new(BlacklistChain::new(peer_id.clone(), keypair.clone())),
            tracker: Arc::new(BehaviorTracker::default()),
            striker: Arc::new(AutoBlacklister::new()),
            rules: RulesConfig::default(),
            signed_requests: Arc::new(SignedRequestVerifier::new(
                keyring.clone(),
                edgecoder_trust::signed_request::DEFAULT_MAX_SKEW_MS,
            )),
            release: {
                let keys = match &config.release_keys_file {
                    Some(path) => load_release_keys(path).context("RELEASE_KEYS_FILE")?,
                    None => Vec::new(),
                };
                Arc::new(ReleaseVerifier::new(keys))
            },
            mesh_token: config.mesh_auth_token.clone(),
            started_at_ms: now_ms(),
        };

        let bootstrapper = Arc::new(Bootstrapper::new(
            client.clone(),
            identity,
            config.seeds(),
            peers,
            keyring,
            reconnect,
            config.mesh_auth_token.clone(),
        ));

        Ok(Self {
            state,
            bootstrapper,
            config,
            client,
        })
    }

    /// Run until Ctrl-C or persistent isolation.
    pub async fn run(self) -> anyhow::Result<ExitReason> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            target: "node",
            peer = %self.state.identity.peer_id,
            url = %self.state.identity.url,
            seeds = self.config.seeds().len(),
            fee_bps = self.config.coordinator_fee_bps,
            admin_token = self.config.admin_api_token.is_some(),
            "coordinator starting"
        );
        self.bootstrapper.run_round().await;
        if let Some(url) = &self.config.release_manifest_url {
            refresh_release_manifests(&self.client, url, &self.state.release).await;
        }

        spawn_timers(
            self.state.clone(),
            &self.config,
            self.client.clone(),
            shutdown_rx.clone(),
        );

        let server = tokio::spawn(run_server(
            GatewayConfig {
                listen_addr: self.config.listen_addr.clone(),
                ..GatewayConfig::default()
            },
            self.state.clone(),
            shutdown_rx.clone(),
        ));

        let mut rebootstrap = tokio::time::interval(Duration::from_secs(60));
        rebootstrap.tick().await;
        let reason = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(target: "node", "shutdown requested");
                    break ExitReason::Clean;
                }
                _ = rebootstrap.tick() => {
                    if self.state.peers.is_empty() && !self.config.seeds().is_empty() {
                        self.bootstrapper.run_round().await;
                        if self.bootstrapper.isolated() {
                            error!(target: "node", "persistent peer isolation, operator intervention required");
                            break ExitReason::Isolated;
                        }
                    }
                }
            }
        };

        // Signal everything down, then give in-flight requests a bounded
        // grace period.
        let _ = shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .is_err()
        {
            warn!(target: "node", "server did not drain in time, aborting");
        }
        Ok(reason)
    }
}

/// Spawn every periodic task. Each one exits when the shutdown flag flips.
fn spawn_timers(
    state: AppState,
    config: &NodeConfig,
    client: reqwest::Client,
    shutdown: watch::Receiver<bool>,
) {
    let every = |period_ms: u64| Duration::from_millis(period_ms.max(1_000));

    // Release-manifest refresh (default 1 h).
    if let Some(url) = config.release_manifest_url.clone() {
        spawn_loop(shutdown.clone(), every(config.release_manifest_refresh_ms), {
            let state = state.clone();
            move || {
                let state = state.clone();
                let client = client.clone();
                let url = url.clone();
                async move {
                    refresh_release_manifests(&client, &url, &state.release).await;
                }
            }
        });
    }

    // Peer exchange (30 s).
    spawn_loop(shutdown.clone(), Duration::from_secs(30), {
        let state = state.clone();
        move || {
            let state = state.clone();
            async move {
                let payload = exchange::build_payload(&state.peers, &state.identity);
                if let Ok(value) = serde_json::to_value(&payload) {
                    state
                        .broadcaster
                        .broadcast(message_type::PEER_EXCHANGE, value, 60_000)
                        .await;
                    tm::record_gossip("out", "peer_exchange");
                }
            }
        }
    });

    // Peer eviction (60 s).
    spawn_loop(shutdown.clone(), Duration::from_secs(60), {
        let state = state.clone();
        move || {
            let state = state.clone();
            async move {
                let evicted = state.peers.sweep(now_ms());
                if !evicted.is_empty() {
                    info!(target: "node", count = evicted.len(), "evicted stale peers");
                }
                tm::set_peer_count(state.peers.len() as i64);
                state.capabilities.prune(now_ms());
            }
        }
    });

    // Capability gossip (60 s).
    spawn_loop(shutdown.clone(), Duration::from_secs(60), {
        let state = state.clone();
        move || {
            let state = state.clone();
            async move {
                let summary = CapabilitySummary {
                    coordinator_id: state.identity.peer_id.clone(),
                    agent_count: state.agents.active_count(now_ms()) as u32,
                    model_availability: BTreeMap::new(),
                    timestamp: now_ms(),
                };
                if let Ok(value) = serde_json::to_value(&summary) {
                    state
                        .broadcaster
                        .broadcast(message_type::CAPABILITY_SUMMARY, value, 120_000)
                        .await;
                    tm::record_gossip("out", "capability_summary");
                }
            }
        }
    });

    // Claim-timeout sweep (15 s).
    spawn_loop(shutdown.clone(), Duration::from_secs(15), {
        let state = state.clone();
        move || {
            let state = state.clone();
            async move {
                let requeued = state.queue.sweep_timeouts(now_ms());
                if !requeued.is_empty() {
                    warn!(target: "node", count = requeued.len(), "requeued timed-out subtasks");
                }
                tm::set_queue_depth(state.queue.capacity().ready as i64);
            }
        }
    });

    // Issuance recalculation.
    spawn_loop(shutdown.clone(), every(config.issuance_recalc_ms), {
        let state = state.clone();
        let window_ms = config.issuance_window_ms;
        move || {
            let state = state.clone();
            async move {
                run_issuance_window(&state, window_ms).await;
            }
        }
    });

    // Anchor confirmation refresh.
    spawn_loop(shutdown.clone(), every(config.anchor_interval_ms), {
        let state = state.clone();
        move || {
            let state = state.clone();
            async move {
                state.anchors.refresh().await;
            }
        }
    });

    // Lightning settlement polling (30 s).
    spawn_loop(shutdown, Duration::from_secs(30), {
        let state = state.clone();
        move || {
            let state = state.clone();
            async move {
                state.payments.poll_settlements(&state.credits).await;
            }
        }
    });
}

/// Parse a file of concatenated SPKI PEM blocks into open-ended release keys.
/// Rotation windows come from the manifest channel; config-supplied keys stay
/// valid until replaced.
fn load_release_keys(path: &std::path::Path) -> anyhow::Result<Vec<ReleaseKey>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    let mut keys = Vec::new();
    for block in text.split_inclusive("-----END PUBLIC KEY-----") {
        let Some(start) = block.find("-----BEGIN PUBLIC KEY-----") else {
            continue;
        };
        let key = edgecoder_crypto::PublicKey::from_spki_pem(block[start..].trim())
            .map_err(|e| anyhow::anyhow!("release key {}: {e}", keys.len()))?;
        keys.push(ReleaseKey {
            key,
            valid_from_ms: 0,
            valid_until_ms: u64::MAX,
        });
    }
    anyhow::ensure!(!keys.is_empty(), "no PEM public keys in {}", path.display());
    info!(target: "node", count = keys.len(), "loaded release signing keys");
    Ok(keys)
}

/// Pull the manifest feed from the release channel and install every entry.
async fn refresh_release_manifests(
    client: &reqwest::Client,
    url: &str,
    release: &ReleaseVerifier,
) {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ManifestFeed {
        manifests: Vec<ReleaseManifest>,
    }
    let response = match client
        .get(url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(target: "node", %url, error = %e, "release channel unreachable");
            return;
        }
    };
    match response.json::<ManifestFeed>().await {
        Ok(feed) => {
            let count = feed.manifests.len();
            for manifest in feed.manifests {
                release.install_manifest(manifest);
            }
            info!(target: "node", count, "release manifests refreshed");
        }
        Err(e) => {
            warn!(target: "node", %url, error = %e, "bad manifest feed");
        }
    }
}

fn spawn_loop<F, Fut>(mut shutdown: watch::Receiver<bool>, period: Duration, mut tick: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                _ = shutdown.changed() => break,
            }
        }
    });
}

/// One issuance window: recalc, quorum drive, payouts, anchoring.
async fn run_issuance_window(state: &AppState, window_ms: u64) {
    let now = now_ms();
    let window_start = now.saturating_sub(window_ms);
    let contributions: Vec<ContributionWeight> = state
        .credits
        .earnings_in_window(window_start, now)
        .into_iter()
        .map(|(account_id, weighted_contribution)| ContributionWeight {
            account_id,
            weighted_contribution,
        })
        .collect();

    let capacity = state.queue.capacity();
    let active = state.agents.active_count(now);
    let load_index = (capacity.ready + capacity.claimed + active) as f64 / active.max(1) as f64;

    let bundle = state
        .issuance
        .recalc(window_start, now, load_index, &contributions);
    let epoch_id = bundle.epoch.issuance_epoch_id.clone();

    // Drive the quorum pipeline: propose, self-vote, gossip the proposal.
    let payload = serde_json::to_string(&bundle.epoch).unwrap_or_default();
    if state.quorum.propose(&epoch_id, payload.clone()).is_err() {
        return;
    }
    let vote = VotePayload::signed(
        &epoch_id,
        &state.identity.peer_id,
        true,
        &state.keypair,
    );
    if let Err(e) = state.quorum.record_vote(&vote, &state.keyring) {
        error!(target: "node", error = %e, "failed to record own vote");
        return;
    }
    let proposal = serde_json::json!({
        "epochId": epoch_id,
        "payloadJson": payload,
    });
    state
        .broadcaster
        .broadcast(message_type::QUORUM_PROPOSAL, proposal, 60_000)
        .await;

    // Approved set: known coordinator peers plus ourselves.
    let mut approved: Vec<String> = state
        .peers
        .with_role(PeerRole::Coordinator)
        .into_iter()
        .map(|e| e.identity.peer_id)
        .collect();
    approved.push(state.identity.peer_id.clone());
    approved.sort();
    approved.dedup();

    if !state.quorum.has_quorum(&epoch_id, &approved) {
        info!(target: "node", epoch = %epoch_id, "awaiting quorum votes");
        return;
    }
    if state.quorum.commit(&epoch_id, &approved).is_err() {
        return;
    }
    let checkpoint = match state.quorum.checkpoint(&epoch_id, state.ordering.len() as u64) {
        Ok(record) => record,
        Err(e) => {
            error!(target: "node", error = %e, "checkpoint failed");
            return;
        }
    };

    // Payouts become credit transactions.
    for allocation in &bundle.allocations {
        state.credits.earn(
            &allocation.account_id,
            allocation.issued_tokens,
            format!("issuance:{epoch_id}"),
            None,
        );
    }

    // Bind the checkpoint into the ordering chain, then anchor it.
    let _ = state.ordering.append(QueueEventInput {
        event_type: "checkpoint".into(),
        task_id: epoch_id.clone(),
        coordinator_id: Some(state.identity.peer_id.clone()),
        checkpoint_height: Some(checkpoint.created_at_ms),
        checkpoint_hash: Some(checkpoint.hash.clone()),
        ..QueueEventInput::default()
    });
    if let Err(e) = state.anchors.submit(&checkpoint.hash).await {
        warn!(target: "node", error = %e, "checkpoint anchoring unavailable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_key_file_parses_multiple_blocks() {
        let a = Keypair::generate().public_key().to_spki_pem().unwrap();
        let b = Keypair::generate().public_key().to_spki_pem().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release-keys.pem");
        std::fs::write(&path, format!("{a}\n{b}")).unwrap();

        let keys = load_release_keys(&path).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].valid_until_ms, u64::MAX);
    }

    #[test]
    fn key_file_without_pem_blocks_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("release-keys.pem");
        std::fs::write(&path, "not a key").unwrap();
        assert!(load_release_keys(&path).is_err());
    }
}
