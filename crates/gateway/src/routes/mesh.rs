//! Peer discovery, registration and gossip ingest.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::response::Json;
use edgecoder_mesh::{exchange, message_type, Admission};
use edgecoder_telemetry::metrics as tm;
use edgecoder_trust::AttestationReport;
use edgecoder_types::behavior::{AnomalyEvent, AnomalySeverity};
use edgecoder_types::chain::{BlacklistEvidenceInput, BlacklistRecord};
use edgecoder_types::peer::{CapabilitySummary, MeshMessage, PeerIdentity, PeerRole};
use edgecoder_types::time::now_ms;
use edgecoder_types::ErrorCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub async fn peers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let peers: Vec<PeerIdentity> = state
        .peers
        .all()
        .into_iter()
        .map(|e| e.identity)
        .collect();
    Json(serde_json::json!({ "peers": peers }))
}

/// Registration body: a peer identity plus an optional binary attestation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(flatten)]
    pub identity: PeerIdentity,
    #[serde(default)]
    pub attestation: Option<AttestationReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<edgecoder_trust::AttestationOutcome>,
}

pub async fn register_peer(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let now = now_ms();
    let identity = request.identity;
    if identity.peer_id == state.identity.peer_id {
        return Err(AppError::bad_request("cannot register self"));
    }
    state
        .keyring
        .register_pem(&identity.peer_id, &identity.public_key_pem, now)
        .map_err(|e| AppError::bad_request(format!("unusable public key: {e}")))?;
    state.reconnect.restart(&identity.peer_id);
    state.peers.upsert(identity.clone(), now);
    tm::set_peer_count(state.peers.len() as i64);

    let mut attestation_outcome = None;
    if identity.role == PeerRole::Agent || identity.role == PeerRole::Phone {
        state.agents.heartbeat(&identity.peer_id, true, now);
        state.tracker.record_registration(&identity.peer_id, now);
        state.tracker.record_heartbeat(&identity.peer_id, now);

        if let Some(report) = &request.attestation {
            let outcome = state.release.verify(report, now);
            attestation_outcome = Some(outcome);
            use edgecoder_trust::AttestationOutcome::*;
            if matches!(outcome, SignatureMismatch | HashMismatch) {
                // A tampered binary is a critical anomaly in its own right.
                let anomaly = AnomalyEvent {
                    rule_id: "ATTEST".into(),
                    agent_id: identity.peer_id.clone(),
                    severity: AnomalySeverity::Critical,
                    blacklist_reason: "binary_integrity_mismatch".into(),
                    description: format!(
                        "attestation {outcome:?} for release {}",
                        report.release_version
                    ),
                };
                apply_anomaly(&state, &anomaly).await;
            }
        }
    }

    info!(target: "gateway", peer = %identity.peer_id, role = ?identity.role, "peer registered");
    Ok(Json(RegisterResponse {
        registered: true,
        attestation: attestation_outcome,
    }))
}

pub async fn ingest(
    State(state): State<AppState>,
    Json(message): Json<MeshMessage>,
) -> Result<Json<serde_json::Value>, AppError> {
    let now = now_ms();
    match state.validator.validate(&message, &state.keyring, now) {
        Ok(Admission::OwnMessage) => {
            return Ok(Json(serde_json::json!({ "status": "ignored" })));
        }
        Ok(Admission::Accepted) => {}
        Err(e) => {
            tm::record_gossip("in", e.code());
            if matches!(e, edgecoder_types::error::GossipError::InvalidSignature) {
                state
                    .tracker
                    .record_signature_failure(&message.from_peer_id, now);
            }
            return Err(e.into());
        }
    }
    tm::record_gossip("in", "accepted");
    state.peers.touch(&message.from_peer_id, now);

    match message.message_type.as_str() {
        message_type::PEER_EXCHANGE => {
            let payload: exchange::PeerExchangePayload =
                serde_json::from_value(message.payload.clone())
                    .map_err(|e| AppError::bad_request(format!("bad peer_exchange: {e}")))?;
            let learned = exchange::apply_payload(
                &payload,
                &state.identity.peer_id,
                &state.peers,
                &state.keyring,
                &state.reconnect,
            );
            tm::set_peer_count(state.peers.len() as i64);
            debug!(target: "gateway", learned, "peer exchange merged");
        }
        message_type::CAPABILITY_SUMMARY => {
            let summary: CapabilitySummary = serde_json::from_value(message.payload.clone())
                .map_err(|e| AppError::bad_request(format!("bad capability_summary: {e}")))?;
            state.capabilities.update(summary);
        }
        message_type::BLACKLIST_UPDATE => {
            let record: BlacklistRecord = serde_json::from_value(message.payload.clone())
                .map_err(|e| AppError::bad_request(format!("bad blacklist_update: {e}")))?;
            state.blacklist.ingest_remote(record, &state.keyring)?;
        }
        message_type::QUORUM_PROPOSAL => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Proposal {
                epoch_id: String,
                payload_json: String,
            }
            let proposal: Proposal = serde_json::from_value(message.payload.clone())
                .map_err(|e| AppError::bad_request(format!("bad quorum_proposal: {e}")))?;
            // Adopt the proposal locally, cast our vote, and gossip it back.
            if state
                .quorum
                .propose(&proposal.epoch_id, proposal.payload_json)
                .is_ok()
            {
                let vote = edgecoder_ledger::VotePayload::signed(
                    &proposal.epoch_id,
                    &state.identity.peer_id,
                    true,
                    &state.keypair,
                );
                let _ = state.quorum.record_vote(&vote, &state.keyring);
                if let Ok(payload) = serde_json::to_value(&vote) {
                    state
                        .broadcaster
                        .broadcast(message_type::QUORUM_VOTE, payload, 60_000)
                        .await;
                }
            }
        }
        message_type::QUORUM_VOTE => {
            let vote: edgecoder_ledger::VotePayload =
                serde_json::from_value(message.payload.clone())
                    .map_err(|e| AppError::bad_request(format!("bad quorum_vote: {e}")))?;
            state.quorum.record_vote(&vote, &state.keyring)?;
        }
        // Unknown types are tolerated; idempotent ingestion already recorded
        // the id, so replays stay cheap.
        other => {
            debug!(target: "gateway", message_type = other, "unhandled gossip type");
        }
    }
    Ok(Json(serde_json::json!({ "status": "accepted" })))
}

pub async fn capabilities(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "coordinatorId": state.identity.peer_id,
        "federated": state.capabilities.all(),
    }))
}

/// Shared anomaly application: strike, blacklist, gossip.
pub(crate) async fn apply_anomaly(state: &AppState, anomaly: &AnomalyEvent) {
    let now = now_ms();
    let Some(action) = state.striker.on_anomaly(anomaly, now) else {
        return;
    };
    let mut evidence = BlacklistEvidenceInput {
        agent_id: action.agent_id.clone(),
        reason: action.reason.clone(),
        reason_code: action.reason_code.clone(),
        evidence_hash_sha256: edgecoder_crypto::sha256_hex(action.reason.as_bytes()),
        reporter_id: state.identity.peer_id.clone(),
        reporter_signature: None,
        expires_at_ms: None,
    };
    if let Ok(bytes) = evidence.signing_bytes() {
        evidence.reporter_signature = Some(state.keypair.sign_base64(&bytes));
    }
    match state.blacklist.add_event(evidence, &state.keyring) {
        Ok(record) => {
            let payload = match serde_json::to_value(&record) {
                Ok(p) => p,
                Err(_) => return,
            };
            let report = state
                .broadcaster
                .broadcast(message_type::BLACKLIST_UPDATE, payload, 60_000)
                .await;
            tm::record_gossip("out", "blacklist_update");
            info!(
                target: "gateway",
                agent = %record.agent_id,
                rule = %action.rule_id,
                delivered = report.delivered,
                failed = report.failed,
                "blacklist action propagated"
            );
        }
        Err(e) => {
            tracing::error!(target: "gateway", error = %e, "failed to append blacklist event");
        }
    }
}
