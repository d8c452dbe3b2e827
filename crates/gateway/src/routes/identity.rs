//! Unauthenticated identity, health and status endpoints.

use crate::state::AppState;
use axum::extract::State;
use axum::response::Json;
use edgecoder_types::peer::PeerIdentity;
use edgecoder_types::time::now_ms;

pub async fn identity(State(state): State<AppState>) -> Json<PeerIdentity> {
    Json(state.identity.clone())
}

pub async fn health_runtime(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptimeMs": now_ms().saturating_sub(state.started_at_ms),
        "peerCount": state.peers.len(),
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let capacity = state.queue.capacity();
    Json(serde_json::json!({
        "peerId": state.identity.peer_id,
        "role": state.identity.role,
        "networkMode": state.identity.network_mode,
        "url": state.identity.url,
        "peerCount": state.peers.len(),
        "queue": capacity,
        "orderingChain": {
            "length": state.ordering.len(),
            "suspended": state.ordering.is_suspended(),
        },
        "blacklistedAgents": state.blacklist.active_agents(now_ms()).len(),
        "uptimeMs": now_ms().saturating_sub(state.started_at_ms),
    }))
}

pub async fn metrics() -> ([(axum::http::HeaderName, String); 1], axum::body::Bytes) {
    let (content_type, buf) = edgecoder_telemetry::encode_metrics();
    ([(axum::http::header::CONTENT_TYPE, content_type)], buf.into())
}
