//! Blacklist inspection.

use crate::state::AppState;
use axum::extract::State;
use axum::response::Json;
use edgecoder_types::time::now_ms;

pub async fn blacklist(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "agents": state.blacklist.active_agents(now_ms()),
        "headHash": state.blacklist.head_hash(),
    }))
}

pub async fn blacklist_audit(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "events": state.blacklist.audit() }))
}
