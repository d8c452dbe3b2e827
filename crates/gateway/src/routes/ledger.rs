//! Chain inspection and verification.

use crate::error::AppError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use edgecoder_ledger::{OrderingChain, VerifyOutcome};
use edgecoder_types::chain::QueueEventRecord;
use edgecoder_types::time::now_ms;
use serde::Deserialize;

pub async fn snapshot(State(state): State<AppState>) -> Json<serde_json::Value> {
    let records = state.ordering.snapshot();
    Json(serde_json::json!({
        "head": records.last(),
        "length": records.len(),
        "suspended": state.ordering.is_suspended(),
        "records": records,
        "quorum": state.quorum.snapshot(),
        "anchors": state.anchors.all(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    records: Vec<QueueEventRecord>,
}

/// Verify a posted chain segment, or the local chain when the body is empty.
/// A failed local verification suspends the chain.
pub async fn verify(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<VerifyOutcome>, AppError> {
    if body.is_empty() {
        return Ok(Json(state.ordering.verify_local(&state.keyring)));
    }
    let request: VerifyRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(OrderingChain::verify_records(
        &request.records,
        &state.keyring,
        now_ms(),
    )))
}
