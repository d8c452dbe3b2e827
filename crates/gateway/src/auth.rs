//! Mesh-token gating and signed-request extraction.

use crate::error::AppError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use edgecoder_trust::SignedRequestHeaders;
use edgecoder_types::error::AuthError;
use edgecoder_types::time::now_ms;
use edgecoder_types::AgentId;

/// Paths reachable without the mesh token.
const PUBLIC_PATHS: [&str; 4] = ["/identity", "/health/runtime", "/status", "/metrics"];

/// Rejects any non-public request whose mesh token is absent or wrong.
///
/// With no token configured the mesh is open (single-operator overlays).
pub async fn mesh_token_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if PUBLIC_PATHS.contains(&path) {
        return next.run(req).await;
    }
    if let Some(expected) = &state.mesh_token {
        let presented = bearer_or_header(req.headers());
        if presented.as_deref() != Some(expected.as_str()) {
            return AppError::from(AuthError::MeshUnauthorized).into_response();
        }
    }
    next.run(req).await
}

fn bearer_or_header(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers.get("x-mesh-token").and_then(|v| v.to_str().ok()) {
        return Some(token.to_string());
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

/// Verify the signed-request headers on a privileged agent request.
pub fn verify_signed_request(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<AgentId, AppError> {
    let parsed = SignedRequestHeaders::from_lookup(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    })?;
    let now = now_ms();
    match state
        .signed_requests
        .verify(&parsed, method, path, body, now)
    {
        Ok(agent) => Ok(agent),
        Err(e) => {
            // Feed the behavioral tracker before surfacing the rejection.
            match &e {
                AuthError::ReplayDetected => state.tracker.record_replay(&parsed.agent_id, now),
                AuthError::InvalidSignature | AuthError::UnknownSigner => {
                    state.tracker.record_signature_failure(&parsed.agent_id, now)
                }
                _ => {}
            }
            Err(e.into())
        }
    }
}
