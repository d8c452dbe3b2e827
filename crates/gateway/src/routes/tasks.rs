//! Task submission, the claim/result lifecycle, and direct work.

use crate::auth::verify_signed_request;
use crate::error::AppError;
use crate::routes::mesh::apply_anomaly;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use edgecoder_defense::evaluate;
use edgecoder_ledger::QueueEventInput;
use edgecoder_mesh::message_type;
use edgecoder_telemetry::metrics as tm;
use edgecoder_types::credit::{ContributionReport, LoadSnapshot};
use edgecoder_types::error::ScheduleError;
use edgecoder_types::task::{Subtask, SubtaskResult};
use edgecoder_types::time::now_ms;
use serde::{Deserialize, Serialize};
use tracing::debug;

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    if body.is_empty() {
        return Err(edgecoder_types::error::InputError::MissingBody.into());
    }
    serde_json::from_slice(body).map_err(|e| AppError::bad_request(e.to_string()))
}

fn load_snapshot(state: &AppState, now: u64) -> LoadSnapshot {
    let capacity = state.queue.capacity();
    let active = state.agents.active_count(now);
    LoadSnapshot {
        queued_tasks: capacity.ready + capacity.claimed,
        active_agents: active,
        capacity: active.max(1),
    }
}

// --- Submission ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub subtask_id: String,
    pub queued: bool,
    /// A peer coordinator advertising capacity for the required model, when
    /// no local agent can serve it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_hint: Option<String>,
}

pub async fn submit(
    State(state): State<AppState>,
    Json(mut subtask): Json<Subtask>,
) -> Result<Json<SubmitResponse>, AppError> {
    let now = now_ms();
    let account = subtask
        .project_meta
        .tenant_id
        .clone()
        .unwrap_or_else(|| subtask.project_meta.project_id.clone());
    state.submission_limiter.check(&account, now)?;

    if subtask.id.is_empty() {
        subtask.id = uuid::Uuid::new_v4().to_string();
    }
    if subtask.task_id.is_empty() {
        subtask.task_id = uuid::Uuid::new_v4().to_string();
    }

    let route_hint = match (&subtask.required_model, state.agents.active_count(now)) {
        (Some(model), 0) => state.capabilities.route_for_model(model, now),
        _ => None,
    };

    state.queue.enqueue(subtask.clone())?;
    tm::set_queue_depth(state.queue.capacity().ready as i64);
    state
        .ordering
        .append(QueueEventInput {
            event_type: "task_submitted".into(),
            task_id: subtask.task_id.clone(),
            subtask_id: Some(subtask.id.clone()),
            ..QueueEventInput::default()
        })
        .map_err(AppError::from)?;

    Ok(Json(SubmitResponse {
        subtask_id: subtask.id,
        queued: true,
        route_hint,
    }))
}

pub async fn capacity(State(state): State<AppState>) -> Json<serde_json::Value> {
    let now = now_ms();
    let snapshot = state.queue.capacity();
    let load = load_snapshot(&state, now);
    Json(serde_json::json!({
        "queue": snapshot,
        "activeAgents": state.agents.active_count(now),
        "pressure": load.pressure(),
    }))
}

// --- Claim / result (signed agent endpoints) ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub agent_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask: Option<Subtask>,
}

pub async fn claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ClaimResponse>, AppError> {
    let agent = verify_signed_request(&state, &headers, "POST", "/tasks/claim", &body)?;
    let request: ClaimRequest = parse_body(&body)?;
    if request.agent_id != agent {
        return Err(AppError::from(ScheduleError::NoEligibleAgent(
            "body agentId does not match signer".into(),
        )));
    }
    let now = now_ms();
    let blacklisted = state.blacklist.is_blacklisted(&agent, now);
    if let Err(e) = state.agents.check_eligible(&agent, blacklisted, now) {
        if e == ScheduleError::RateLimited {
            state.tracker.record_rate_limit_hit(&agent, now);
        }
        return Err(e.into());
    }

    let subtask = state.queue.claim(&agent, now);
    if let Some(task) = &subtask {
        state.tracker.record_claim(&agent, now);
        state
            .ordering
            .append(QueueEventInput {
                event_type: "task_claimed".into(),
                task_id: task.task_id.clone(),
                subtask_id: Some(task.id.clone()),
                ..QueueEventInput::default()
            })
            .map_err(AppError::from)?;
        tm::set_queue_depth(state.queue.capacity().ready as i64);
    }
    Ok(Json(ClaimResponse { subtask }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub completed: bool,
    pub credited: f64,
}

pub async fn result(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResultResponse>, AppError> {
    let agent = verify_signed_request(&state, &headers, "POST", "/tasks/result", &body)?;
    let result: SubtaskResult = parse_body(&body)?;
    if result.agent_id != agent {
        return Err(AppError::from(ScheduleError::NoEligibleAgent(
            "result agentId does not match signer".into(),
        )));
    }
    let now = now_ms();

    let outcome = match state.queue.complete(result, Some(state.keyring.as_ref()), now) {
        Ok(outcome) => outcome,
        Err(e) => {
            if matches!(&e, ScheduleError::NoEligibleAgent(msg) if msg.contains("signature")) {
                state.tracker.record_signature_failure(&agent, now);
                state.tracker.record_requeue(&agent, now);
            }
            return Err(e.into());
        }
    };

    state.tracker.record_task_result(
        &agent,
        now,
        outcome.result.ok,
        &outcome.result.output,
        outcome.result.duration_ms,
    );
    state
        .ordering
        .append(QueueEventInput {
            event_type: "task_complete".into(),
            task_id: outcome.subtask.task_id.clone(),
            subtask_id: Some(outcome.subtask.id.clone()),
            ..QueueEventInput::default()
        })
        .map_err(AppError::from)?;

    // Metered accrual for the worker.
    let report = ContributionReport {
        report_id: format!("result:{}", outcome.subtask.id),
        account_id: agent.clone(),
        cpu_seconds_equivalent: outcome.result.duration_ms as f64 / 1_000.0,
        resource_class: outcome.subtask.project_meta.resource_class,
        quality: None,
        related_task_id: Some(outcome.subtask.task_id.clone()),
    };
    let credited = state
        .credits
        .accrue(&report, load_snapshot(&state, now))
        .map(|tx| tx.credits)
        .unwrap_or(0.0);

    // Behavioral pass over the fresh stats.
    let stats = state.tracker.stats(&agent, now);
    for anomaly in evaluate(&agent, &stats, &state.rules) {
        apply_anomaly(&state, &anomaly).await;
    }

    debug!(target: "gateway", agent = %agent, subtask = %outcome.subtask.id, credited, "result accepted");
    Ok(Json(ResultResponse {
        completed: true,
        credited,
    }))
}

// --- Direct work ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    pub subtask: Subtask,
    pub offered_to: String,
}

pub async fn direct_offer(
    State(state): State<AppState>,
    Json(request): Json<OfferRequest>,
) -> Result<Json<edgecoder_scheduler::DirectWorkOffer>, AppError> {
    let offer = state.direct_work.offer(
        request.subtask,
        &state.identity.peer_id,
        &request.offered_to,
    );
    let payload = serde_json::to_value(&offer)
        .map_err(|e| AppError::internal(e.to_string()))?;
    state
        .broadcaster
        .broadcast(message_type::TASK_OFFER, payload, 60_000)
        .await;
    Ok(Json(offer))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    pub offer_id: String,
    pub peer_id: String,
}

pub async fn direct_accept(
    State(state): State<AppState>,
    Json(request): Json<AcceptRequest>,
) -> Result<Json<edgecoder_scheduler::DirectWorkOffer>, AppError> {
    let offer = state.direct_work.accept(&request.offer_id, &request.peer_id)?;
    Ok(Json(offer))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectResultRequest {
    pub offer_id: String,
    pub result: SubtaskResult,
}

pub async fn direct_result(
    State(state): State<AppState>,
    Json(request): Json<DirectResultRequest>,
) -> Result<Json<edgecoder_scheduler::DirectWorkOffer>, AppError> {
    let offer = state.direct_work.result(&request.offer_id, request.result)?;
    Ok(Json(offer))
}

pub async fn direct_audit(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "audit": state.direct_work.audit() }))
}
