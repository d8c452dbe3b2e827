//! Pricing, payment intents, issuance and offline credit sync.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use edgecoder_economy::price_per_compute_unit_sats;
use edgecoder_types::credit::{CreditTransaction, PaymentIntent, PriceQuote};
use edgecoder_types::task::ResourceClass;
use edgecoder_types::time::now_ms;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuery {
    pub resource_class: Option<String>,
}

fn parse_class(raw: Option<&str>) -> Result<ResourceClass, AppError> {
    match raw.unwrap_or("cpu") {
        "cpu" => Ok(ResourceClass::Cpu),
        "gpu" => Ok(ResourceClass::Gpu),
        other => Err(AppError::bad_request(format!(
            "unknown resource class {other:?}"
        ))),
    }
}

fn quote(state: &AppState, class: ResourceClass) -> PriceQuote {
    let capacity = state.queue.capacity();
    let demand = match class {
        ResourceClass::Cpu => capacity.cpu_ready,
        ResourceClass::Gpu => capacity.gpu_ready,
    } as f64;
    let supply = state.agents.active_count(now_ms()).max(1) as f64;
    price_per_compute_unit_sats(class, demand, supply)
}

pub async fn price_quote(
    State(state): State<AppState>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PriceQuote>, AppError> {
    let class = parse_class(query.resource_class.as_deref())?;
    Ok(Json(quote(&state, class)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRequest {
    pub account_id: String,
    pub credits: f64,
}

pub async fn create_intent(
    State(state): State<AppState>,
    Json(request): Json<IntentRequest>,
) -> Result<Json<PaymentIntent>, AppError> {
    if !(request.credits > 0.0) {
        return Err(AppError::bad_request("credits must be positive"));
    }
    state
        .submission_limiter
        .check(&request.account_id, now_ms())?;
    let price = quote(&state, ResourceClass::Cpu);
    let amount_sats = (request.credits * price.price_per_compute_unit_sats).ceil() as u64;
    let intent = state
        .payments
        .create_intent(&request.account_id, request.credits, amount_sats)
        .await?;
    Ok(Json(intent))
}

pub async fn get_intent(
    State(state): State<AppState>,
    Path(intent_id): Path<String>,
) -> Result<Json<PaymentIntent>, AppError> {
    Ok(Json(state.payments.get(&intent_id)?))
}

pub async fn issuance_current(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    match state.issuance.current() {
        Some(bundle) => Ok(Json(serde_json::json!(bundle))),
        None => Err(AppError::not_found("no issuance epoch yet")),
    }
}

pub async fn issuance_epochs(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "params": state.issuance.params(),
        "epochs": state.issuance.history(),
    }))
}

pub async fn issuance_epoch(
    State(state): State<AppState>,
    Path(epoch_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .issuance
        .get(&epoch_id)
        .map(|bundle| Json(serde_json::json!(bundle)))
        .ok_or_else(|| AppError::not_found(format!("epoch {epoch_id}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BleSyncRequest {
    pub transactions: Vec<CreditTransaction>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BleSyncResponse {
    #[serde(flatten)]
    pub report: edgecoder_economy::SyncReport,
}

pub async fn ble_sync(
    State(state): State<AppState>,
    Json(request): Json<BleSyncRequest>,
) -> Json<BleSyncResponse> {
    let report = state.credits.sync_offline(request.transactions);
    Json(BleSyncResponse { report })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub account_id: String,
}

pub async fn balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "accountId": query.account_id,
        "balance": state.credits.balance(&query.account_id),
    }))
}
