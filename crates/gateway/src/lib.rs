#![forbid(unsafe_code)]

//! The HTTP surface of the EdgeCoder coordinator.
//!
//! One axum router carries identity, mesh, scheduler, direct-work, ledger,
//! economy, security and credit-sync endpoints, gated by the mesh token and a
//! per-IP token bucket, behind the tower resilience stack.

pub mod auth;
pub mod error;
pub mod limiter;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use state::AppState;

use anyhow::Result;
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use limiter::IpLimiter;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tower::{
    limit::ConcurrencyLimitLayer, load_shed::LoadShedLayer, timeout::TimeoutLayer, BoxError,
    ServiceBuilder,
};
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};

/// Server tuning.
pub struct GatewayConfig {
    pub listen_addr: String,
    pub rps: u32,
    pub burst: u32,
    pub body_limit_kb: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8440".into(),
            rps: 50,
            burst: 100,
            body_limit_kb: 512,
        }
    }
}

async fn map_middleware_error(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({ "error": "timeout" })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "overloaded" })),
        )
    }
}

/// Build the full coordinator router.
pub fn router(state: AppState, limiter: IpLimiter) -> Router {
    Router::new()
        // Identity & health (public).
        .route("/identity", get(routes::identity::identity))
        .route("/health/runtime", get(routes::identity::health_runtime))
        .route("/status", get(routes::identity::status))
        .route("/metrics", get(routes::identity::metrics))
        // Mesh.
        .route("/mesh/peers", get(routes::mesh::peers))
        .route("/mesh/register-peer", post(routes::mesh::register_peer))
        .route("/mesh/ingest", post(routes::mesh::ingest))
        .route("/mesh/capabilities", get(routes::mesh::capabilities))
        // Scheduler.
        .route("/submit", post(routes::tasks::submit))
        .route("/capacity", get(routes::tasks::capacity))
        .route("/tasks/claim", post(routes::tasks::claim))
        .route("/tasks/result", post(routes::tasks::result))
        // Direct work.
        .route(
            "/agent-mesh/direct-work/offer",
            post(routes::tasks::direct_offer),
        )
        .route(
            "/agent-mesh/direct-work/accept",
            post(routes::tasks::direct_accept),
        )
        .route(
            "/agent-mesh/direct-work/result",
            post(routes::tasks::direct_result),
        )
        .route(
            "/agent-mesh/direct-work/audit",
            get(routes::tasks::direct_audit),
        )
        // Ledger.
        .route("/ledger/snapshot", get(routes::ledger::snapshot))
        .route("/ledger/verify", post(routes::ledger::verify))
        // Economy.
        .route(
            "/economy/payments/intents",
            post(routes::economy::create_intent),
        )
        .route(
            "/economy/payments/intents/:id",
            get(routes::economy::get_intent),
        )
        .route("/economy/price/quote", get(routes::economy::price_quote))
        .route(
            "/economy/issuance/current",
            get(routes::economy::issuance_current),
        )
        .route(
            "/economy/issuance/epochs",
            get(routes::economy::issuance_epochs),
        )
        .route(
            "/economy/issuance/epochs/:id",
            get(routes::economy::issuance_epoch),
        )
        .route("/economy/balance", get(routes::economy::balance))
        // Security.
        .route("/security/blacklist", get(routes::security::blacklist))
        .route(
            "/security/blacklist/audit",
            get(routes::security::blacklist_audit),
        )
        // Credits.
        .route("/credits/ble-sync", post(routes::economy::ble_sync))
        .route_layer(middleware::from_fn_with_state(
            limiter,
            limiter::rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::mesh_token_middleware,
        ))
        .with_state(state)
}

/// Serve the coordinator API until the shutdown signal flips.
pub async fn run_server(
    config: GatewayConfig,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let limiter = IpLimiter::new(config.rps, config.burst);
    let app = router(state, limiter)
        // `HandleErrorLayer` must wrap the fallible layers to make the
        // service infallible.
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(map_middleware_error))
                .layer(LoadShedLayer::new())
                .layer(ConcurrencyLimitLayer::new(256))
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.body_limit_kb * 1024));

    let addr: SocketAddr = config.listen_addr.parse()?;
    info!(target: "gateway", %addr, "coordinator API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_rx.changed().await.ok();
        info!(target: "gateway", "shutting down gracefully");
    });

    if let Err(e) = server.await {
        error!(target: "gateway", error = %e, "server error");
    }
    Ok(())
}
