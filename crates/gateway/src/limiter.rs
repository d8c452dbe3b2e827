//! Per-IP request limiting on the HTTP surface.
//!
//! Backed by the same sliding-window limiter the scheduler uses for
//! submissions and claims, keyed by client IP: `burst` requests per window,
//! with the window sized so the sustained rate works out to `rps`.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use edgecoder_scheduler::SlidingWindowLimiter;
use edgecoder_types::time::now_ms;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

#[derive(Clone)]
pub struct IpLimiter {
    window: Arc<SlidingWindowLimiter>,
}

impl IpLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        let rps = rps.max(1) as u64;
        let burst = burst.max(1);
        let window_ms = (burst as u64 * 1_000 / rps).max(1);
        Self {
            window: Arc::new(SlidingWindowLimiter::new(burst as usize, window_ms)),
        }
    }

    fn admit(&self, req: &Request<Body>) -> bool {
        let ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0.ip())
            .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]));
        self.window.check(&ip.to_string(), now_ms()).is_ok()
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<IpLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if limiter.admit(&req) {
        next.run(req).await
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            axum::response::Json(serde_json::json!({ "error": "rate_limited" })),
        )
            .into_response()
    }
}
