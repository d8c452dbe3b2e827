//! Coordinator-wide Prometheus metrics.
//!
//! Metrics are registered once behind `OnceCell` and written through the
//! helper accessors; `encode_metrics` renders the default registry for the
//! gateway's `/metrics` endpoint.

use once_cell::sync::OnceCell;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge,
};

static GOSSIP_MESSAGES: OnceCell<IntCounterVec> = OnceCell::new();
static HTTP_REQUESTS: OnceCell<IntCounterVec> = OnceCell::new();
static HTTP_LATENCY: OnceCell<HistogramVec> = OnceCell::new();
static QUEUE_DEPTH: OnceCell<IntGauge> = OnceCell::new();
static PEER_COUNT: OnceCell<IntGauge> = OnceCell::new();

/// Registers every coordinator metric. Call once at startup, before serving.
pub fn install_metrics() {
    let _ = GOSSIP_MESSAGES.set(
        register_int_counter_vec!(
            "edgecoder_gossip_messages_total",
            "Gossip messages by direction and outcome",
            &["direction", "outcome"]
        )
        .expect("register_int_counter_vec"),
    );
    let _ = HTTP_REQUESTS.set(
        register_int_counter_vec!(
            "edgecoder_http_requests_total",
            "HTTP requests by route and result",
            &["route", "result"]
        )
        .expect("register_int_counter_vec"),
    );
    let _ = HTTP_LATENCY.set(
        register_histogram_vec!(
            "edgecoder_http_request_duration_seconds",
            "Latency of HTTP requests (seconds)",
            &["route"],
            prometheus::exponential_buckets(0.001, 2.0, 12).expect("buckets")
        )
        .expect("register_histogram_vec"),
    );
    let _ = QUEUE_DEPTH.set(
        register_int_gauge!("edgecoder_queue_depth", "Ready subtasks in the queue")
            .expect("register_int_gauge"),
    );
    let _ = PEER_COUNT.set(
        register_int_gauge!("edgecoder_peer_count", "Entries in the peer table")
            .expect("register_int_gauge"),
    );
}

pub fn record_gossip(direction: &str, outcome: &str) {
    if let Some(c) = GOSSIP_MESSAGES.get() {
        c.with_label_values(&[direction, outcome]).inc();
    }
}

pub fn record_http(route: &str, result: &str, seconds: f64) {
    if let Some(c) = HTTP_REQUESTS.get() {
        c.with_label_values(&[route, result]).inc();
    }
    if let Some(h) = HTTP_LATENCY.get() {
        h.with_label_values(&[route]).observe(seconds);
    }
}

pub fn set_queue_depth(depth: i64) {
    if let Some(g) = QUEUE_DEPTH.get() {
        g.set(depth);
    }
}

pub fn set_peer_count(count: i64) {
    if let Some(g) = PEER_COUNT.get() {
        g.set(count);
    }
}

/// Renders the default registry in the Prometheus text format.
pub fn encode_metrics() -> (String, Vec<u8>) {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::with_capacity(1 << 16);
    if let Err(e) = encoder.encode(&metric_families, &mut buf) {
        tracing::error!(error = %e, "failed to encode prometheus metrics");
    }
    (encoder.format_type().to_string(), buf)
}
