//! Observability infrastructure: structured logging initialization and the
//! Prometheus metric registry shared by the coordinator components.

pub mod init;
pub mod metrics;

pub use init::init_tracing;
pub use metrics::{encode_metrics, install_metrics};
