//! Mesh gossip and federation for the EdgeCoder coordinator.
//!
//! Signed message propagation, peer-exchange, capability summaries, and
//! per-peer reconnection with backoff. Delivery is at-least-once and
//! best-effort; idempotent ingestion on the receiving side makes duplicates
//! safe.

pub mod backoff;
pub mod bootstrap;
pub mod broadcast;
pub mod capabilities;
pub mod exchange;
pub mod peer_table;
pub mod validator;

pub use backoff::{BackoffPolicy, ReconnectRegistry};
pub use broadcast::{Broadcaster, DeliveryReport};
pub use capabilities::CapabilityRegistry;
pub use peer_table::{PeerEntry, PeerTable};
pub use validator::{Admission, MessageValidator};

use thiserror::Error;

/// Gossip message types understood by the coordinator.
pub mod message_type {
    pub const PEER_EXCHANGE: &str = "peer_exchange";
    pub const CAPABILITY_SUMMARY: &str = "capability_summary";
    pub const BLACKLIST_UPDATE: &str = "blacklist_update";
    pub const TASK_OFFER: &str = "task_offer";
    pub const QUORUM_PROPOSAL: &str = "quorum_proposal";
    pub const QUORUM_VOTE: &str = "quorum_vote";
}

/// Transport-level mesh failures (HTTP reachability, decode).
#[derive(Debug, Error)]
pub enum MeshNetError {
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
}
