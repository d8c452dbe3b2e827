//! Fair-share task scheduling for the EdgeCoder coordinator.
//!
//! A multi-tenant queue with per-project fairness, priority tie-breaking, a
//! claim/complete lifecycle with timeout requeue, sliding-window rate limits,
//! and the peer-to-peer direct-work offer book.

pub mod agents;
pub mod direct_work;
pub mod queue;
pub mod rate_limit;

pub use agents::AgentRegistry;
pub use direct_work::{DirectWorkBook, DirectWorkOffer, OfferState};
pub use queue::{CapacitySnapshot, CompletionOutcome, FairShareQueue, QueueConfig};
pub use rate_limit::SlidingWindowLimiter;
