//! Core data structures and error types for the EdgeCoder coordinator.
//!
//! Everything that crosses a crate or wire boundary lives here: the peer and
//! mesh envelope model, subtasks and results, credit transactions, the
//! hash-chained record types, issuance records, and the error taxonomy with
//! stable machine-readable codes.

pub mod behavior;
pub mod chain;
pub mod codec;
pub mod credit;
pub mod error;
pub mod ids;
pub mod issuance;
pub mod peer;
pub mod task;
pub mod time;

pub use error::ErrorCode;
pub use ids::*;
