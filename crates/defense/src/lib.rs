//! Blacklist and behavioral defense for the EdgeCoder coordinator.
//!
//! Signed evidence feeding a hash-chained audit log, rolling behavioral
//! statistics, rule-based anomaly detection, and the strike-based
//! auto-blacklister.

pub mod blacklist;
pub mod rules;
pub mod striker;
pub mod tracker;

pub use blacklist::BlacklistChain;
pub use rules::{evaluate, RulesConfig};
pub use striker::{AutoBlacklister, BlacklistAction};
pub use tracker::BehaviorTracker;
