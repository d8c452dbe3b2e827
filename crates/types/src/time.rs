//! Millisecond epoch clock helpers.
//!
//! All timestamps on the wire are milliseconds since the Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in ms since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
