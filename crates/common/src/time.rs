//! Wall-clock helpers
//!
//! Token expiry, blacklist windows and history timestamps are all stored as
//! absolute unix timestamps in milliseconds so they survive process restarts.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix milliseconds.
///
/// A clock set before the epoch reads as 0 rather than failing.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
