//! Wall-clock helpers.
//!
//! Persisted timestamps are milliseconds since the Unix epoch. Durations that
//! drive timeouts and probes use `std::time::Instant` instead and never go
//! through this module.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating to zero if the clock is set
/// before 1970.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Seconds since the Unix epoch as a float, used by the status snapshot.
#[must_use]
pub fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
