//! Monotonic timestamp helpers.
//!
//! Heartbeats, cooldowns, and health checks all reason about wall-clock
//! elapsed time rather than calendar dates, so this sticks to
//! [`std::time::Instant`]/[`std::time::SystemTime`] rather than pulling in a
//! calendar crate the rest of this workspace has no other use for.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating on clock errors instead of
/// panicking (the real-time paths that touch heartbeats must never panic).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds since the Unix epoch, for the ring header's `creation_timestamp`.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// True when `last_update_ms` is older than `timeout_ms` relative to now.
pub fn is_stale(last_update_ms: u64, timeout_ms: u64) -> bool {
    now_ms().saturating_sub(last_update_ms) > timeout_ms
}
