//! Metric helpers for `sublink`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled the helpers compile to no-ops.

use crate::chunk::EvictionReason;

/// Name of the counter tracking messages handed to the merge stage.
pub const MESSAGES_RECEIVED: &str = "sublink_messages_received_total";
/// Name of the counter tracking reconnect attempts.
pub const RECONNECTS: &str = "sublink_reconnects_total";
/// Name of the counter tracking evicted incomplete chunked messages.
pub const CHUNKS_EVICTED: &str = "sublink_chunks_evicted_total";
/// Name of the gauge tracking sessions in the `Ready` state.
pub const SESSIONS_READY: &str = "sublink_sessions_ready";

/// Record a message delivered by a session.
pub fn inc_messages_received() {
    #[cfg(feature = "metrics")]
    metrics::counter!(MESSAGES_RECEIVED).increment(1);
}

/// Record a reconnect attempt.
pub fn inc_reconnects() {
    #[cfg(feature = "metrics")]
    metrics::counter!(RECONNECTS).increment(1);
}

/// Record an evicted chunked message.
pub fn inc_chunks_evicted(reason: EvictionReason) {
    #[cfg(feature = "metrics")]
    metrics::counter!(CHUNKS_EVICTED, "reason" => reason.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Increment the ready sessions gauge.
pub fn inc_sessions_ready() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(SESSIONS_READY).increment(1.0);
}

/// Decrement the ready sessions gauge.
pub fn dec_sessions_ready() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(SESSIONS_READY).decrement(1.0);
}
