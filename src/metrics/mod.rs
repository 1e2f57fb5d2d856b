//! Prometheus metrics for the stream connection manager.
//!
//! - Connection metrics (registered connections, attempts, teardowns)
//! - Status transition counts
//! - Message metrics (received by type, malformed frames)
//! - Listener failures

mod helpers;

pub use helpers::{encode_metrics, StreamMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "dashboard_stream";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of logical connections currently registered
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of registered stream connections"
    ).unwrap();

    /// Transport attempts started (initial opens and reconnects)
    pub static ref CONNECTION_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connection_attempts_total", METRIC_PREFIX),
        "Total stream open attempts"
    ).unwrap();

    /// Reconnects scheduled by the backoff policy
    pub static ref RECONNECTS_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_scheduled_total", METRIC_PREFIX),
        "Total stream reconnects scheduled"
    ).unwrap();

    /// Connections torn down after their last reference was released
    pub static ref TEARDOWNS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_teardowns_total", METRIC_PREFIX),
        "Total stream connections torn down"
    ).unwrap();

    /// Status transitions by target status
    pub static ref STATUS_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_status_transitions_total", METRIC_PREFIX),
        "Total connection status transitions",
        &["status"]
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Decoded messages by type
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total stream messages received",
        &["type"]
    ).unwrap();

    /// Frames dropped because they could not be decoded
    pub static ref MESSAGES_MALFORMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_malformed_total", METRIC_PREFIX),
        "Total malformed stream messages dropped"
    ).unwrap();

    /// Listener invocations that panicked
    pub static ref LISTENER_PANICS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_listener_panics_total", METRIC_PREFIX),
        "Total listener panics caught during delivery"
    ).unwrap();
}
