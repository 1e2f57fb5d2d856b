//! Metrics helper struct for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::connection_manager::ConnectionStatus;

use super::{
    CONNECTIONS_ACTIVE, CONNECTION_ATTEMPTS_TOTAL, LISTENER_PANICS_TOTAL,
    MESSAGES_MALFORMED_TOTAL, MESSAGES_RECEIVED_TOTAL, RECONNECTS_SCHEDULED_TOTAL,
    STATUS_TRANSITIONS_TOTAL, TEARDOWNS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording stream metrics
pub struct StreamMetrics;

impl StreamMetrics {
    /// Record a connection added to the registry
    pub fn connection_opened() {
        CONNECTIONS_ACTIVE.inc();
    }

    /// Record a connection removed from the registry and torn down
    pub fn connection_closed() {
        CONNECTIONS_ACTIVE.dec();
        TEARDOWNS_TOTAL.inc();
    }

    /// Record a transport attempt
    pub fn record_attempt() {
        CONNECTION_ATTEMPTS_TOTAL.inc();
    }

    pub fn record_reconnect_scheduled() {
        RECONNECTS_SCHEDULED_TOTAL.inc();
    }

    pub fn record_status(status: ConnectionStatus) {
        STATUS_TRANSITIONS_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();
    }

    /// Record a decoded message by its type tag
    pub fn record_message(kind: &str) {
        MESSAGES_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_malformed() {
        MESSAGES_MALFORMED_TOTAL.inc();
    }

    pub fn record_listener_panic() {
        LISTENER_PANICS_TOTAL.inc();
    }
}
