//! Health check endpoint.

use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::ConnectionStatus;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub streams: StreamHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct StreamHealthResponse {
    /// Streams listed in the settings
    pub configured: usize,
    /// Streams currently registered
    pub total: usize,
    pub total_ref_count: usize,
    pub by_status: HashMap<String, usize>,
}

/// GET /health - `healthy` unless some stream is parked in `error`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.manager.stats();
    let errored = stats
        .by_status
        .get(ConnectionStatus::Error.as_str())
        .copied()
        .unwrap_or(0);

    let status = if errored == 0 { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        streams: StreamHealthResponse {
            configured: state.settings.streams.len(),
            total: stats.total_connections,
            total_ref_count: stats.total_ref_count,
            by_status: stats.by_status,
        },
    })
}
