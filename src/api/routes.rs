use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::health;
use super::metrics::prometheus_metrics;
use super::streams::{get_stream, list_streams};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health
        .route("/health", get(health))
        // Stream status
        .route("/streams", get(list_streams))
        .route("/streams/{id}", get(get_stream))
        // Prometheus
        .route("/metrics", get(prometheus_metrics))
}
