//! API layer - local status endpoints for the monitor.

mod health;
mod metrics;
mod routes;
mod streams;

pub use health::health;
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use streams::{get_stream, list_streams, StreamApiError, StreamErrorResponse};
