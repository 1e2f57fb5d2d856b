//! Client-side manager for server-sent event streams.
//!
//! [`connection_manager::StreamManager`] keeps at most one live stream per
//! logical id, shares it between callers by reference count, reconnects with
//! bounded exponential backoff and routes decoded messages to listeners.

// Core
pub mod connection_manager;
pub mod error;
pub mod stream;

// Supporting modules
pub mod auth;
pub mod config;
pub mod metrics;
pub mod telemetry;

// Status API
pub mod api;
pub mod server;

pub use connection_manager::{
    ConnectionConfig, ConnectionInfo, ConnectionStatus, EventListener, StatusListener,
    StreamEvent, StreamManager, Subscription, DATA_EVENT,
};
pub use error::{Result, StreamError};
