//! Ref-counted registry of server-sent event stream connections.
//!
//! A [`StreamManager`] maps connection ids to at most one live stream each.
//! Every stream owns its reconnection policy, its listeners and its status,
//! and is torn down when the last reference is released.

mod backoff;
mod connection;
mod listeners;
mod registry;
mod stats;
mod transport;
mod types;

pub use backoff::BackoffPolicy;
pub use connection::DATA_EVENT;
pub use listeners::Subscription;
pub use registry::StreamManager;
pub use stats::ManagerStats;
pub use types::{
    ConnectionConfig, ConnectionInfo, ConnectionStatus, EventListener, StatusListener, StreamEvent,
};
