use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::Result;
use crate::metrics::StreamMetrics;

use super::connection::Connection;
use super::listeners::Subscription;
use super::stats::ManagerStats;
use super::types::{
    validate_headers, ConnectionConfig, ConnectionInfo, ConnectionStatus, EventListener,
    StatusListener,
};

/// What `connect` has to do once the registry lock is released
enum ConnectAction {
    Start,
    Restart,
    Reuse,
}

/// Registry of logical stream connections, keyed by id.
///
/// Each id maps to at most one live connection. `connect` on an existing id
/// adds a reference instead of opening a second transport, and `disconnect`
/// only tears the stream down when the last reference is released.
///
/// Methods that start a transport (`connect`, `update_headers`,
/// `update_all_headers`) must be called from within a Tokio runtime.
pub struct StreamManager {
    /// connection_id -> Connection
    connections: DashMap<String, Arc<Connection>>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Open (or reuse) the stream registered under `id`.
    ///
    /// The first caller's `config` wins; later callers only add a reference.
    /// If the existing stream is `disconnected` or `error`, it is restarted
    /// with its attempt counter reset.
    pub fn connect(&self, id: impl Into<String>, config: ConnectionConfig) -> Result<ConnectionInfo> {
        let id = id.into();

        // Decide under the shard lock, act after releasing it
        let (connection, action) = match self.connections.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let connection = Arc::clone(entry.get());
                let action = if connection.retain() {
                    ConnectAction::Restart
                } else {
                    ConnectAction::Reuse
                };
                (connection, action)
            }
            Entry::Vacant(entry) => {
                let connection = Connection::new(id.clone(), config)?;
                entry.insert(Arc::clone(&connection));
                StreamMetrics::connection_opened();
                (connection, ConnectAction::Start)
            }
        };

        match action {
            ConnectAction::Start => {
                tracing::info!(connection_id = %id, "Stream connection registered");
                connection.start(false);
            }
            ConnectAction::Restart => {
                tracing::info!(connection_id = %id, "Restarting idle stream connection");
                connection.start(true);
            }
            ConnectAction::Reuse => {}
        }

        Ok(connection.info())
    }

    /// Release one reference to `id`, or all of them when `force` is set.
    ///
    /// Returns true if this call tore the connection down.
    pub fn disconnect(&self, id: &str, force: bool) -> bool {
        let removed = self
            .connections
            .remove_if(id, |_, connection| connection.release(force));

        match removed {
            Some((_, connection)) => {
                StreamMetrics::connection_closed();
                connection.shutdown();
                true
            }
            None => false,
        }
    }

    /// Force-disconnect every registered connection.
    pub fn disconnect_all(&self) {
        let ids: Vec<String> = self.connection_ids();
        let count = ids.len();
        for id in ids {
            self.disconnect(&id, true);
        }
        tracing::info!(count, "Disconnected all stream connections");
    }

    /// Register `listener` for decoded messages delivered under `event_type`.
    ///
    /// Registering the same handle twice on the same key keeps one
    /// registration, so it sees each message once. Returns a no-op
    /// subscription if `id` is not registered.
    pub fn subscribe(&self, id: &str, event_type: &str, listener: EventListener) -> Subscription {
        match self.get(id) {
            Some(connection) => connection.add_listener(event_type, listener),
            None => {
                tracing::debug!(connection_id = %id, event_type = %event_type, "Subscribe on unknown connection ignored");
                Subscription::noop()
            }
        }
    }

    /// Register `listener` for status transitions of `id`.
    pub fn on_status_change(&self, id: &str, listener: StatusListener) -> Subscription {
        match self.get(id) {
            Some(connection) => connection.add_status_listener(listener),
            None => Subscription::noop(),
        }
    }

    pub fn status(&self, id: &str) -> Option<ConnectionStatus> {
        self.get(id).map(|connection| connection.status())
    }

    pub fn has_connection(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn connection(&self, id: &str) -> Option<ConnectionInfo> {
        self.get(id).map(|connection| connection.info())
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Merge `headers` into the config of `id`.
    ///
    /// With `reconnect` set, a stream parked in `error` or `disconnected`
    /// restarts immediately with attempts reset, bypassing backoff. Returns
    /// true if a restart was triggered.
    pub fn update_headers(
        &self,
        id: &str,
        headers: &HashMap<String, String>,
        reconnect: bool,
    ) -> Result<bool> {
        match self.get(id) {
            Some(connection) => connection.update_headers(headers, reconnect),
            None => {
                tracing::debug!(connection_id = %id, "Header update on unknown connection ignored");
                Ok(false)
            }
        }
    }

    /// Apply [`update_headers`](Self::update_headers) to every connection.
    /// Returns the number of streams restarted.
    pub fn update_all_headers(
        &self,
        headers: &HashMap<String, String>,
        reconnect: bool,
    ) -> Result<usize> {
        validate_headers(headers)?;

        let mut restarted = 0;
        for connection in self.all() {
            if connection.update_headers(headers, reconnect)? {
                restarted += 1;
            }
        }

        tracing::info!(restarted, "Updated headers on all stream connections");
        Ok(restarted)
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        for connection in self.all() {
            let info = connection.info();
            stats.total_connections += 1;
            stats.total_ref_count += info.ref_count;
            *stats
                .by_status
                .entry(info.status.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|r| Arc::clone(r.value()))
    }

    fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|r| Arc::clone(r.value())).collect()
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        for (_, connection) in std::mem::take(&mut self.connections) {
            StreamMetrics::connection_closed();
            connection.shutdown();
        }
    }
}
