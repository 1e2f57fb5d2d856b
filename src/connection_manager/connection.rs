//! A single logical stream connection and its bookkeeping state.
//!
//! All mutable state sits behind one mutex. Every transport attempt carries
//! the generation it was started under; once a newer attempt (or teardown)
//! bumps the generation, the older attempt can no longer change status,
//! counters or deliver messages. Listeners are always invoked after the lock
//! is released so they may call back into the manager.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, StreamError};
use crate::metrics::StreamMetrics;
use crate::stream::{Frame, StreamMessage};

use super::backoff::BackoffPolicy;
use super::listeners::{ListenerSet, Registered, Subscription, SubscriptionKey};
use super::transport;
use super::types::{
    validate_headers, ConnectionConfig, ConnectionInfo, ConnectionStatus, EventListener,
    StatusListener, StreamEvent,
};

/// Listener key that receives every `data` message
pub const DATA_EVENT: &str = "data";

/// Where in an attempt a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptPhase {
    /// Sending the request or validating the response
    Open,
    /// Reading an established stream
    Read,
}

type EventFn = dyn Fn(&Value, &StreamEvent) + Send + Sync;
type StatusFn = dyn Fn(ConnectionStatus, Option<&StreamError>) + Send + Sync;

pub(crate) struct Connection {
    id: String,
    instance_id: Uuid,
    created_at: DateTime<Utc>,
    client: reqwest::Client,
    next_listener_id: AtomicU64,
    state: Mutex<ConnectionState>,
}

struct ConnectionState {
    config: ConnectionConfig,
    status: ConnectionStatus,
    ref_count: usize,
    reconnect_attempts: u32,
    generation: u64,
    cancel: Option<CancellationToken>,
    reconnect_timer: Option<JoinHandle<()>>,
    listeners: HashMap<String, ListenerSet<EventFn>>,
    status_listeners: ListenerSet<StatusFn>,
    last_connected_at: Option<DateTime<Utc>>,
    last_error: Option<StreamError>,
    closed: bool,
}

impl ConnectionState {
    fn is_current(&self, generation: u64) -> bool {
        !self.closed && self.generation == generation
    }

    fn set_status(&mut self, status: ConnectionStatus, error: Option<StreamError>) -> StatusNotice {
        self.status = status;
        if let Some(err) = &error {
            self.last_error = Some(err.clone());
        }
        StatusNotice {
            status,
            error,
            listeners: self.status_listeners.snapshot(),
        }
    }

    fn listener_count(&self) -> usize {
        self.listeners.values().map(ListenerSet::len).sum()
    }
}

/// A status transition captured under the lock, delivered after it is released.
#[must_use]
struct StatusNotice {
    status: ConnectionStatus,
    error: Option<StreamError>,
    listeners: Vec<Registered<StatusFn>>,
}

impl StatusNotice {
    fn deliver(&self, connection_id: &str) {
        StreamMetrics::record_status(self.status);
        for entry in &self.listeners {
            if !entry.is_active() {
                continue;
            }
            invoke_guarded(connection_id, || {
                (entry.listener)(self.status, self.error.as_ref())
            });
        }
    }
}

fn invoke_guarded(connection_id: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        StreamMetrics::record_listener_panic();
        tracing::warn!(connection_id = %connection_id, "Stream listener panicked; continuing delivery");
    }
}

impl Connection {
    /// Build a connection in `connecting` state with one reference.
    /// The transport is not started until [`start`](Self::start).
    pub fn new(id: String, config: ConnectionConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.open_timeout())
            .cookie_store(config.with_credentials)
            .build()
            .map_err(|e| StreamError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Arc::new(Self {
            id,
            instance_id: Uuid::new_v4(),
            created_at: Utc::now(),
            client,
            next_listener_id: AtomicU64::new(1),
            state: Mutex::new(ConnectionState {
                config,
                status: ConnectionStatus::Connecting,
                ref_count: 1,
                reconnect_attempts: 0,
                generation: 0,
                cancel: None,
                reconnect_timer: None,
                listeners: HashMap::new(),
                status_listeners: ListenerSet::default(),
                last_connected_at: None,
                last_error: None,
                closed: false,
            }),
        }))
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state().status
    }

    pub fn info(&self) -> ConnectionInfo {
        let state = self.state();
        ConnectionInfo {
            id: self.id.clone(),
            instance_id: self.instance_id,
            status: state.status,
            ref_count: state.ref_count,
            reconnect_attempts: state.reconnect_attempts,
            config: state.config.clone(),
            listener_count: state.listener_count(),
            status_listener_count: state.status_listeners.len(),
            created_at: self.created_at,
            last_connected_at: state.last_connected_at,
            last_error: state.last_error.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------

    /// Add a reference. Returns true if the transport should be restarted.
    pub fn retain(&self) -> bool {
        let mut state = self.state();
        state.ref_count += 1;
        tracing::debug!(
            connection_id = %self.id,
            ref_count = state.ref_count,
            status = %state.status,
            "Reusing stream connection"
        );
        state.status.is_restartable()
    }

    /// Drop a reference. Returns true once the connection should be torn down.
    pub fn release(&self, force: bool) -> bool {
        let mut state = self.state();
        state.ref_count = if force {
            0
        } else {
            state.ref_count.saturating_sub(1)
        };
        tracing::debug!(
            connection_id = %self.id,
            ref_count = state.ref_count,
            force,
            "Released stream connection reference"
        );
        state.ref_count == 0
    }

    // ------------------------------------------------------------------
    // Transport control
    // ------------------------------------------------------------------

    /// Supersede any in-flight attempt or pending timer and start a new attempt.
    pub fn start(self: &Arc<Self>, reset_attempts: bool) {
        let attempt = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            Self::begin_attempt(&mut state, reset_attempts)
        };
        self.spawn_attempt(attempt);
    }

    fn begin_attempt(state: &mut ConnectionState, reset_attempts: bool) -> (CancellationToken, u64) {
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(previous) = state.cancel.take() {
            previous.cancel();
        }
        if reset_attempts {
            state.reconnect_attempts = 0;
        }

        state.generation += 1;
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        (token, state.generation)
    }

    fn spawn_attempt(self: &Arc<Self>, (token, generation): (CancellationToken, u64)) {
        tokio::spawn(transport::run(Arc::clone(self), token, generation));
    }

    /// Headers and timeout for the attempt `generation`, or None if it was superseded.
    pub(crate) fn request_config(&self, generation: u64) -> Option<ConnectionConfig> {
        let state = self.state();
        state
            .is_current(generation)
            .then(|| state.config.clone())
    }

    /// Apply a status transition on behalf of attempt `generation`.
    /// Returns false if the attempt has been superseded.
    pub fn transition(&self, generation: u64, status: ConnectionStatus) -> bool {
        let notice = {
            let mut state = self.state();
            if !state.is_current(generation) {
                return false;
            }
            if status == ConnectionStatus::Connected {
                state.reconnect_attempts = 0;
                state.last_connected_at = Some(Utc::now());
            }
            state.set_status(status, None)
        };

        tracing::info!(connection_id = %self.id, status = %status, "Stream status changed");
        notice.deliver(&self.id);
        true
    }

    /// Park in `error` after a 401. Only a header update or a new connect resumes.
    pub fn mark_unauthorized(&self, generation: u64) {
        let notice = {
            let mut state = self.state();
            if !state.is_current(generation) {
                return;
            }
            state.cancel = None;
            state.set_status(ConnectionStatus::Error, Some(StreamError::Unauthorized))
        };

        tracing::error!(
            connection_id = %self.id,
            "Stream rejected as unauthorized; waiting for credential refresh"
        );
        notice.deliver(&self.id);
    }

    /// Apply the reconnection policy after attempt `generation` failed.
    ///
    /// Open failures always go through backoff. `auto_reconnect` only decides
    /// what happens once an established stream has ended.
    pub fn schedule_reconnect(self: &Arc<Self>, generation: u64, phase: AttemptPhase, error: StreamError) {
        let notice = {
            let mut state = self.state();
            if !state.is_current(generation) {
                return;
            }
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }

            let max_attempts = state.config.max_reconnect_attempts;
            if !error.is_recoverable() {
                tracing::error!(
                    connection_id = %self.id,
                    code = error.code(),
                    error = %error,
                    "Stream failed permanently"
                );
                state.set_status(ConnectionStatus::Error, Some(error))
            } else if phase == AttemptPhase::Read && !state.config.auto_reconnect {
                let status = if error == StreamError::StreamClosed {
                    ConnectionStatus::Disconnected
                } else {
                    ConnectionStatus::Error
                };
                tracing::warn!(
                    connection_id = %self.id,
                    error = %error,
                    "Stream ended and auto-reconnect is disabled"
                );
                state.set_status(status, Some(error))
            } else if state.reconnect_attempts >= max_attempts {
                tracing::error!(
                    connection_id = %self.id,
                    attempts = max_attempts,
                    last_error = %error,
                    "Max stream reconnect attempts reached"
                );
                state.set_status(
                    ConnectionStatus::Error,
                    Some(StreamError::MaxAttemptsReached {
                        attempts: max_attempts,
                    }),
                )
            } else {
                state.reconnect_attempts += 1;
                let attempt = state.reconnect_attempts;
                let delay = BackoffPolicy::from_config(&state.config).delay_for_attempt(attempt);

                if let Some(timer) = state.reconnect_timer.take() {
                    timer.abort();
                }
                let connection = Arc::clone(self);
                state.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    connection.fire_reconnect(generation);
                }));

                StreamMetrics::record_reconnect_scheduled();
                tracing::warn!(
                    connection_id = %self.id,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Stream reconnect scheduled"
                );
                state.set_status(ConnectionStatus::Reconnecting, Some(error))
            }
        };

        notice.deliver(&self.id);
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let attempt = {
            let mut state = self.state();
            if !state.is_current(generation) || state.status != ConnectionStatus::Reconnecting {
                return;
            }
            // This task is the timer; detach rather than abort it
            state.reconnect_timer = None;
            Self::begin_attempt(&mut state, false)
        };
        self.spawn_attempt(attempt);
    }

    /// Merge headers into the config, restarting immediately if the stream is
    /// parked in `error` or `disconnected`. Returns true if restarted.
    pub fn update_headers(
        self: &Arc<Self>,
        headers: &HashMap<String, String>,
        reconnect: bool,
    ) -> Result<bool> {
        validate_headers(headers)?;

        let attempt = {
            let mut state = self.state();
            if state.closed {
                return Ok(false);
            }
            state
                .config
                .merge_headers(headers.iter().map(|(k, v)| (k.clone(), v.clone())));

            if !(reconnect && state.status.is_restartable()) {
                return Ok(false);
            }
            Self::begin_attempt(&mut state, true)
        };

        tracing::info!(connection_id = %self.id, "Headers updated; restarting stream");
        self.spawn_attempt(attempt);
        Ok(true)
    }

    /// Final teardown: cancel everything, drop all listeners and report
    /// `disconnected` to the status listeners that were registered.
    pub fn shutdown(&self) {
        let notice = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.generation += 1;
            state.ref_count = 0;

            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            for (_, mut set) in state.listeners.drain() {
                set.drain();
            }

            let listeners = state.status_listeners.take();
            state.status = ConnectionStatus::Disconnected;
            StatusNotice {
                status: ConnectionStatus::Disconnected,
                error: None,
                listeners,
            }
        };

        tracing::info!(connection_id = %self.id, "Stream connection torn down");
        notice.deliver(&self.id);
        for entry in &notice.listeners {
            entry.deactivate();
        }
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    pub fn add_listener(self: &Arc<Self>, event_type: &str, listener: EventListener) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let entry = {
            let mut state = self.state();
            if state.closed {
                return Subscription::noop();
            }
            state
                .listeners
                .entry(event_type.to_string())
                .or_default()
                .insert(id, listener)
        };

        tracing::debug!(connection_id = %self.id, event_type = %event_type, "Listener subscribed");
        Subscription::new(
            Arc::downgrade(self),
            SubscriptionKey::Event(event_type.to_string()),
            entry.id,
            entry.active,
        )
    }

    pub fn add_status_listener(self: &Arc<Self>, listener: StatusListener) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let entry = {
            let mut state = self.state();
            if state.closed {
                return Subscription::noop();
            }
            state.status_listeners.insert(id, listener)
        };

        Subscription::new(
            Arc::downgrade(self),
            SubscriptionKey::Status,
            entry.id,
            entry.active,
        )
    }

    pub(crate) fn remove_listener(&self, key: &SubscriptionKey, listener_id: u64) {
        let mut state = self.state();
        match key {
            SubscriptionKey::Event(event_type) => {
                let now_empty = state
                    .listeners
                    .get_mut(event_type)
                    .map(|set| {
                        set.remove(listener_id);
                        set.is_empty()
                    })
                    .unwrap_or(false);
                if now_empty {
                    state.listeners.remove(event_type);
                }
            }
            SubscriptionKey::Status => {
                state.status_listeners.remove(listener_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Route one decoded message. Returns the failure to hand to the
    /// reconnection policy when the message is an in-band `error`.
    pub fn dispatch(&self, generation: u64, message: StreamMessage, frame: &Frame) -> Option<StreamError> {
        StreamMetrics::record_message(message.kind());

        match message {
            StreamMessage::Connected => {
                self.transition(generation, ConnectionStatus::Connected);
                None
            }
            StreamMessage::Data {
                payload,
                event_type,
            } => {
                self.deliver_data(generation, &payload, event_type, frame);
                None
            }
            StreamMessage::Heartbeat => {
                tracing::trace!(connection_id = %self.id, "Stream heartbeat");
                None
            }
            StreamMessage::Error { message } => {
                tracing::warn!(connection_id = %self.id, error = %message, "Server reported stream error");
                Some(StreamError::Server(message))
            }
        }
    }

    fn deliver_data(&self, generation: u64, payload: &Value, event_type: Option<String>, frame: &Frame) {
        let mut targets: Vec<(String, Registered<EventFn>)> = Vec::new();
        {
            let state = self.state();
            if !state.is_current(generation) {
                return;
            }

            let mut keys = vec![DATA_EVENT];
            if let Some(kind) = event_type.as_deref().filter(|kind| *kind != DATA_EVENT) {
                keys.push(kind);
            }

            for key in keys {
                let Some(set) = state.listeners.get(key) else {
                    continue;
                };
                for entry in set.snapshot() {
                    // A handle subscribed under both keys still gets one delivery
                    if targets
                        .iter()
                        .any(|(_, seen)| Arc::ptr_eq(&seen.listener, &entry.listener))
                    {
                        continue;
                    }
                    targets.push((key.to_string(), entry));
                }
            }
        }

        let received_at = Utc::now();
        for (key, entry) in targets {
            if !entry.is_active() {
                continue;
            }
            let event = StreamEvent {
                connection_id: self.id.clone(),
                listener_key: key,
                event_type: event_type.clone(),
                sse_event: frame.event.clone(),
                last_event_id: frame.id.clone(),
                received_at,
            };
            invoke_guarded(&self.id, || (entry.listener)(payload, &event));
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
    }
}
