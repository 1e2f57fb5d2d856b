//! Listener sets and subscription handles

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::connection::Connection;

/// One registered listener plus the flag its subscription handle flips.
pub(crate) struct Registered<T: ?Sized> {
    pub id: u64,
    pub listener: Arc<T>,
    pub active: Arc<AtomicBool>,
}

impl<T: ?Sized> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            listener: Arc::clone(&self.listener),
            active: Arc::clone(&self.active),
        }
    }
}

impl<T: ?Sized> Registered<T> {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Set of listeners with identity semantics: registering the same `Arc`
/// twice keeps a single entry, so each message is delivered to it once.
pub(crate) struct ListenerSet<T: ?Sized> {
    entries: Vec<Registered<T>>,
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: ?Sized> ListenerSet<T> {
    /// Insert `listener` under `id`, or return the existing registration
    /// if the same handle is already present.
    pub fn insert(&mut self, id: u64, listener: Arc<T>) -> Registered<T> {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.listener, &listener))
        {
            return existing.clone();
        }

        let entry = Registered {
            id,
            listener,
            active: Arc::new(AtomicBool::new(true)),
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| {
            if entry.id == id {
                entry.deactivate();
                false
            } else {
                true
            }
        });
        self.entries.len() != before
    }

    /// Remove everything, deactivating outstanding subscription handles.
    pub fn drain(&mut self) -> Vec<Registered<T>> {
        let drained: Vec<_> = self.entries.drain(..).collect();
        for entry in &drained {
            entry.deactivate();
        }
        drained
    }

    /// Remove everything while leaving handles active, for a final delivery.
    pub fn take(&mut self) -> Vec<Registered<T>> {
        std::mem::take(&mut self.entries)
    }

    pub fn snapshot(&self) -> Vec<Registered<T>> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub(crate) enum SubscriptionKey {
    Event(String),
    Status,
}

/// Handle returned by `subscribe` and `on_status_change`.
///
/// Call [`unsubscribe`](Self::unsubscribe) to stop delivery; it is safe to
/// call more than once and from inside a listener. Dropping the handle does
/// not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    inner: Option<SubscriptionInner>,
}

#[derive(Clone)]
struct SubscriptionInner {
    connection: Weak<Connection>,
    key: SubscriptionKey,
    listener_id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new(
        connection: Weak<Connection>,
        key: SubscriptionKey,
        listener_id: u64,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Some(SubscriptionInner {
                connection,
                key,
                listener_id,
                active,
            }),
        }
    }

    /// Handle for a subscription that was never registered.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Stop delivery to this listener.
    pub fn unsubscribe(&self) {
        let Some(inner) = &self.inner else {
            return;
        };

        // Flip the flag first so an in-flight dispatch skips this listener
        if !inner.active.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(connection) = inner.connection.upgrade() {
            connection.remove_listener(&inner.key, inner.listener_id);
        }
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.inner
            .as_ref()
            .map(|inner| inner.active.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Subscription")
                .field("key", &inner.key)
                .field("listener_id", &inner.listener_id)
                .field("active", &inner.active.load(Ordering::Acquire))
                .finish(),
            None => f.write_str("Subscription(noop)"),
        }
    }
}
