//! Per-key fan-out of connection events.
//!
//! Subscribers attach through [`EventBus::subscribe`] and receive every event
//! published for that key from then on. Nothing is buffered for late
//! subscribers. Dropping the returned [`Subscription`] detaches it.

use crate::domain::connection::ConnectionKey;
use crate::domain::error::SerialMonError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Data,
    Error,
    Closed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Data => write!(f, "data"),
            EventKind::Error => write!(f, "error"),
            EventKind::Closed => write!(f, "closed"),
        }
    }
}

/// Event published for a connection key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ConnectionEvent {
    /// One inbound line, delimiter removed
    Data { key: ConnectionKey, line: String },
    /// Stream-level failure reported by the open port
    Error { key: ConnectionKey, message: String },
    /// The port closed; `retry` is true when the closure was not requested
    Closed { key: ConnectionKey, retry: bool },
}

impl ConnectionEvent {
    /// Error event for a failure on `key`. Stream errors keep the port's own text.
    pub fn error(key: ConnectionKey, err: &SerialMonError) -> Self {
        let message = match err {
            SerialMonError::Stream { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ConnectionEvent::Error { key, message }
    }

    pub fn key(&self) -> &ConnectionKey {
        match self {
            ConnectionEvent::Data { key, .. }
            | ConnectionEvent::Error { key, .. }
            | ConnectionEvent::Closed { key, .. } => key,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Data { .. } => EventKind::Data,
            ConnectionEvent::Error { .. } => EventKind::Error,
            ConnectionEvent::Closed { .. } => EventKind::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Scope {
    Key(ConnectionKey),
    All,
}

struct Subscriber {
    id: Uuid,
    sender: mpsc::UnboundedSender<ConnectionEvent>,
}

#[derive(Default)]
struct BusInner {
    subscribers: HashMap<Scope, Vec<Subscriber>>,
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Event bus shared by the connection manager and its consumers
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of one key
    pub fn subscribe(&self, key: &ConnectionKey) -> Subscription {
        self.attach(Scope::Key(key.clone()))
    }

    /// Subscribe to events of every key
    pub fn subscribe_all(&self) -> Subscription {
        self.attach(Scope::All)
    }

    fn attach(&self, scope: Scope) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        lock(&self.inner)
            .subscribers
            .entry(scope.clone())
            .or_default()
            .push(Subscriber { id, sender });

        Subscription {
            id,
            scope,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every current subscriber of its key. Returns the
    /// number of subscribers reached.
    pub fn publish(&self, event: ConnectionEvent) -> usize {
        let mut inner = lock(&self.inner);
        let mut delivered = 0;

        for scope in [Scope::Key(event.key().clone()), Scope::All] {
            if let Some(subscribers) = inner.subscribers.get_mut(&scope) {
                subscribers.retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());
                delivered += subscribers.len();
                if subscribers.is_empty() {
                    inner.subscribers.remove(&scope);
                }
            }
        }

        trace!("Published {} event for '{}' to {} subscribers", event.kind(), event.key(), delivered);
        delivered
    }

    /// Number of subscribers attached to a key, excluding wildcard subscribers
    pub fn subscriber_count(&self, key: &ConnectionKey) -> usize {
        lock(&self.inner)
            .subscribers
            .get(&Scope::Key(key.clone()))
            .map_or(0, Vec::len)
    }
}

/// Live subscription returned by [`EventBus::subscribe`]
pub struct Subscription {
    id: Uuid,
    scope: Scope,
    receiver: mpsc::UnboundedReceiver<ConnectionEvent>,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    /// Key this subscription listens on, `None` for wildcard subscriptions
    pub fn key(&self) -> Option<&ConnectionKey> {
        match &self.scope {
            Scope::Key(key) => Some(key),
            Scope::All => None,
        }
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.receiver.try_recv().ok()
    }

    /// Detach from the bus
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            let mut inner = lock(&bus);
            if let Some(subscribers) = inner.subscribers.get_mut(&self.scope) {
                subscribers.retain(|subscriber| subscriber.id != self.id);
                if subscribers.is_empty() {
                    inner.subscribers.remove(&self.scope);
                }
            }
        }
    }
}
