//! Subscription registry
//!
//! Routes dispatch events to subscribers by event name.

use super::DispatchSink;
use crate::events::GatewayEventType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of a registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which events a subscription receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every dispatch
    All,
    /// Only dispatches with one of these names
    Names(Vec<String>),
}

impl EventFilter {
    /// Match a single event name
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Names(vec![name.into()])
    }

    /// Match a set of known event types
    #[must_use]
    pub fn events(events: &[GatewayEventType]) -> Self {
        Self::Names(events.iter().map(|e| e.as_str().to_string()).collect())
    }

    #[must_use]
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Names(names) => names.iter().any(|n| n == event_name),
        }
    }
}

impl From<GatewayEventType> for EventFilter {
    fn from(event: GatewayEventType) -> Self {
        Self::name(event.as_str())
    }
}

/// A dispatch event as delivered to subscribers
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub name: String,
    pub payload: Option<Value>,
    pub received_at: DateTime<Utc>,
}

impl DispatchEvent {
    /// The known event type, if the name is one
    #[must_use]
    pub fn event_type(&self) -> Option<GatewayEventType> {
        GatewayEventType::from_name(&self.name)
    }
}

/// Handle returned by [`DispatchRegistry::subscribe`]
///
/// Dropping the receiver is enough to unsubscribe; the registry prunes it on the next
/// matching dispatch.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<DispatchEvent>,
}

impl Subscription {
    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<DispatchEvent> {
        self.receiver.recv().await
    }
}

struct Subscriber {
    filter: EventFilter,
    sender: mpsc::UnboundedSender<DispatchEvent>,
}

/// Channel-based subscription registry
#[derive(Default)]
pub struct DispatchRegistry {
    subscribers: DashMap<SubscriptionId, Subscriber>,
}

impl DispatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for events matching `filter`
    pub fn subscribe(&self, filter: impl Into<EventFilter>) -> Subscription {
        let id = SubscriptionId::new();
        let (sender, receiver) = mpsc::unbounded_channel();
        let filter = filter.into();

        tracing::debug!(subscription = %id, filter = ?filter, "Subscriber added");
        self.subscribers.insert(id, Subscriber { filter, sender });

        Subscription { id, receiver }
    }

    /// Remove a subscriber; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscription = %id, "Subscriber removed");
        }
        removed
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver one event to every subscriber registered right now
    ///
    /// Returns the number of subscribers that received it.
    pub fn dispatch(&self, event_name: &str, payload: Option<Value>) -> usize {
        let event = DispatchEvent {
            name: event_name.to_string(),
            payload,
            received_at: Utc::now(),
        };

        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in &self.subscribers {
            if !entry.filter.matches(event_name) {
                continue;
            }
            if entry.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        // Removal must happen after the iteration releases its shard locks
        for id in closed {
            self.subscribers.remove(&id);
            tracing::debug!(subscription = %id, "Pruned closed subscriber");
        }

        tracing::trace!(event = event_name, delivered, "Dispatch fanned out");
        delivered
    }
}

impl From<&str> for EventFilter {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

#[async_trait]
impl DispatchSink for DispatchRegistry {
    async fn accept(&self, event_name: &str, payload: Option<Value>) {
        self.dispatch(event_name, payload);
    }
}
