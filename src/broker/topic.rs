//! Topic management
//!
//! A `Topic` holds the live subscriptions registered under one topic name and
//! the round-robin cursor used by [`Topic::select_next`]. Callers synchronize
//! access (the registry keeps each `Topic` behind a map shard lock).

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Raised by a sink whose underlying connection can no longer be written.
#[derive(Debug, Error)]
#[error("subscriber connection closed")]
pub struct Disconnected;

/// Write side of a connection as seen by the registry.
///
/// The registry never owns the connection; it only pushes payloads through
/// this handle and drops the subscription once a push fails.
pub trait SubscriberSink: Send + Sync + fmt::Debug {
    /// Queue `payload` for delivery as one line.
    fn deliver(&self, payload: &str) -> Result<(), Disconnected>;

    /// `false` once the connection is known to be gone.
    fn is_open(&self) -> bool;
}

/// One registration of a connection on a topic. A connection subscribed
/// twice holds two subscriptions and receives every payload twice.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub connection: Arc<dyn SubscriberSink>,
    pub exclusive: bool,
    pub created_at: i64,
}

impl Subscription {
    pub fn new(connection: Arc<dyn SubscriberSink>, exclusive: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection,
            exclusive,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn push(&self, payload: &str) -> Result<(), Disconnected> {
        if !self.connection.is_open() {
            return Err(Disconnected);
        }
        self.connection.deliver(payload)
    }
}

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscriptions: Vec<Subscription>,
    cursor: usize,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: Vec::new(),
            cursor: 0,
        }
    }

    /// Append a subscription. Round-robin order is registration order.
    pub fn subscribe(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Remove a subscription by id. Returns whether it was present.
    pub fn unsubscribe(&mut self, id: &Uuid) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != *id);
        before != self.subscriptions.len()
    }

    /// Push `payload` to every subscription, dropping the ones whose
    /// connection is gone. Returns the number of successful deliveries.
    pub fn broadcast(&mut self, payload: &str) -> usize {
        let mut delivered = 0;
        let name = &self.name;
        self.subscriptions.retain(|subscription| match subscription.push(payload) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(e) => {
                debug!("Dropping subscription {} on '{}': {}", subscription.id, name, e);
                false
            }
        });
        delivered
    }

    /// Pick a single delivery target: the first exclusive subscription if
    /// there is one, otherwise the next one in round-robin order.
    pub fn select_next(&mut self) -> Option<Subscription> {
        if let Some(exclusive) = self.subscriptions.iter().find(|s| s.exclusive) {
            return Some(exclusive.clone());
        }

        let count = self.subscriptions.len();
        if count == 0 {
            return None;
        }

        let index = self.cursor % count;
        self.cursor = (index + 1) % count;
        self.subscriptions.get(index).cloned()
    }

    /// Index the next round-robin selection starts from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
