//! Subscription registry
//!
//! Maps topic names to their [`Topic`] state. The map is sharded
//! (`DashMap`), so subscribing to or broadcasting on one topic never waits
//! on an unrelated topic. Every operation on a topic runs under that topic's
//! shard lock, so a broadcast never observes a half-updated subscriber list.
//!
//! Topic names are normalized (trimmed, lowercased) on every call, so
//! `" News"` and `"news"` address the same topic.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::message::normalize_topic;
use crate::broker::topic::{SubscriberSink, Subscription, Topic};
use crate::utils::{BrokerError, Result};

/// Topic name to subscriber list, shared by every connection of a broker.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: DashMap<String, Topic>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under `topic`. The topic is created on first use.
    pub fn subscribe(
        &self,
        topic: &str,
        connection: Arc<dyn SubscriberSink>,
        exclusive: bool,
    ) -> Result<Subscription> {
        let topic = normalize_topic(topic);
        if topic.is_empty() {
            return Err(BrokerError::InvalidArgument(
                "topic must not be empty".to_string(),
            ));
        }

        let subscription = Subscription::new(connection, exclusive);
        self.topics
            .entry(topic.clone())
            .or_insert_with(|| Topic::new(&topic))
            .subscribe(subscription.clone());

        info!(
            "Subscribed {} to '{}' (exclusive: {})",
            subscription.id, topic, exclusive
        );
        Ok(subscription)
    }

    /// Remove subscription `id` from `topic`. Returns whether it was found.
    pub fn unsubscribe(&self, topic: &str, id: &Uuid) -> bool {
        self.topics
            .get_mut(&normalize_topic(topic))
            .map(|mut t| t.unsubscribe(id))
            .unwrap_or(false)
    }

    /// Deliver `payload` to every live subscription of `topic`. Subscriptions
    /// whose connection fails are removed. Returns the delivery count.
    pub fn broadcast(&self, topic: &str, payload: &str) -> usize {
        let topic = normalize_topic(topic);
        match self.topics.get_mut(&topic) {
            Some(mut t) => t.broadcast(payload),
            None => {
                debug!("No subscribers for '{}'", topic);
                0
            }
        }
    }

    /// Single-target selection for competing-consumer delivery. See
    /// [`Topic::select_next`].
    pub fn select_next(&self, topic: &str) -> Option<Subscription> {
        self.topics
            .get_mut(&normalize_topic(topic))
            .and_then(|mut t| t.select_next())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(&normalize_topic(topic))
            .map(|t| t.len())
            .unwrap_or(0)
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|entry| entry.key().clone()).collect()
    }
}
