//! Broker engine
//!
//! This module contains the broker that every connection drives:
//! - `publish`: dedup, persist, fan out to local subscribers, flood to peers
//! - `subscribe`: register a connection and replay the topic's oldest
//!   backlog message to the whole topic
//! - `reset`: clear a topic's backlog, optionally on every peer as well
//!
//! Concurrency and usage notes:
//! - All operations take `&self`; the broker is shared as `Arc<Broker>`
//!   between connection tasks. The registry and dedup tracker are
//!   internally synchronized and the backlog store is concurrent-safe.
//! - Peer forwarding is detached, so none of these calls waits on the
//!   network.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::broker::dedup::{DedupTracker, InMemoryDedup, WindowedDedup};
use crate::broker::message::{Message, content_hash, normalize_topic};
use crate::broker::peers::PeerPropagator;
use crate::broker::registry::SubscriptionRegistry;
use crate::broker::topic::{SubscriberSink, Subscription};
use crate::config::Settings;
use crate::persistence::{Backlog, MemoryBacklog, SledBacklog};
use crate::utils::{BrokerError, Result};

/// Result of a [`Broker::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The same `(topic, payload)` was already processed; nothing happened.
    Duplicate,
    /// Persisted and delivered to `delivered` local subscribers.
    Accepted { delivered: usize },
}

#[derive(Debug, Clone)]
pub struct SubscribeOutcome {
    pub subscription: Subscription,
    /// How many subscribers received the replayed backlog message.
    pub replayed: usize,
}

/// A single broker node: local subscriptions, the persisted backlog, the
/// set of already processed publishes and the peers publishes flood to.
#[derive(Debug)]
pub struct Broker {
    registry: Arc<SubscriptionRegistry>,
    backlog: Arc<dyn Backlog>,
    dedup: Arc<dyn DedupTracker>,
    peers: PeerPropagator,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBacklog::new()), PeerPropagator::default())
    }
}

impl Broker {
    pub const PUBLISH_COMMAND: &'static str = "pub";
    pub const RESET_COMMAND: &'static str = "reset";

    /// A broker with a fresh registry and an unbounded dedup tracker.
    pub fn new(backlog: Arc<dyn Backlog>, peers: PeerPropagator) -> Self {
        Self::with_components(
            Arc::new(SubscriptionRegistry::new()),
            backlog,
            Arc::new(InMemoryDedup::new()),
            peers,
        )
    }

    pub fn with_components(
        registry: Arc<SubscriptionRegistry>,
        backlog: Arc<dyn Backlog>,
        dedup: Arc<dyn DedupTracker>,
        peers: PeerPropagator,
    ) -> Self {
        Self {
            registry,
            backlog,
            dedup,
            peers,
        }
    }

    /// Assemble a broker from configuration: sled backlog at the configured
    /// path, the configured peers and retry policy, and a bounded dedup
    /// tracker when `broker.dedup_capacity` is set.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let backlog = SledBacklog::open(
            settings.storage_path(),
            settings.storage.discard_on_shutdown,
        )?;
        let peers = PeerPropagator::new(
            settings.peers()?,
            settings.broker.peer_max_attempts,
            settings.peer_retry_delay(),
        )
        .with_connect_timeout(settings.peer_connect_timeout());
        let dedup: Arc<dyn DedupTracker> = match settings.broker.dedup_capacity {
            Some(capacity) => Arc::new(WindowedDedup::new(capacity)),
            None => Arc::new(InMemoryDedup::new()),
        };

        info!(
            "Broker configured with {} peer(s): {:?}",
            peers.peers().len(),
            settings.broker.peers
        );
        Ok(Self::with_components(
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(backlog),
            dedup,
            peers,
        ))
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn backlog(&self) -> &dyn Backlog {
        self.backlog.as_ref()
    }

    pub fn dedup(&self) -> &dyn DedupTracker {
        self.dedup.as_ref()
    }

    pub fn peers(&self) -> &PeerPropagator {
        &self.peers
    }

    /// Publish `payload` on `topic`.
    ///
    /// A `(topic, payload)` pair is processed at most once per broker
    /// lifetime; repeats return [`PublishOutcome::Duplicate`] without side
    /// effects. With `forward` set the publish is flooded to every peer.
    pub fn publish(&self, topic: &str, payload: &str, forward: bool) -> Result<PublishOutcome> {
        let topic = checked_topic(topic)?;
        let hash = content_hash(&topic, payload);

        if !self.dedup.first_seen(hash) {
            debug!("Ignoring duplicate publish on '{topic}' ({hash:016x})");
            return Ok(PublishOutcome::Duplicate);
        }

        let message = Message::new(&topic, payload);
        if let Err(e) = self.backlog.insert(&message) {
            // not processed, so a retry must not be mistaken for a duplicate
            self.dedup.forget(hash);
            error!("Failed to persist message on '{topic}': {e}");
            return Err(e);
        }

        let delivered = self.registry.broadcast(&topic, payload);
        debug!("Published on '{topic}' to {delivered} subscriber(s)");

        if forward {
            self.peers
                .forward(Self::PUBLISH_COMMAND, &topic, Some(payload));
        }

        Ok(PublishOutcome::Accepted { delivered })
    }

    /// Subscribe `connection` to `topic`, then push the topic's oldest
    /// backlog message (if any) to every subscriber of the topic, not only
    /// the new one.
    pub fn subscribe(
        &self,
        topic: &str,
        connection: Arc<dyn SubscriberSink>,
        exclusive: bool,
    ) -> Result<SubscribeOutcome> {
        let topic = checked_topic(topic)?;
        let subscription = self.registry.subscribe(&topic, connection, exclusive)?;

        let replayed = match self.backlog.oldest(&topic)? {
            Some(message) => self.registry.broadcast(&topic, &message.payload),
            None => 0,
        };

        Ok(SubscribeOutcome {
            subscription,
            replayed,
        })
    }

    /// Delete the backlog of `topic`. Subscriptions are left alone.
    pub fn reset(&self, topic: &str, forward: bool) -> Result<usize> {
        let topic = checked_topic(topic)?;
        let removed = self.backlog.delete_all(&topic)?;
        info!("Reset '{topic}', removed {removed} message(s)");

        if forward {
            self.peers.forward(Self::RESET_COMMAND, &topic, None);
        }

        Ok(removed)
    }

    /// Single-target selection on `topic`; see
    /// [`SubscriptionRegistry::select_next`].
    pub fn select_next(&self, topic: &str) -> Option<Subscription> {
        self.registry.select_next(topic)
    }
}

fn checked_topic(topic: &str) -> Result<String> {
    let topic = normalize_topic(topic);
    if topic.is_empty() {
        return Err(BrokerError::InvalidArgument(
            "topic must not be empty".to_string(),
        ));
    }
    Ok(topic)
}
