pub mod dedup;
pub mod engine;
pub mod message;
pub mod peers;
pub mod registry;
pub mod topic;

pub use dedup::{DedupTracker, InMemoryDedup, WindowedDedup};
pub use engine::{Broker, PublishOutcome, SubscribeOutcome};
pub use peers::{Peer, PeerPropagator};
pub use registry::SubscriptionRegistry;
pub use topic::{Disconnected, SubscriberSink, Subscription};
