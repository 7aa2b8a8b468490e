//! # meshsub
//!
//! `meshsub` is an embeddable, clusterable publish/subscribe broker. Clients
//! talk to it over a newline-delimited TCP protocol:
//!
//! ```text
//! pub|<topic>|<payload>    publish payload to topic
//! sub|<topic>              receive every payload published to topic
//! reset|<topic>            drop the topic's stored backlog
//! ```
//!
//! Brokers can be peered into a mesh. A publish is flooded to every peer and
//! each broker drops publishes it has already seen, so a publish reaches
//! every broker of a connected mesh exactly once per broker.
//!
//! ## Core Modules
//!
//! - `broker`: the engine (publish/subscribe/reset), subscription registry,
//!   dedup tracking and peer forwarding.
//! - `client`: the broker-side connection handle and a line protocol client.
//! - `config`: loading settings from files and the environment.
//! - `persistence`: the per-topic message backlog (sled or in memory).
//! - `transport`: the TCP server and the line protocol.
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;

pub use broker::{Broker, PublishOutcome};
pub use transport::BrokerServer;
