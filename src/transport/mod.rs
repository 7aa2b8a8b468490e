//! The `transport` module handles network communication with clients and
//! peer brokers over newline-delimited TCP.
//!
//! It defines the line protocol (`pub|topic|payload`, `sub|topic`,
//! `reset|topic`) and the server that accepts connections, parses lines and
//! forwards them to the broker. Peer brokers use exactly the same protocol
//! as clients.

pub mod command;
pub mod tcp;

pub use command::Command;
pub use tcp::BrokerServer;

#[cfg(test)]
mod tcp_tests;
