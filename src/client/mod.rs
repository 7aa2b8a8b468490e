//! The `client` module covers both ends of a broker connection.
//!
//! - [`Client`] is the broker-side handle of an accepted connection: the
//!   sending half of its outbound channel, usable as a subscriber sink.
//! - [`LineClient`] is a small TCP client speaking the line protocol, used by
//!   the CLI and the end-to-end tests.

pub mod line_client;
pub mod pubsub_client;

pub use line_client::LineClient;
pub use pubsub_client::Client;
