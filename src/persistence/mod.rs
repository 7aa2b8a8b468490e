//! The `persistence` module stores the per-topic backlog of published
//! messages so that a subscriber joining later can be handed the oldest one.
//!
//! [`Backlog`] is the whole contract the broker needs: append, fetch the
//! oldest message of a topic, and drop a topic's messages. `sled` backs the
//! durable implementation; [`MemoryBacklog`] keeps everything in process.

pub mod memory_store;
pub mod sled_store;

use std::fmt;

use crate::broker::message::Message;
use crate::utils::Result;

pub use memory_store::MemoryBacklog;
pub use sled_store::SledBacklog;

pub trait Backlog: Send + Sync + fmt::Debug {
    /// Append `message` to its topic's backlog.
    fn insert(&self, message: &Message) -> Result<()>;

    /// The message of `topic` with the earliest `created_at`, if any.
    fn oldest(&self, topic: &str) -> Result<Option<Message>>;

    /// Remove every message of `topic`, returning how many were removed.
    fn delete_all(&self, topic: &str) -> Result<usize>;

    /// Number of stored messages of `topic`.
    fn count(&self, topic: &str) -> Result<usize>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
