//! Message definitions for the broker
//!
//! `Message` is the unit that is persisted to the backlog and fanned out to
//! subscribers. Notes on fields:
//! - `topic`: normalized topic name used for routing (see [`normalize_topic`])
//! - `payload`: opaque body, passed through unmodified
//! - `created_at`: milliseconds since UNIX epoch; orders backlog retrieval
//! - `content_hash`: fingerprint of `(topic, payload)` used for deduplication

use std::hash::Hasher;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub created_at: i64,
    pub content_hash: u64,
}

impl Message {
    /// Build a message stamped with the current time. `topic` is expected to
    /// be normalized already.
    pub fn new(topic: &str, payload: &str) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            content_hash: content_hash(topic, payload),
        }
    }
}

/// Trim and lower-case a topic name. Topic matching is case-insensitive.
pub fn normalize_topic(topic: &str) -> String {
    topic.trim().to_lowercase()
}

/// Deterministic, non-cryptographic fingerprint of a `(topic, payload)` pair.
///
/// Collisions are possible and are treated as duplicates.
pub fn content_hash(topic: &str, payload: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(topic.as_bytes());
    // separator so ("ab", "c") and ("a", "bc") differ
    hasher.write_u8(b'|');
    hasher.write(payload.as_bytes());
    hasher.finish()
}
