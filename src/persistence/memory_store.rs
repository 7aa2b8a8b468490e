//! In-process backlog, for embedding without a data directory and for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::broker::message::Message;
use crate::persistence::Backlog;
use crate::utils::Result;

#[derive(Debug, Default)]
pub struct MemoryBacklog {
    topics: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Message>>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Backlog for MemoryBacklog {
    fn insert(&self, message: &Message) -> Result<()> {
        self.topics()
            .entry(message.topic.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    fn oldest(&self, topic: &str) -> Result<Option<Message>> {
        // min_by_key keeps the first of equal timestamps, i.e. insertion order
        Ok(self
            .topics()
            .get(topic)
            .and_then(|messages| messages.iter().min_by_key(|m| m.created_at).cloned()))
    }

    fn delete_all(&self, topic: &str) -> Result<usize> {
        Ok(self.topics().remove(topic).map(|m| m.len()).unwrap_or(0))
    }

    fn count(&self, topic: &str) -> Result<usize> {
        Ok(self.topics().get(topic).map(|m| m.len()).unwrap_or(0))
    }
}
