//! Client representation
//!
//! `Client` models a connected client and holds the sending side of a
//! per-connection channel. The transport drains the receiving side into the
//! socket; once that writer stops (socket closed or broken), every further
//! delivery fails and the registry drops the subscription.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::broker::topic::{Disconnected, SubscriberSink};

#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    sender: UnboundedSender<String>,
}

impl Client {
    /// Create a new client with a sender channel. The `id` is a UUID used
    /// to identify the client in logs.
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
        }
    }

    /// A client together with the receiving end of its outbound channel.
    pub fn channel() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl SubscriberSink for Client {
    fn deliver(&self, payload: &str) -> Result<(), Disconnected> {
        self.sender
            .send(payload.to_string())
            .map_err(|_| Disconnected)
    }

    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}
