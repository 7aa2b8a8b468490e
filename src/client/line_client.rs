//! Line protocol client.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec};

use crate::transport::command::Command;
use crate::utils::Result;

/// A connection to a broker speaking the line protocol.
///
/// Commands are written as single lines; every line the broker sends back
/// is a payload delivered to one of this connection's subscriptions.
pub struct LineClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl LineClient {
    /// Open a TCP connection to the broker at `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new()),
        })
    }

    pub async fn send(&mut self, command: &Command) -> Result<()> {
        self.send_line(&command.to_line()).await
    }

    /// Write a raw line; the newline is appended by the codec.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.framed.send(line).await?;
        Ok(())
    }

    pub async fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.send(&Command::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
        .await
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.send(&Command::Subscribe {
            topic: topic.to_string(),
        })
        .await
    }

    pub async fn reset(&mut self, topic: &str) -> Result<()> {
        self.send(&Command::Reset {
            topic: topic.to_string(),
        })
        .await
    }

    /// Next pushed payload, or `None` once the broker closed the connection.
    pub async fn next_payload(&mut self) -> Result<Option<String>> {
        match self.framed.next().await {
            Some(line) => Ok(Some(line?)),
            None => Ok(None),
        }
    }

    /// Like [`LineClient::next_payload`] but gives up after `timeout`,
    /// returning `None`.
    pub async fn next_payload_within(&mut self, timeout: Duration) -> Result<Option<String>> {
        match tokio::time::timeout(timeout, self.next_payload()).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }
}
