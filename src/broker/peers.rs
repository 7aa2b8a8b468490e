//! Peer propagation
//!
//! Forwards `pub`/`reset` lines to every configured peer broker. Each peer is
//! served by its own detached task that connects, writes one line and closes,
//! retrying with a fixed delay. A slow or dead peer never delays the caller
//! or any other peer, and giving up on a peer is only logged.
//!
//! Loop termination is not handled here: a forwarded publish that comes back
//! is dropped by the receiving broker's dedup tracker.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::utils::{BrokerError, Result};

/// A peer broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Peer {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BrokerError::InvalidPeer(s.to_string());
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Format a forwarded command line. An empty payload is left off entirely.
pub fn forward_line(command: &str, topic: &str, payload: Option<&str>) -> String {
    match payload {
        Some(p) if !p.trim().is_empty() => format!("{command}|{topic}|{p}"),
        _ => format!("{command}|{topic}"),
    }
}

/// Floods commands to a fixed set of peer brokers.
///
/// Cloning is cheap; the peer list is shared.
#[derive(Debug, Clone)]
pub struct PeerPropagator {
    peers: Arc<[Peer]>,
    max_attempts: u32,
    retry_delay: Duration,
    connect_timeout: Duration,
}

impl Default for PeerPropagator {
    fn default() -> Self {
        Self::new(Vec::new(), Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_RETRY_DELAY)
    }
}

impl PeerPropagator {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

    /// `max_attempts` counts every connection attempt, the first included;
    /// zero disables forwarding.
    pub fn new(peers: Vec<Peer>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            peers: peers.into(),
            max_attempts,
            retry_delay,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound each connection attempt. A peer that does not answer within
    /// `connect_timeout` counts as one failed attempt.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Send `command|topic[|payload]` to every peer without waiting.
    ///
    /// The returned handles resolve to `true` once the line was written to
    /// that peer, or `false` after the attempt budget ran out. Callers that
    /// only want fire-and-forget semantics drop them.
    pub fn forward(
        &self,
        command: &str,
        topic: &str,
        payload: Option<&str>,
    ) -> Vec<JoinHandle<bool>> {
        if self.peers.is_empty() {
            return Vec::new();
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, not forwarding '{command}' on '{topic}'");
            return Vec::new();
        };

        let line = forward_line(command, topic, payload);
        self.peers
            .iter()
            .map(|peer| runtime.spawn(self.clone().deliver(peer.clone(), line.clone())))
            .collect()
    }

    async fn deliver(self, peer: Peer, line: String) -> bool {
        let max_attempts = self.max_attempts;
        for attempt in 1..=max_attempts {
            match send_line(&peer, &line, self.connect_timeout).await {
                Ok(()) => {
                    debug!("Forwarded to {peer} on attempt {attempt}");
                    return true;
                }
                Err(e) => {
                    debug!("Forward to {peer} failed (attempt {attempt}/{max_attempts}): {e}");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        if max_attempts > 0 {
            warn!("Giving up on peer {peer} after {max_attempts} attempts");
        }
        false
    }
}

async fn send_line(peer: &Peer, line: &str, connect_timeout: Duration) -> std::io::Result<()> {
    let connect = TcpStream::connect(peer.address());
    let mut stream = match tokio::time::timeout(connect_timeout, connect).await {
        Ok(stream) => stream?,
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect timed out after {connect_timeout:?}"),
            ));
        }
    };
    let mut data = Vec::with_capacity(line.len() + 1);
    data.extend_from_slice(line.as_bytes());
    data.push(b'\n');
    stream.write_all(&data).await?;
    stream.shutdown().await
}
