//! TCP transport
//!
//! Accepts connections and runs one task per connection. The task drives two
//! loops over the split socket:
//! - a send loop draining the connection's [`Client`] channel into the
//!   socket, one payload per line
//! - the read loop, which parses every incoming line and calls the broker
//!
//! Reaching end-of-stream only stops the read loop. Subscriptions made on
//! the connection stay registered until a delivery to them fails. Lines
//! that are not valid UTF-8 are skipped like any other malformed line; only
//! an over-long line or a socket error ends the read loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::codec::{AnyDelimiterCodec, Framed};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::client::Client;
use crate::config::Settings;
use crate::transport::command::Command;
use crate::utils::Result;

/// Line protocol server in front of one [`Broker`].
pub struct BrokerServer {
    listener: TcpListener,
    broker: Arc<Broker>,
    max_line_length: usize,
}

impl BrokerServer {
    pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

    /// Bind a listener on `addr` for `broker`.
    pub async fn bind(addr: impl ToSocketAddrs, broker: Arc<Broker>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, broker))
    }

    /// Serve on an already bound listener, e.g. one bound to port 0.
    pub fn from_listener(listener: TcpListener, broker: Arc<Broker>) -> Self {
        Self {
            listener,
            broker,
            max_line_length: Self::DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Build the broker described by `settings` and bind its listener.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let broker = Arc::new(Broker::from_settings(settings)?);
        Ok(Self::bind(settings.address(), broker)
            .await?
            .with_max_line_length(settings.server.max_line_length))
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes. Then stop accepting,
    /// abort every connection task and flush the backlog. Once this returns
    /// the server holds no reference to the broker, so a backlog opened with
    /// discard-on-drop is removed as soon as the caller's handles are gone.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            broker,
            max_line_length,
        } = self;
        info!("Broker listening on {}", listener.local_addr()?);

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        connections.spawn(handle_connection(
                            stream,
                            peer_addr,
                            broker.clone(),
                            max_line_length,
                        ));
                    }
                    Err(e) => {
                        // per-connection failures (e.g. reset before accept) must not stop the loop
                        error!("Failed to accept connection: {e}");
                    }
                },
                // reap finished connections
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        debug!("Closing {} open connection(s)", connections.len());
        connections.shutdown().await;

        if let Err(e) = broker.backlog().flush() {
            warn!("Failed to flush backlog on shutdown: {e}");
        }
        Ok(())
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    broker: Arc<Broker>,
    max_line_length: usize,
) {
    let codec = AnyDelimiterCodec::new_with_max_length(
        b"\n".to_vec(),
        b"\n".to_vec(),
        max_line_length,
    );
    let (mut sink, mut lines) = Framed::new(stream, codec).split();
    let (client, mut rx) = Client::channel();
    let client_id = client.id.clone();
    debug!("{client_id} connected from {peer_addr}");

    let send_loop = async {
        while let Some(payload) = rx.recv().await {
            if let Err(e) = sink.send(payload).await {
                debug!("Failed to send to {client_id}: {e}");
                break;
            }
        }
        debug!("Send loop closed for {client_id}");
    };

    // owns `client`, so once reading stops only the registry keeps the
    // send loop alive
    let read_loop = async move {
        let client = client;
        while let Some(chunk) = lines.next().await {
            match chunk {
                Ok(chunk) => match decode_line(&chunk) {
                    Some(line) => handle_line(&broker, &client, line),
                    None => debug!("Ignoring non UTF-8 line from {}", client.id),
                },
                Err(e) => {
                    warn!("Closing {}: {e}", client.id);
                    break;
                }
            }
        }
        debug!("{} stopped reading", client.id);
    };

    tokio::join!(send_loop, read_loop);
    debug!("{client_id} disconnected");
}

/// Strip an optional trailing `\r` and check the line is UTF-8. A line that
/// is not valid UTF-8 is malformed and yields `None`.
fn decode_line(chunk: &[u8]) -> Option<&str> {
    let chunk = chunk.strip_suffix(b"\r").unwrap_or(chunk);
    std::str::from_utf8(chunk).ok()
}

/// Parse and execute one line. Unparseable lines are skipped; broker errors
/// are logged and do not end the connection.
pub fn handle_line(broker: &Broker, client: &Client, line: &str) {
    let Some(command) = Command::parse(line) else {
        debug!(
            "Ignoring line from {}: {}",
            client.id,
            line.chars().take(100).collect::<String>()
        );
        return;
    };

    if let Err(e) = dispatch(broker, client, command) {
        warn!("Command from {} failed: {e}", client.id);
    }
}

/// Run a parsed command. Publishes are flooded to peers; resets stay local.
pub fn dispatch(broker: &Broker, client: &Client, command: Command) -> Result<()> {
    match command {
        Command::Publish { topic, payload } => {
            broker.publish(&topic, &payload, true)?;
        }
        Command::Subscribe { topic } => {
            broker.subscribe(&topic, Arc::new(client.clone()), false)?;
        }
        Command::Reset { topic } => {
            broker.reset(&topic, false)?;
        }
    }
    Ok(())
}
