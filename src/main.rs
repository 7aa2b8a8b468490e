//! CLI for meshsub
//!
//! Subcommands:
//! - `server`: run a broker until Ctrl-C
//! - `client`: send one command to a broker (useful for smoke tests)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use meshsub::BrokerServer;
use meshsub::client::LineClient;
use meshsub::config::{Settings, load_config_from};
use meshsub::utils::{Result, logging};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "meshsub", version, about = "Clusterable line-protocol message broker")]
enum Cli {
    /// Run a broker
    Server(ServerArgs),
    /// Send a command to a running broker
    Client {
        /// Broker address
        #[arg(long, default_value = "127.0.0.1:5000")]
        addr: String,
        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Args)]
struct ServerArgs {
    /// Configuration file (defaults to config/default.* when present)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Peer broker as host:port; repeat for several peers
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Backlog database directory
    #[arg(long)]
    db: Option<String>,
    /// Delete the backlog database on shutdown
    #[arg(long)]
    discard_on_shutdown: bool,
    #[arg(long)]
    peer_max_attempts: Option<u32>,
    #[arg(long)]
    peer_retry_delay_ms: Option<u64>,
    #[arg(long)]
    log_level: Option<String>,
}

impl ServerArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if !self.peers.is_empty() {
            settings.broker.peers = self.peers;
        }
        if self.db.is_some() {
            settings.storage.path = self.db;
        }
        if self.discard_on_shutdown {
            settings.storage.discard_on_shutdown = true;
        }
        if let Some(attempts) = self.peer_max_attempts {
            settings.broker.peer_max_attempts = attempts;
        }
        if let Some(delay) = self.peer_retry_delay_ms {
            settings.broker.peer_retry_delay_ms = delay;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
    }
}

#[derive(Subcommand)]
enum ClientAction {
    /// Publish a payload
    Pub { topic: String, payload: String },
    /// Subscribe and print payloads until the broker disconnects
    Sub { topic: String },
    /// Clear a topic's backlog on that broker
    Reset { topic: String },
}

#[tokio::main]
async fn main() {
    let result = match Cli::parse() {
        Cli::Server(args) => run_server(args).await,
        Cli::Client { addr, action } => {
            logging::init("warn");
            run_client(&addr, action).await
        }
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("meshsub: {e}");
        std::process::exit(1);
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let mut settings = load_config_from(args.config.as_deref())?;
    args.apply(&mut settings);
    logging::init(&settings.logging.level);

    let server = BrokerServer::from_settings(&settings).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Broker on {} stopped", settings.address());
    Ok(())
}

async fn run_client(addr: &str, action: ClientAction) -> Result<()> {
    let mut client = LineClient::connect(addr).await?;

    match action {
        ClientAction::Pub { topic, payload } => client.publish(&topic, &payload).await?,
        ClientAction::Reset { topic } => client.reset(&topic).await?,
        ClientAction::Sub { topic } => {
            client.subscribe(&topic).await?;
            while let Some(payload) = client.next_payload().await? {
                println!("{payload}");
            }
        }
    }

    Ok(())
}
