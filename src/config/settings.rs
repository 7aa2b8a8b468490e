use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::broker::peers::Peer;
use crate::utils::Result;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Where the broker listens and how long an incoming line may be.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_line_length: usize,
}

/// Mesh wiring and forwarding policy.
///
/// `peers` are `host:port` strings. `peer_max_attempts` counts every attempt
/// to reach a peer for one forwarded command; `0` disables forwarding. A
/// connect that takes longer than `peer_connect_timeout_ms` counts as a
/// failed attempt. `dedup_capacity` bounds the dedup tracker; unset means unbounded.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub peers: Vec<String>,
    pub peer_max_attempts: u32,
    pub peer_retry_delay_ms: u64,
    pub peer_connect_timeout_ms: u64,
    pub dedup_capacity: Option<usize>,
}

/// Backlog location. `discard_on_shutdown` deletes the database directory
/// once the broker stops.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub path: Option<String>,
    pub discard_on_shutdown: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub storage: Option<PartialStorageSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_line_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub peers: Option<Vec<String>>,
    pub peer_max_attempts: Option<u32>,
    pub peer_retry_delay_ms: Option<u64>,
    pub peer_connect_timeout_ms: Option<u64>,
    pub dedup_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
    pub discard_on_shutdown: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 5000,
                max_line_length: 64 * 1024,
            },
            broker: BrokerSettings {
                peers: Vec::new(),
                peer_max_attempts: 3,
                peer_retry_delay_ms: 1000,
                peer_connect_timeout_ms: 1000,
                dedup_capacity: None,
            },
            storage: StorageSettings {
                path: None,
                discard_on_shutdown: false,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fill every value missing from `partial` with its default.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let broker = partial.broker.unwrap_or_default();
        let storage = partial.storage.unwrap_or_default();
        let logging = partial.logging.unwrap_or_default();

        Self {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                max_line_length: server
                    .max_line_length
                    .unwrap_or(default.server.max_line_length),
            },
            broker: BrokerSettings {
                peers: broker.peers.unwrap_or(default.broker.peers),
                peer_max_attempts: broker
                    .peer_max_attempts
                    .unwrap_or(default.broker.peer_max_attempts),
                peer_retry_delay_ms: broker
                    .peer_retry_delay_ms
                    .unwrap_or(default.broker.peer_retry_delay_ms),
                peer_connect_timeout_ms: broker
                    .peer_connect_timeout_ms
                    .unwrap_or(default.broker.peer_connect_timeout_ms),
                dedup_capacity: broker.dedup_capacity.or(default.broker.dedup_capacity),
            },
            storage: StorageSettings {
                path: storage.path.or(default.storage.path),
                discard_on_shutdown: storage
                    .discard_on_shutdown
                    .unwrap_or(default.storage.discard_on_shutdown),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// The configured storage path, or one derived from the listening
    /// address so that brokers sharing a working directory never share a
    /// backlog.
    pub fn storage_path(&self) -> PathBuf {
        match &self.storage.path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(format!(
                "meshsub_{}_{}.db",
                self.server.host, self.server.port
            )),
        }
    }

    /// Parse every configured peer, failing on the first malformed entry.
    pub fn peers(&self) -> Result<Vec<Peer>> {
        self.broker.peers.iter().map(|p| p.parse()).collect()
    }

    pub fn peer_retry_delay(&self) -> Duration {
        Duration::from_millis(self.broker.peer_retry_delay_ms)
    }

    pub fn peer_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.peer_connect_timeout_ms)
    }
}
