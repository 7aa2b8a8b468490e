//! Error types shared by every `meshsub` module.
//!
//! Protocol-level problems (unknown commands, missing fields) never become
//! errors: the connection loop drops such lines. Everything that does reach
//! a caller is one of the variants below.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid peer endpoint '{0}', expected host:port")]
    InvalidPeer(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
