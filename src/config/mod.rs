//! Configuration loading.
//!
//! Sources, later ones winning:
//! 1. built-in defaults (`Settings::default()`)
//! 2. `config/default.{toml,yaml,json,...}` if present, or an explicit file
//! 3. environment variables prefixed `MESHSUB_`, with `__` between nesting
//!    levels (`MESHSUB_SERVER__PORT=5001`,
//!    `MESHSUB_BROKER__PEERS=10.0.0.2:5000,10.0.0.3:5000`); a `.env` file
//!    is loaded into the environment first

mod settings;

use std::path::Path;

use config::{Config, Environment, File};

use crate::utils::Result;

pub use settings::{
    BrokerSettings, LoggingSettings, PartialSettings, ServerSettings, Settings, StorageSettings,
};

pub const ENV_PREFIX: &str = "MESHSUB";

/// Loads the configuration from `config/default` and the environment and
/// merges it with default values.
pub fn load_config() -> Result<Settings> {
    load_config_from(None)
}

/// Like [`load_config`], reading `path` instead of `config/default`. An
/// explicit path must exist.
pub fn load_config_from(path: Option<&Path>) -> Result<Settings> {
    let _ = dotenvy::dotenv();

    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("config/default").required(false),
    };

    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("broker.peers"),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(Settings::merge(partial))
}
