// Copyright 2020 Joyent, Inc.

//! Gateway configuration, read from a JSON file.
//!
//! ```json
//! {
//!     "hub": { "manager_api_url": "http://hub.example.com/rpc/api" },
//!     "connect_timeout": 5,
//!     "read_write_timeout": 5
//! }
//! ```
//!
//! Every other field has a default. The file path is taken from the command
//! line or from the `HUB_CONFIG_FILE` environment variable.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_derive::Deserialize;

pub const CONFIG_FILE_ENV: &str = "HUB_CONFIG_FILE";

const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:2830";
const DEFAULT_API_PATH: &str = "/hub/rpc/api";
const DEFAULT_PERIPHERAL_ENTITLEMENT: &str = "foreign_entitled";
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{env} is not set; point it at a JSON configuration file", env = CONFIG_FILE_ENV)]
    MissingPath,
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// XML-RPC endpoint of the hub, e.g. `http://hub/rpc/api`.
    pub manager_api_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub hub: HubConfig,
    /// Seconds allowed to establish a backend connection.
    #[serde(default = "default_timeout")]
    pub connect_timeout: u64,
    /// Seconds allowed for a whole backend request.
    #[serde(default = "default_timeout")]
    pub read_write_timeout: u64,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_api_path")]
    pub api_path: String,
    /// Reach peripheral servers over https.
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Entitlement marking peripheral servers in the hub's system list.
    /// `null` lists every system.
    #[serde(default = "default_peripheral_entitlement")]
    pub peripheral_entitlement: Option<String>,
    /// Idle seconds before a hub session expires; 0 never expires.
    #[serde(default = "default_session_ttl")]
    pub session_ttl: u64,
    #[serde(default = "default_purge_interval")]
    pub purge_interval: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_listen_address() -> String {
    String::from(DEFAULT_LISTEN_ADDRESS)
}

fn default_api_path() -> String {
    String::from(DEFAULT_API_PATH)
}

fn default_peripheral_entitlement() -> Option<String> {
    Some(String::from(DEFAULT_PERIPHERAL_ENTITLEMENT))
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_purge_interval() -> u64 {
    DEFAULT_PURGE_INTERVAL_SECS
}

impl Config {
    pub fn parse(json: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Config::parse(&json)
    }

    pub fn from_env() -> Result<Config, ConfigError> {
        let path = env::var_os(CONFIG_FILE_ENV).ok_or(ConfigError::MissingPath)?;
        Config::from_file(Path::new(&path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let hub_url = self.hub.manager_api_url.trim();
        if hub_url.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "hub.manager_api_url must not be empty",
            )));
        }
        if !hub_url.starts_with("http://") && !hub_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "hub.manager_api_url is not an http(s) url: {}",
                hub_url
            )));
        }
        if self.connect_timeout == 0 || self.read_write_timeout == 0 {
            return Err(ConfigError::Invalid(String::from(
                "timeouts must be at least one second",
            )));
        }
        if !self.api_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "api_path must start with '/': {}",
                self.api_path
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.read_write_timeout)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval.max(1))
    }
}
