//! Configuration Module
//!
//! TOML-based configuration for roomcast with support for:
//! - Server settings (bind address, WebSocket path, connection limit)
//! - Queue capacities
//! - Broker connection parameters
//! - Environment variable overrides (ROOMCAST_* prefix)
//! - `${VAR}` / `${VAR:-default}` substitution inside the config file

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Server configuration
    pub server: ServerConfig,
    /// Queue capacities
    pub limits: LimitsConfig,
    /// Broker connection configuration
    pub broker: BrokerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address for WebSocket clients
    pub bind: SocketAddr,
    /// Base path clients connect under; the room id is the next segment
    pub ws_path: String,
    /// Maximum concurrent client connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".parse().expect("valid default bind"),
            ws_path: "/ws".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Queue capacities
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-client outbound queue capacity; a client that falls this far
    /// behind is evicted
    pub queue_capacity: usize,
    /// Capacity of the queue between the hub and the publisher worker
    pub publish_queue_capacity: usize,
    /// Capacity of the queue between the broker feed and the hub
    pub feed_queue_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            publish_queue_capacity: 1024,
            feed_queue_capacity: 1024,
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker address (host:port)
    pub address: String,
    /// Topic all room traffic is published to and consumed from
    pub topic: String,
    /// Consumer group joined by this relay instance
    pub group: String,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Initial reconnect backoff
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,
    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:9092".to_string(),
            topic: "chat-messages".to_string(),
            group: "chat-group".to_string(),
            connect_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, applying environment variable
    /// substitution and `ROOMCAST__*` overrides. A missing file is not an
    /// error; defaults apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (ROOMCAST__SERVER__BIND, etc.)
        // Double underscore separates nested keys, single underscore is
        // preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("ROOMCAST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "server.ws_path must start with '/', got '{}'",
                self.server.ws_path
            )));
        }
        if self.limits.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "limits.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.limits.publish_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "limits.publish_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.limits.feed_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "limits.feed_queue_capacity must be at least 1".to_string(),
            ));
        }
        for (key, value) in [
            ("broker.topic", &self.broker.topic),
            ("broker.group", &self.broker.group),
        ] {
            if value.is_empty() || value.contains(char::is_whitespace) {
                return Err(ConfigError::Validation(format!(
                    "{} must be non-empty and contain no whitespace, got '{}'",
                    key, value
                )));
            }
        }
        if self.broker.address.is_empty() {
            return Err(ConfigError::Validation(
                "broker.address must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
