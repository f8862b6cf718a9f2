//! Server configuration loading from file and environment variables.

use ed25519_dalek::SigningKey;
use idrep_replication::{PeerIdentity, Scheme};
use idrep_types::DEFAULT_REPLICATION_PORT;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub signing: SigningConfig,

    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Remote identity servers this server replicates with.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// Network identity and listen address.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on. Peers push to the well-known replication port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The name this server signs associations as.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "idrep_replication=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// The ed25519 key local associations are signed with.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigningConfig {
    /// Hex-encoded 32-byte seed.
    #[serde(default)]
    pub key_hex: Option<String>,
}

/// Outbound replication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    /// Seconds between push rounds. `0` disables the push task.
    #[serde(default = "default_push_interval_secs")]
    pub push_interval_secs: u64,

    /// Maximum number of associations sent to a remote peer per push.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub scheme: Scheme,
}

/// A remote peer.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub server_name: String,

    #[serde(default = "default_peer_port")]
    pub port: u16,

    /// Public keys by key type, hex-encoded.
    #[serde(default)]
    pub public_keys: BTreeMap<String, String>,
}

impl PeerConfig {
    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.server_name.clone(), self.public_keys.clone())
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    DEFAULT_REPLICATION_PORT
}

fn default_peer_port() -> u16 {
    DEFAULT_REPLICATION_PORT
}

fn default_server_name() -> String {
    "localhost".to_string()
}

fn default_db_path() -> String {
    "idrep.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_push_interval_secs() -> u64 {
    10
}

fn default_batch_limit() -> usize {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            push_interval_secs: default_push_interval_secs(),
            batch_limit: default_batch_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            scheme: Scheme::default(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// `signing.key_hex` is not a hex-encoded 32-byte seed.
    #[error("invalid signing key: {0}")]
    SigningKey(String),
}

impl SigningConfig {
    /// Decodes the configured signing key, if any.
    pub fn signing_key(&self) -> Result<Option<SigningKey>, ConfigError> {
        let Some(key_hex) = &self.key_hex else {
            return Ok(None);
        };
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| ConfigError::SigningKey(format!("invalid hex: {e}")))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ConfigError::SigningKey("expected 32 bytes".to_string()))?;
        Ok(Some(SigningKey::from_bytes(&seed)))
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `IDREP_HOST` overrides `server.host`
/// - `IDREP_PORT` overrides `server.port`
/// - `IDREP_SERVER_NAME` overrides `server.server_name`
/// - `IDREP_DB_PATH` overrides `database.path`
/// - `IDREP_LOG_LEVEL` overrides `logging.level`
/// - `IDREP_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `IDREP_SIGNING_KEY` overrides `signing.key_hex`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("IDREP_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("IDREP_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(server_name) = std::env::var("IDREP_SERVER_NAME") {
        config.server.server_name = server_name;
    }
    if let Ok(db_path) = std::env::var("IDREP_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("IDREP_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("IDREP_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(key_hex) = std::env::var("IDREP_SIGNING_KEY") {
        config.signing.key_hex = Some(key_hex);
    }

    Ok(config)
}
