//! Configuration module for the packet peer.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Smallest slot region that still leaves room for a header in each half.
pub const MIN_SLOT_SIZE: usize = 64;

/// Command-line arguments for the packet peer
#[derive(Parser, Debug)]
#[command(name = "packet-peer")]
#[command(author = "packet-peer authors")]
#[command(version = "0.1.0")]
#[command(about = "A multiplexed TCP test peer", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:44818)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Built-in packet handler to serve
    #[arg(short = 'p', long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Maximum number of concurrently served connections
    #[arg(short = 'n', long)]
    pub max_clients: Option<usize>,

    /// Total buffer bytes shared out across all connection slots
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Accept loop idle sleep in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// How long a worker blocks in read before re-checking for shutdown
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// How long a worker may block writing a response before the
    /// connection is dropped
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// Whether a response is written with a single write or until complete
    #[arg(long, value_enum)]
    pub write_policy: Option<WritePolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Built-in handlers selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Length-delimited echo: `<length>\r\n<data>`
    Echo,
    /// Line-based `PING` / `PONG`
    Ping,
}

/// How a worker pushes a response onto the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// One write call; a short write closes the connection.
    Once,
    /// Keep writing until the whole response is on the wire.
    All,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Handler to serve
    #[serde(default = "default_protocol")]
    pub protocol: ProtocolType,
    /// Maximum concurrent connections
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Listen backlog; deferred connections wait here
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Accept loop idle sleep in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Worker read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Worker write timeout in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Response write policy
    #[serde(default = "default_write_policy")]
    pub write_policy: WritePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            protocol: default_protocol(),
            max_clients: default_max_clients(),
            backlog: default_backlog(),
            poll_interval_ms: default_poll_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            write_policy: default_write_policy(),
        }
    }
}

/// Buffer-related configuration
#[derive(Debug, Deserialize)]
pub struct BufferConfig {
    /// Total bytes split evenly across connection slots
    #[serde(default = "default_buffer_size")]
    pub size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: default_buffer_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:44818".to_string()
}

fn default_protocol() -> ProtocolType {
    ProtocolType::Echo
}

fn default_max_clients() -> usize {
    5
}

fn default_backlog() -> i32 {
    128
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_write_policy() -> WritePolicy {
    WritePolicy::Once
}

fn default_buffer_size() -> usize {
    5 * 64 * 1024 // 64 KB per default slot
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub protocol: ProtocolType,
    pub max_clients: usize,
    pub buffer_size: usize,
    pub backlog: i32,
    pub poll_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub write_policy: WritePolicy,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(None, TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config::merge(Some(cli), toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: Option<CliArgs>, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        let Some(cli) = cli else {
            return Config {
                listen: server.listen,
                protocol: server.protocol,
                max_clients: server.max_clients,
                buffer_size: toml_config.buffers.size,
                backlog: server.backlog,
                poll_interval: Duration::from_millis(server.poll_interval_ms),
                read_timeout: Duration::from_millis(server.read_timeout_ms),
                write_timeout: Duration::from_millis(server.write_timeout_ms),
                write_policy: server.write_policy,
                log_level: toml_config.logging.level,
            };
        };

        Config {
            listen: cli.listen.unwrap_or(server.listen),
            protocol: cli.protocol.unwrap_or(server.protocol),
            max_clients: cli.max_clients.unwrap_or(server.max_clients),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.buffers.size),
            backlog: server.backlog,
            poll_interval: Duration::from_millis(
                cli.poll_interval_ms.unwrap_or(server.poll_interval_ms),
            ),
            read_timeout: Duration::from_millis(
                cli.read_timeout_ms.unwrap_or(server.read_timeout_ms),
            ),
            write_timeout: Duration::from_millis(
                cli.write_timeout_ms.unwrap_or(server.write_timeout_ms),
            ),
            write_policy: cli.write_policy.unwrap_or(server.write_policy),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Bytes owned by each connection slot.
    pub fn slot_size(&self) -> usize {
        self.buffer_size / self.max_clients.max(1)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1".into()));
        }
        if self.slot_size() < MIN_SLOT_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer_size {} leaves {} bytes per slot for {} clients, need at least {}",
                self.buffer_size,
                self.slot_size(),
                self.max_clients,
                MIN_SLOT_SIZE
            )));
        }
        // Zero timeouts are rejected by the socket layer.
        if self.read_timeout.is_zero() {
            return Err(ConfigError::Invalid("read_timeout_ms must be non-zero".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::Invalid("write_timeout_ms must be non-zero".into()));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
