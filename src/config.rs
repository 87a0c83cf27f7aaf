//! Configuration module for the pollserve server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "pollserve")]
#[command(author = "pollserve authors")]
#[command(version)]
#[command(about = "A single-threaded, readiness-driven HTTP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Upper bound on a single poll call, in milliseconds
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Largest request head accepted, in bytes
    #[arg(long)]
    pub max_request_size: Option<usize>,

    /// Seconds a connection may take to finish its exchange (0 = no limit)
    #[arg(long)]
    pub request_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub event_loop: EventLoopConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket and identity
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Name reported to applications; defaults to the bind host
    pub server_name: Option<String>,
    /// Value of the `Server` response header
    pub server_software: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            server_name: None,
            server_software: None,
        }
    }
}

/// Per-connection limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Seconds; 0 disables the deadline
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_request_size: default_max_request_size(),
            request_timeout: default_request_timeout(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// Event loop tuning
#[derive(Debug, Deserialize)]
pub struct EventLoopConfig {
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            events_capacity: default_events_capacity(),
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

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_backlog() -> i32 {
    5
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_request_size() -> usize {
    64 * 1024 // 64 KiB
}

fn default_request_timeout() -> u64 {
    30
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_events_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub server_name: Option<String>,
    pub server_software: Option<String>,
    pub poll_timeout: Duration,
    pub events_capacity: usize,
    pub max_connections: usize,
    pub max_request_size: usize,
    /// `None` disables the per-connection deadline.
    pub request_timeout: Option<Duration>,
    pub read_buffer_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI args, reading the TOML file they name.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let request_timeout = cli
            .request_timeout
            .unwrap_or(toml_config.limits.request_timeout);

        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            server_name: toml_config.server.server_name,
            server_software: toml_config.server.server_software,
            poll_timeout: Duration::from_millis(
                cli.poll_timeout_ms
                    .unwrap_or(toml_config.event_loop.poll_timeout_ms),
            ),
            events_capacity: toml_config.event_loop.events_capacity,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.limits.max_connections),
            max_request_size: cli
                .max_request_size
                .unwrap_or(toml_config.limits.max_request_size),
            request_timeout: (request_timeout > 0).then(|| Duration::from_secs(request_timeout)),
            read_buffer_size: toml_config.limits.read_buffer_size,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be positive"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be positive"));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be positive"));
        }
        if self.events_capacity == 0 {
            return Err(ConfigError::Invalid("events_capacity must be positive"));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::Invalid("poll_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Resolve the bind address.
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.host, self.port);
        target
            .to_socket_addrs()
            .map_err(|e| ConfigError::Address(target.clone(), e.to_string()))?
            .next()
            .ok_or_else(|| ConfigError::Address(target, "no addresses resolved".to_string()))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid bind address '{0}': {1}")]
    Address(String, String),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
