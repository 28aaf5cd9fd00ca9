//! Configuration module for frame-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::message::EchoPolicy;
use crate::transport::ChannelOptions;

/// Which side(s) of the exchange this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Server and client in one process, single batch, then exit.
    #[default]
    Demo,
    /// Echo server only; runs until interrupted.
    Server,
    /// Client only; runs one batch against a remote server.
    Client,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "frame-echo")]
#[command(version = "0.1.0")]
#[command(about = "Fragmenting binary echo channel with payload validation", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Role to run
    #[arg(short, long, value_enum)]
    pub role: Option<Role>,

    /// Host to bind to (server) or connect to (client)
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Channel path checked during the handshake
    #[arg(long)]
    pub path: Option<String>,

    /// Number of messages the client sends
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Upper bound (exclusive) for generated message lengths
    #[arg(short = 'm', long)]
    pub max_length: Option<u32>,

    /// Largest frame payload before messages are fragmented
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Only echo messages whose content also matches the pattern
    #[arg(long)]
    pub strict: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub echo: EchoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener address and channel path
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

/// Channel sizing
#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    /// Socket buffer hint per direction
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Largest frame payload
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Largest message accepted for reassembly
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Outbound queue depth
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_frame_size: default_max_frame_size(),
            max_message_size: default_max_message_size(),
            send_queue: default_send_queue(),
        }
    }
}

/// Batch shape
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_message_count")]
    pub message_count: usize,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            message_count: default_message_count(),
            max_message_length: default_max_message_length(),
        }
    }
}

/// Deadlines in milliseconds; 0 waits indefinitely
#[derive(Debug, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub completion_timeout_ms: u64,
}

/// Echo gating
#[derive(Debug, Deserialize, Default)]
pub struct EchoConfig {
    #[serde(default)]
    pub strict: bool,
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
    "localhost".to_string()
}

fn default_port() -> u16 {
    20000
}

fn default_path() -> String {
    "/messaging".to_string()
}

fn default_buffer_size() -> usize {
    2 * 1024 * 1024 // 2 MB
}

fn default_max_frame_size() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    2 * 1024 * 1024 // 2 MB
}

fn default_send_queue() -> usize {
    256
}

fn default_message_count() -> usize {
    10000
}

fn default_max_message_length() -> u64 {
    4 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub buffer_size: usize,
    pub max_frame_size: usize,
    pub max_message_size: usize,
    pub send_queue: usize,
    pub message_count: usize,
    pub max_message_length: u32,
    pub connect_timeout: Option<Duration>,
    pub completion_timeout: Option<Duration>,
    pub echo_policy: EchoPolicy,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::default(),
            host: default_host(),
            port: default_port(),
            path: default_path(),
            buffer_size: default_buffer_size(),
            max_frame_size: default_max_frame_size(),
            max_message_size: default_max_message_size(),
            send_queue: default_send_queue(),
            message_count: default_message_count(),
            max_message_length: default_max_message_length() as u32,
            connect_timeout: None,
            completion_timeout: None,
            echo_policy: EchoPolicy::default(),
            log_level: default_log_level(),
        }
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

        Self::resolve(Some(cli), toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn resolve(cli: Option<CliArgs>, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            role,
            server,
            transport,
            client,
            session,
            echo,
            logging,
        } = toml_config;

        let max_message_length = u32::try_from(client.max_message_length)
            .map_err(|_| ConfigError::Invalid("max_message_length must fit in 32 bits"))?;

        let mut config = Config {
            role,
            host: server.host,
            port: server.port,
            path: server.path,
            buffer_size: transport.buffer_size,
            max_frame_size: transport.max_frame_size,
            max_message_size: transport.max_message_size,
            send_queue: transport.send_queue,
            message_count: client.message_count,
            max_message_length,
            connect_timeout: millis(session.connect_timeout_ms),
            completion_timeout: millis(session.completion_timeout_ms),
            echo_policy: if echo.strict {
                EchoPolicy::Strict
            } else {
                EchoPolicy::Length
            },
            log_level: logging.level,
        };

        if let Some(cli) = cli {
            config.role = cli.role.unwrap_or(config.role);
            config.host = cli.host.unwrap_or(config.host);
            config.port = cli.port.unwrap_or(config.port);
            config.path = cli.path.unwrap_or(config.path);
            config.message_count = cli.count.unwrap_or(config.message_count);
            config.max_message_length = cli.max_length.unwrap_or(config.max_message_length);
            config.max_frame_size = cli.max_frame_size.unwrap_or(config.max_frame_size);
            if cli.strict {
                config.echo_policy = EchoPolicy::Strict;
            }
            if cli.log_level != "info" {
                config.log_level = cli.log_level;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid("path must start with '/'"));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid("max_frame_size must be positive"));
        }
        if self.max_frame_size > u32::MAX as usize {
            return Err(ConfigError::Invalid("max_frame_size must fit in 32 bits"));
        }
        if self.send_queue == 0 {
            return Err(ConfigError::Invalid("send_queue must be positive"));
        }
        if (self.max_message_length as usize) > self.max_message_size {
            return Err(ConfigError::Invalid(
                "max_message_length exceeds max_message_size",
            ));
        }
        Ok(())
    }

    /// `host:port` for binding or connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            buffer_size: self.buffer_size,
            max_frame_size: self.max_frame_size,
            // A single frame never carries more than a whole message
            max_inbound_frame: self.max_message_size,
            send_queue: self.send_queue,
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.role, Role::Demo);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 20000);
        assert_eq!(config.server.path, "/messaging");
        assert_eq!(config.transport.buffer_size, 2 * 1024 * 1024);
        assert_eq!(config.client.message_count, 10000);
        assert_eq!(config.client.max_message_length, 4096);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            role = "server"

            [server]
            host = "0.0.0.0"
            port = 30000
            path = "/echo"

            [transport]
            max_frame_size = 512
            send_queue = 8

            [client]
            message_count = 50

            [session]
            completion_timeout_ms = 5000

            [echo]
            strict = true

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::resolve(None, toml_config).unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.address(), "0.0.0.0:30000");
        assert_eq!(config.path, "/echo");
        assert_eq!(config.max_frame_size, 512);
        assert_eq!(config.send_queue, 8);
        assert_eq!(config.message_count, 50);
        assert_eq!(config.max_message_length, 4096);
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.completion_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.echo_policy, EchoPolicy::Strict);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let cli = CliArgs::parse_from([
            "frame-echo",
            "--role",
            "client",
            "--port",
            "4000",
            "-n",
            "7",
            "--log-level",
            "trace",
        ]);
        let toml_config: TomlConfig = toml::from_str("[server]\nport = 3000\n").unwrap();

        let config = Config::resolve(Some(cli), toml_config).unwrap();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.port, 4000);
        assert_eq!(config.message_count, 7);
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.echo_policy, EchoPolicy::Length);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let toml_config: TomlConfig = toml::from_str("[server]\npath = \"messaging\"\n").unwrap();
        assert!(matches!(
            Config::resolve(None, toml_config),
            Err(ConfigError::Invalid(_))
        ));

        let toml_config: TomlConfig =
            toml::from_str("[transport]\nmax_frame_size = 0\n").unwrap();
        assert!(Config::resolve(None, toml_config).is_err());

        let toml_config: TomlConfig =
            toml::from_str("[client]\nmax_message_length = 5000000000\n").unwrap();
        assert!(Config::resolve(None, toml_config).is_err());
    }

    #[test]
    fn test_channel_options() {
        let config = Config::default();
        let options = config.channel_options();
        assert_eq!(options.max_frame_size, 1024);
        assert_eq!(options.max_inbound_frame, config.max_message_size);
        assert_eq!(options.buffer_size, 2 * 1024 * 1024);
    }
}
