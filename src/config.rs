//! Configuration module for the RPC server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::envelope::EnvelopeFormat;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Command-line arguments for the RPC server
#[derive(Parser, Debug, Default)]
#[command(name = "protobuf-rpc")]
#[command(author = "protobuf-rpc authors")]
#[command(version = "0.1.0")]
#[command(about = "A protobuf RPC server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8088)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Port to listen on, replacing the port of the listen address
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Message transport
    #[arg(short = 't', long, value_enum)]
    pub transport: Option<TransportType>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum size of a single message in bytes
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Envelope encoding
    #[arg(short = 'e', long, value_enum)]
    pub envelope: Option<EnvelopeFormat>,

    /// What to do with messages that are not valid request envelopes
    #[arg(long, value_enum)]
    pub on_decode_error: Option<DecodeErrorPolicy>,

    /// Log every inbound message at debug level
    #[arg(long)]
    pub log_messages: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// How messages are framed on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// 4-byte big-endian length prefix over TCP
    #[default]
    Tcp,
    /// One binary WebSocket message per RPC message
    #[value(name = "websocket")]
    #[serde(rename = "websocket")]
    WebSocket,
}

/// Handling of inbound messages that are not valid request envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Reply with a decode failure when the request id can be recovered, otherwise drop
    #[default]
    Reply,
    /// Drop the message and keep the connection open
    Drop,
    /// Drop the message and close the connection
    Close,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Message transport
    #[serde(default)]
    pub transport: TransportType,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum size of a single message in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            transport: TransportType::default(),
            workers: None,
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Per-connection session configuration
#[derive(Debug, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub envelope: EnvelopeFormat,
    #[serde(default)]
    pub on_decode_error: DecodeErrorPolicy,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log every inbound message
    #[serde(default)]
    pub messages: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            messages: false,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings each connection session runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    pub envelope: EnvelopeFormat,
    pub on_decode_error: DecodeErrorPolicy,
    pub log_messages: bool,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub transport: TransportType,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub max_frame_size: usize,
    pub session: SessionOptions,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 8088)),
            transport: TransportType::default(),
            workers: None,
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
            session: SessionOptions::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from already-parsed CLI args, reading the TOML
    /// file they point to, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let mut listen: SocketAddr = listen
            .parse()
            .map_err(|source| ConfigError::InvalidListen {
                address: listen.clone(),
                source,
            })?;
        if let Some(port) = cli.port {
            listen.set_port(port);
        }

        let config = Config {
            listen,
            transport: cli.transport.unwrap_or(toml_config.server.transport),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            max_frame_size: cli
                .max_frame_size
                .unwrap_or(toml_config.server.max_frame_size),
            session: SessionOptions {
                envelope: cli.envelope.unwrap_or(toml_config.session.envelope),
                on_decode_error: cli
                    .on_decode_error
                    .unwrap_or(toml_config.session.on_decode_error),
                log_messages: cli.log_messages || toml_config.logging.messages,
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime or the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                name: "workers",
                value: 0,
                reason: "must be at least 1",
            });
        }
        if self.max_connections == 0 || self.max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidValue {
                name: "max_connections",
                value: self.max_connections,
                reason: "must be between 1 and the semaphore permit limit",
            });
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_frame_size",
                value: 0,
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid listen address '{address}': {source}")]
    InvalidListen {
        address: String,
        source: std::net::AddrParseError,
    },
    #[error("Invalid {name} {value}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: usize,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:8088");
        assert_eq!(config.server.transport, TransportType::Tcp);
        assert_eq!(config.server.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(config.session.on_decode_error, DecodeErrorPolicy::Reply);

        let resolved = Config::default();
        assert_eq!(resolved.listen.port(), 8088);
        assert_eq!(resolved.log_level, "info");
        assert!(!resolved.session.log_messages);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            transport = "websocket"
            workers = 4
            max_connections = 64

            [session]
            envelope = "json"
            on_decode_error = "close"

            [logging]
            level = "debug"
            messages = true
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.transport, TransportType::WebSocket);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.session.envelope, EnvelopeFormat::Json);
        assert_eq!(config.session.on_decode_error, DecodeErrorPolicy::Close);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.messages);
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = CliArgs::try_parse_from([
            "protobuf-rpc",
            "--listen",
            "127.0.0.1:7000",
            "--transport",
            "websocket",
            "--on-decode-error",
            "drop",
            "--log-level",
            "trace",
        ])
        .unwrap();
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            transport = "tcp"
            max_frame_size = 1024
            "#,
        )
        .unwrap();

        let config = Config::resolve(cli, file).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.transport, TransportType::WebSocket);
        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(config.session.on_decode_error, DecodeErrorPolicy::Drop);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_port_override() {
        let cli = CliArgs::try_parse_from(["protobuf-rpc", "-p", "9999"]).unwrap();
        let config = Config::resolve(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9999".parse().unwrap());
    }

    #[test]
    fn test_invalid_listen_address() {
        let cli = CliArgs::try_parse_from(["protobuf-rpc", "-l", "localhost"]).unwrap();
        let err = Config::resolve(cli, TomlConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidListen { ref address, .. } if address == "localhost"
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/protobuf-rpc.toml")),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        for (args, field) in [
            (["protobuf-rpc", "-w", "0"], "workers"),
            (["protobuf-rpc", "--max-connections", "0"], "max_connections"),
            (["protobuf-rpc", "--max-frame-size", "0"], "max_frame_size"),
        ] {
            let cli = CliArgs::try_parse_from(args).unwrap();
            let err = Config::resolve(cli, TomlConfig::default()).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { name, .. } if name == field),
                "{field}: {err}"
            );
        }
    }

    #[test]
    fn test_invalid_values_in_file_are_rejected() {
        let file: TomlConfig = toml::from_str("[server]\nworkers = 0").unwrap();
        assert!(matches!(
            Config::resolve(CliArgs::default(), file),
            Err(ConfigError::InvalidValue { name: "workers", .. })
        ));

        let file = TomlConfig {
            server: ServerConfig {
                max_connections: Semaphore::MAX_PERMITS + 1,
                ..ServerConfig::default()
            },
            ..TomlConfig::default()
        };
        assert!(matches!(
            Config::resolve(CliArgs::default(), file),
            Err(ConfigError::InvalidValue { name: "max_connections", .. })
        ));
    }

    #[test]
    fn test_envelope_flag() {
        let cli = CliArgs::try_parse_from(["protobuf-rpc", "--envelope", "json"]).unwrap();
        let config = Config::resolve(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.session.envelope, EnvelopeFormat::Json);
        assert_eq!(Config::default().session.envelope, EnvelopeFormat::Binary);
    }
}
