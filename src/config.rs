//! Configuration module for cmdserver.
//!
//! The listening port is the single required positional argument. Everything
//! else can come from command-line flags or a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the command server
#[derive(Parser, Debug)]
#[command(name = "cmdserver")]
#[command(author = "cmdserver authors")]
#[command(version = "0.1.0")]
#[command(about = "A multiplexed TCP command server", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Length of the queue of pending connections
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Size of the per-connection receive buffer in bytes
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub buffer_size: Option<usize>,

    /// Maximum number of simultaneously connected clients
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Readiness multiplexer backend
    #[arg(long, value_enum)]
    pub multiplexer: Option<MultiplexerType>,

    /// Enable the SYS command (grants clients arbitrary command execution)
    #[arg(long)]
    pub enable_sys: bool,

    /// Shell used to run SYS command lines
    #[arg(long)]
    pub shell: Option<String>,

    /// Reply sent for unrecognized commands (default: no reply)
    #[arg(long)]
    pub unknown_reply: Option<String>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Readiness multiplexer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MultiplexerType {
    /// `select(2)`, scan bounded by the highest registered handle.
    #[default]
    Select,
    /// `poll(2)`, no `FD_SETSIZE` ceiling.
    Poll,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Receive buffer size per connection
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Connection limit
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Multiplexer backend
    #[serde(default)]
    pub multiplexer: MultiplexerType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
            max_connections: default_max_connections(),
            multiplexer: MultiplexerType::default(),
        }
    }
}

/// Command handler configuration
#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    /// Register the SYS handler
    #[serde(default)]
    pub enable_sys: bool,
    /// Shell for SYS command lines
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Reply for unrecognized commands
    pub unknown_reply: Option<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            enable_sys: false,
            shell: default_shell(),
            unknown_reply: None,
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
    "0.0.0.0".to_string()
}

fn default_backlog() -> i32 {
    5
}

fn default_buffer_size() -> usize {
    1024
}

fn default_max_connections() -> usize {
    1024
}

fn default_shell() -> String {
    "/bin/sh".to_string()
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
    pub buffer_size: usize,
    pub max_connections: usize,
    pub multiplexer: MultiplexerType,
    pub enable_sys: bool,
    pub shell: String,
    pub unknown_reply: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    ///
    /// A missing or invalid port makes clap print usage and exit here,
    /// before any socket is opened.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
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

    /// Reject values that parse but cannot work.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                key: "buffer_size",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.server.buffer_size),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            multiplexer: cli.multiplexer.unwrap_or(toml_config.server.multiplexer),
            enable_sys: cli.enable_sys || toml_config.commands.enable_sys,
            shell: cli.shell.unwrap_or(toml_config.commands.shell),
            unknown_reply: cli.unknown_reply.or(toml_config.commands.unknown_reply),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Configuration with every default and the given port.
    pub fn with_port(port: u16) -> Self {
        Self::merge(
            CliArgs {
                port,
                config: None,
                host: None,
                backlog: None,
                buffer_size: None,
                max_connections: None,
                multiplexer: None,
                enable_sys: false,
                shell: None,
                unknown_reply: None,
                log_level: None,
            },
            TomlConfig::default(),
        )
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid value for '{key}': {reason}")]
    Invalid {
        key: &'static str,
        reason: &'static str,
    },
}
