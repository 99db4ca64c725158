//! TOML configuration file parser
//!
//! This module handles parsing of the controller's TOML configuration file.
//! Every section is optional; missing values fall back to the defaults in
//! the parent module.

use crate::config::{
    default_channel_capacity, default_initial_backoff_ms, default_max_retries,
    default_metrics_addr, Config, NetworkConfig, NotifierConfig, ServerConfig,
    DEFAULT_SOCKET_PATH,
};
use crate::error::{MeshError, Result};
use crate::model::JumpSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Server section
    #[serde(default)]
    pub server: TomlServerConfig,

    /// Notifier section
    #[serde(default)]
    pub notifier: TomlNotifierConfig,

    /// Jump peer defaults
    #[serde(default)]
    pub jump: TomlJumpConfig,

    /// Seed network definitions
    #[serde(default)]
    pub network: BTreeMap<String, NetworkConfig>,
}

/// TOML server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlServerConfig {
    /// Control socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Metrics bind address
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// State directory for the JSON-file store
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// TOML notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlNotifierConfig {
    /// Per-subscriber buffer size
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Retry attempts for full subscriber buffers
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

/// TOML jump defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlJumpConfig {
    /// WireGuard listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// WireGuard interface on the jump host
    #[serde(default = "default_tunnel_interface")]
    pub tunnel_interface: String,

    /// External (NAT) interface on the jump host
    #[serde(default = "default_nat_interface")]
    pub nat_interface: String,
}

impl TomlConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            MeshError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| {
            MeshError::Config(format!("Failed to parse TOML config: {}", e))
        })
    }
}

impl Default for TomlServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            metrics_addr: default_metrics_addr(),
            state_dir: None,
        }
    }
}

impl Default for TomlNotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl Default for TomlJumpConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            tunnel_interface: default_tunnel_interface(),
            nat_interface: default_nat_interface(),
        }
    }
}

// Convert TOML config to internal Config
impl From<TomlConfig> for Config {
    fn from(toml: TomlConfig) -> Self {
        Config {
            server: ServerConfig {
                socket_path: toml.server.socket_path,
                metrics_addr: toml.server.metrics_addr,
                state_dir: toml.server.state_dir,
            },
            notifier: NotifierConfig {
                channel_capacity: toml.notifier.channel_capacity,
                max_retries: toml.notifier.max_retries,
                initial_backoff: Duration::from_millis(toml.notifier.initial_backoff_ms),
            },
            jump: JumpSettings {
                listen_port: toml.jump.listen_port,
                tunnel_interface: toml.jump.tunnel_interface,
                nat_interface: toml.jump.nat_interface,
            },
            networks: toml.network,
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_listen_port() -> u16 {
    JumpSettings::default().listen_port
}

fn default_tunnel_interface() -> String {
    JumpSettings::default().tunnel_interface
}

fn default_nat_interface() -> String {
    JumpSettings::default().nat_interface
}
