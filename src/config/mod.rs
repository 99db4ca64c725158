//! Configuration management
//!
//! This module handles parsing and validation of the mesh controller's
//! static TOML configuration: server endpoints, notifier tuning, jump peer
//! defaults and seed networks.

mod toml_parser;
pub mod validation;

pub use toml_parser::TomlConfig;

use crate::error::{MeshError, Result};
use crate::model::JumpSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default control socket path
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/harmony-mesh.sock";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control socket and metrics endpoint settings
    pub server: ServerConfig,

    /// Change notifier tuning
    pub notifier: NotifierConfig,

    /// Defaults applied to jump peers created without explicit settings
    pub jump: JumpSettings,

    /// Seed networks, created at start-up when absent
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path of the control socket
    pub socket_path: PathBuf,

    /// Bind address for the metrics/health endpoint
    pub metrics_addr: String,

    /// Directory for persisted network records (in-memory store when unset)
    pub state_dir: Option<PathBuf>,
}

/// Change notifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Buffered events per subscriber before delivery falls back to retries
    pub channel_capacity: usize,

    /// Delivery attempts for a subscriber whose buffer is full
    pub max_retries: u32,

    /// Delay before the first retry; doubled on every attempt
    pub initial_backoff: Duration,
}

/// Seed network definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address space (IPv4 CIDR)
    pub cidr: String,

    /// DNS domain of the network
    pub domain: String,

    /// Keep the first host address out of the allocation pool
    #[serde(default)]
    pub reserve_gateway: bool,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let toml_config = TomlConfig::from_file(path)?;
        Ok(toml_config.into())
    }

    /// Parse configuration from a TOML string
    pub fn parse(toml: &str) -> Result<Self> {
        Ok(TomlConfig::parse(toml)?.into())
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.notifier.validate()?;

        validation::validate_listen_port(self.jump.listen_port)?;
        validation::validate_interface_name(&self.jump.tunnel_interface)?;
        validation::validate_interface_name(&self.jump.nat_interface)?;

        for (name, network) in &self.networks {
            validation::validate_network_name(name)
                .and_then(|_| network.validate())
                .map_err(|e| MeshError::Config(format!("Network '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

impl ServerConfig {
    /// Validate server settings
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(MeshError::Config("Socket path cannot be empty".to_string()));
        }
        self.metrics_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                MeshError::Config(format!(
                    "Invalid metrics address '{}': {}",
                    self.metrics_addr, e
                ))
            })?;
        Ok(())
    }
}

impl NotifierConfig {
    /// Validate notifier settings
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(MeshError::Config(
                "Notifier channel capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl NetworkConfig {
    /// Validate seed network definition
    pub fn validate(&self) -> Result<()> {
        validation::parse_network_cidr(&self.cidr)?;
        validation::validate_domain(&self.domain)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            notifier: NotifierConfig::default(),
            jump: JumpSettings::default(),
            networks: BTreeMap::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            metrics_addr: default_metrics_addr(),
            state_dir: None,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_retries: default_max_retries(),
            initial_backoff: Duration::from_millis(default_initial_backoff_ms()),
        }
    }
}

// Default value functions for serde
fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.notifier.channel_capacity, 64);
        assert_eq!(config.jump.listen_port, 51820);
    }

    #[test]
    fn test_invalid_seed_network_is_reported_by_name() {
        let mut config = Config::default();
        config.networks.insert(
            "office".to_string(),
            NetworkConfig {
                cidr: "10.0.0.1/24".to_string(),
                domain: "office.mesh".to_string(),
                reserve_gateway: false,
            },
        );

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("office"), "unexpected error: {}", err);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.notifier.channel_capacity = 0;
        assert!(config.validate().is_err());
    }
}
