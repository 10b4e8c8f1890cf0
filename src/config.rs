//! Configuration loading and validation.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::error::{ConfigError, Result};

/// Main configuration for the lanbridge relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Network interface to capture on. If None, auto-detect.
    pub interface: Option<String>,

    /// Local port the capture socket binds to. Not used for filtering.
    #[serde(default = "default_capture_port")]
    pub capture_port: u16,

    /// Initial receiver peers as dotted-quad IPv4 addresses.
    /// Unparseable entries are skipped with a warning at start-up.
    #[serde(default)]
    pub receivers: Vec<String>,

    /// Number of pre-allocated capture/rewrite buffers.
    #[serde(default = "default_buffer_pool_size")]
    pub buffer_pool_size: usize,

    /// Prometheus metrics exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether to expose a Prometheus scrape endpoint.
    #[serde(default)]
    pub enabled: bool,

    /// Address the exporter listens on.
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

const fn default_capture_port() -> u16 {
    6000
}

const fn default_buffer_pool_size() -> usize {
    8
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9095))
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// The engine-facing slice of this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            interface: self.interface.clone(),
            capture_port: self.capture_port,
            buffer_pool_size: self.buffer_pool_size,
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if self.buffer_pool_size == 0 {
            return Err(ConfigError::Validation("buffer_pool_size must be > 0".into()).into());
        }

        Ok(())
    }
}
