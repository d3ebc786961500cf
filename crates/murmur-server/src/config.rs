//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (MURMUR_HOST, MURMUR_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Room used when a request names none.
    #[serde(default = "default_room")]
    pub default_room: String,

    /// Message buffer configuration.
    #[serde(default)]
    pub buffer: BufferSection,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Long-poll configuration.
    #[serde(default)]
    pub poll: PollConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Message buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSection {
    /// Messages kept per room for catch-up.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum message body size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Long-poll configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// How long an updates request may stay open, in milliseconds.
    #[serde(default = "default_poll_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    std::env::var("MURMUR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("MURMUR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8888)
}

fn default_room() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    murmur_core::buffer::DEFAULT_CACHE_SIZE
}

fn default_max_rooms() -> usize {
    1_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_poll_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_room: default_room(),
            buffer: BufferSection::default(),
            limits: LimitsConfig::default(),
            poll: PollConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_rooms: default_max_rooms(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_poll_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl PollConfig {
    /// The long-poll timeout as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "murmur.toml",
            "/etc/murmur/murmur.toml",
            "~/.config/murmur/murmur.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
