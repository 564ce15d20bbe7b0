//! Relay configuration.
//!
//! Configuration can be loaded from:
//! - A TOML configuration file (`tether-relay.toml`, `/etc/tether/tether-relay.toml`,
//!   `~/.config/tether/tether-relay.toml`)
//! - Environment variables (`TETHER_RELAY__*`, e.g. `TETHER_RELAY__PORT=9000`,
//!   `TETHER_RELAY__LIMITS__MAX_CHANNELS=500`), which override the file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

const CONFIG_PATHS: [&str; 3] = [
    "tether-relay.toml",
    "/etc/tether/tether-relay.toml",
    "~/.config/tether/tether-relay.toml",
];

/// Relay configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interface to bind.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// WebSocket endpoint settings.
    pub transport: TransportConfig,
    /// Resource limits.
    pub limits: LimitsConfig,
    /// Prometheus exporter.
    pub metrics: MetricsConfig,
    /// Login checks.
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// WebSocket endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// HTTP path clients upgrade on.
    pub websocket_path: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".to_string(),
        }
    }
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Live channels across all connections.
    pub max_channels: usize,
    /// Channels one connection may subscribe to.
    pub max_subscriptions_per_connection: usize,
    /// Largest accepted publish payload, in bytes.
    pub max_message_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
            max_subscriptions_per_connection: 100,
            max_message_size: 32 * 1024,
        }
    }
}

/// Prometheus exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether `run_server` starts the exporter.
    pub enabled: bool,
    /// Exporter port.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

/// Login checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted app ids. Empty accepts any.
    pub app_ids: Vec<String>,
    /// Reject logins with an empty token.
    pub require_token: bool,
}

impl AuthConfig {
    /// Whether `app_id` may log in.
    #[must_use]
    pub fn accepts_app(&self, app_id: &str) -> bool {
        self.app_ids.is_empty() || self.app_ids.iter().any(|a| a == app_id)
    }
}

impl Config {
    /// Load the first config file found, then apply `TETHER_RELAY__*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        for path in CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(config::File::new(
                    expanded.as_ref(),
                    config::FileFormat::Toml,
                ));
                break;
            }
        }

        builder
            .add_source(
                config::Environment::with_prefix("TETHER_RELAY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("auth.app_ids"),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Read one TOML file, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or not valid TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
