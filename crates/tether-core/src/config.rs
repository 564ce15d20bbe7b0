//! Client configuration.
//!
//! Configuration can be built in code or loaded from:
//! - A TOML file (`tether.toml`, `~/.config/tether/tether.toml`)
//! - Environment variables (`TETHER_*`), which override the file

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Channel joined when a caller does not name one.
pub const DEFAULT_CHANNEL: &str = "tether_channel";

/// Files searched by [`ClientConfig::load`], in order.
const CONFIG_PATHS: [&str; 2] = ["tether.toml", "~/.config/tether/tether.toml"];

/// Errors loading configuration from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ClientConfig`].
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// No file was found and the environment does not name a required field.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Immutable client settings, captured when a client is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Tenant/application identifier.
    pub app_id: String,

    /// Default credential, used when `authenticate` is called without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Default channel for broadcast sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Local participant identifier.
    pub client_id: String,
}

impl ClientConfig {
    /// Settings with the two required fields.
    #[must_use]
    pub fn new(app_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            token: None,
            channel: None,
            client_id: client_id.into(),
        }
    }

    /// Set the default token. An empty token means none.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into()).filter(|t: &String| !t.is_empty());
        self
    }

    /// Set the default channel. An empty name means none.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into()).filter(|c: &String| !c.is_empty());
        self
    }

    /// Default channel, falling back to [`DEFAULT_CHANNEL`].
    #[must_use]
    pub fn default_channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(DEFAULT_CHANNEL)
    }

    /// Pick the token for an authentication: `explicit` when non-empty, else
    /// the configured default, else empty.
    #[must_use]
    pub fn resolve_token<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit
            .filter(|t| !t.is_empty())
            .or(self.token.as_deref())
            .unwrap_or("")
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `app_id` or `client_id` is empty.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.app_id.is_empty() {
            return Err(ClientError::InvalidArgument("app_id must not be empty"));
        }
        if self.client_id.is_empty() {
            return Err(ClientError::InvalidArgument("client_id must not be empty"));
        }
        Ok(())
    }

    /// Load from the first config file found, then apply `TETHER_*`
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be parsed, or if no
    /// file exists and the environment lacks a required field.
    pub fn load() -> Result<Self, ConfigError> {
        for path in CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                let mut config = Self::from_file(path)?;
                config.apply_overrides(|key| std::env::var(key).ok());
                return Ok(config);
            }
        }

        Self::from_overrides(|key| std::env::var(key).ok())
    }

    /// Load from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build purely from overrides.
    ///
    /// # Errors
    ///
    /// Returns `Missing` if `TETHER_APP_ID` or `TETHER_CLIENT_ID` is absent.
    pub fn from_overrides(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let app_id = lookup("TETHER_APP_ID").ok_or(ConfigError::Missing("TETHER_APP_ID"))?;
        let client_id =
            lookup("TETHER_CLIENT_ID").ok_or(ConfigError::Missing("TETHER_CLIENT_ID"))?;
        let mut config = Self::new(app_id, client_id);
        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Apply `TETHER_APP_ID`, `TETHER_TOKEN`, `TETHER_CHANNEL` and
    /// `TETHER_CLIENT_ID` from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(app_id) = lookup("TETHER_APP_ID") {
            self.app_id = app_id;
        }
        if let Some(token) = lookup("TETHER_TOKEN") {
            self.token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(channel) = lookup("TETHER_CHANNEL") {
            self.channel = Some(channel).filter(|c| !c.is_empty());
        }
        if let Some(client_id) = lookup("TETHER_CLIENT_ID") {
            self.client_id = client_id;
        }
    }
}
