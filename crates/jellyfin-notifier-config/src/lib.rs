// jellyfin-notifier-config - Runtime configuration for the notifier
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from JELLYFIN_NOTIFIER_CONFIG env var
// 3. Config file contents from JELLYFIN_NOTIFIER_CONFIG_CONTENT env var
// 4. Default config file locations (./config.toml, ./.jellyfin-notifier.toml)
// 5. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};

/// Main runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub jellyfin: JellyfinConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            jellyfin: JellyfinConfig::default(),
            security: SecurityConfig::default(),
            server: Some(ServerConfig::default()),
        }
    }
}

/// Refresh coalescing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Quiet period before a batch flushes. 0 refreshes on every event.
    pub debounce_secs: u64,
    /// Ceiling from the first event of a batch. 0 disables the ceiling.
    pub max_wait_secs: u64,
    pub group_by: KeyGrouping,
}

impl BatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_secs > 0).then(|| Duration::from_secs(self.max_wait_secs))
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 10,
            max_wait_secs: 60,
            group_by: KeyGrouping::Scope,
        }
    }
}

/// How webhook events are grouped into batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyGrouping {
    /// One batch per server and requested library scope.
    #[default]
    Scope,
    /// One batch per server; requested scopes are merged.
    Server,
}

impl std::fmt::Display for KeyGrouping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyGrouping::Scope => write!(f, "scope"),
            KeyGrouping::Server => write!(f, "server"),
        }
    }
}

impl std::str::FromStr for KeyGrouping {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "scope" => Ok(KeyGrouping::Scope),
            "server" | "credentials" => Ok(KeyGrouping::Server),
            _ => anyhow::bail!("Unsupported batch grouping: {}. Supported: scope, server", s),
        }
    }
}

/// Default Jellyfin target and HTTP timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JellyfinConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
}

impl JellyfinConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

impl Default for JellyfinConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            request_timeout_secs: 5,
            refresh_timeout_secs: 10,
        }
    }
}

/// Request guard for the webhook and library routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// IP addresses or CIDR ranges allowed to call guarded routes. Empty
    /// allows everyone.
    pub allowlist: Vec<String>,
    /// Requests per remote address per minute. 0 disables rate limiting.
    pub rate_limit_per_minute: u32,
}

impl SecurityConfig {
    pub fn parsed_allowlist(&self) -> Result<Vec<IpNetwork>> {
        self.allowlist
            .iter()
            .map(|entry| {
                entry
                    .trim()
                    .parse::<IpNetwork>()
                    .with_context(|| format!("Invalid allowlist entry: {}", entry))
            })
            .collect()
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Replace the port of `listen_addr`, keeping its host.
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .listen_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .filter(|host| !host.is_empty())
            .unwrap_or("0.0.0.0");
        self.listen_addr = format!("{}:{}", host, port);
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5001".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a specific file path (for CLI usage).
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Load configuration with graceful fallback to defaults.
    /// Does not fail if no config file exists.
    pub fn load_or_default() -> Result<Self> {
        sources::load_or_default()
    }

    /// Merge another config into this one (used for TOML layering).
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.batch = other.batch;
        self.jellyfin = other.jellyfin;
        self.security = other.security;

        if other.server.is_some() {
            self.server = other.server;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
