// Initialization utilities for server mode
//
// Logging setup plus the pieces the app state is built from

use anyhow::{Context, Result};
use jellyfin_notifier_batch::EngineConfig;
use jellyfin_notifier_client::ClientSettings;
use jellyfin_notifier_config::{BatchConfig, JellyfinConfig, LogFormat, RuntimeConfig};

const USER_AGENT: &str = concat!("jellyfin-notifier/", env!("CARGO_PKG_VERSION"));

/// Initialize tracing/logging from RuntimeConfig
pub(crate) fn init_tracing(config: &RuntimeConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let server = config.server.clone().unwrap_or_default();

    let env_filter =
        EnvFilter::try_new(&server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match server.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
    }
    .context("Failed to initialize logging")
}

/// Shared HTTP client for every Jellyfin server the notifier talks to.
/// Timeouts are set per request.
pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

pub(crate) fn client_settings(config: &JellyfinConfig) -> ClientSettings {
    ClientSettings {
        request_timeout: config.request_timeout(),
        refresh_timeout: config.refresh_timeout(),
    }
}

pub(crate) fn engine_config(config: &BatchConfig) -> EngineConfig {
    EngineConfig::new(config.debounce(), config.max_wait())
}
