// Configuration validation
//
// Validates that values are sensible before the server starts

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_batch_config(&config.batch)?;
    validate_jellyfin_config(&config.jellyfin)?;
    validate_security_config(&config.security)?;

    if let Some(ref server) = config.server {
        validate_server_config(server)?;
    }

    Ok(())
}

/// Longest accepted debounce or ceiling window: one week.
const MAX_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

fn validate_batch_config(config: &BatchConfig) -> Result<()> {
    if config.debounce_secs > MAX_WINDOW_SECS {
        bail!("batch.debounce_secs must be at most {} seconds", MAX_WINDOW_SECS);
    }

    if config.max_wait_secs > MAX_WINDOW_SECS {
        bail!("batch.max_wait_secs must be at most {} seconds", MAX_WINDOW_SECS);
    }

    // A ceiling shorter than the quiet period flushes before the first
    // debounce window can close.
    if config.max_wait_secs > 0 && config.max_wait_secs < config.debounce_secs {
        warn!(
            debounce_secs = config.debounce_secs,
            max_wait_secs = config.max_wait_secs,
            "batch.max_wait_secs is shorter than batch.debounce_secs; batches flush at the ceiling"
        );
    }

    if config.debounce_secs == 0 && config.max_wait_secs > 0 {
        warn!("batch.debounce_secs is 0; every event refreshes immediately and max_wait_secs is ignored");
    }

    Ok(())
}

fn validate_jellyfin_config(config: &JellyfinConfig) -> Result<()> {
    if config.request_timeout_secs == 0 {
        bail!("jellyfin.request_timeout_secs must be greater than 0");
    }

    if config.refresh_timeout_secs == 0 {
        bail!("jellyfin.refresh_timeout_secs must be greater than 0");
    }

    if let Some(url) = config.url.as_deref() {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("jellyfin.url must start with http:// or https://");
        }
    }

    if config.url.is_some() != config.api_key.is_some() {
        warn!("only one of jellyfin.url / jellyfin.api_key is configured; requests must supply the other via headers");
    }

    Ok(())
}

fn validate_security_config(config: &SecurityConfig) -> Result<()> {
    config.parsed_allowlist()?;
    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.listen_addr.is_empty() {
        bail!("server.listen_addr must not be empty");
    }

    // Basic validation that it looks like an address
    match config.listen_addr.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => {}
        _ => bail!("server.listen_addr must be in format 'host:port'"),
    }

    Ok(())
}
