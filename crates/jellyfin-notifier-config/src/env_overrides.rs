use super::{KeyGrouping, LogFormat, RuntimeConfig, ServerConfig};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "JELLYFIN_NOTIFIER_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the JELLYFIN_NOTIFIER_ prefix.
    /// Used for JELLYFIN_URL, JELLYFIN_API_KEY and PORT.
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Batch configuration, canonical names first, then the legacy ones
    if let Some(val) = get_env_u64(env, "BATCH_DEBOUNCE_SECS")? {
        config.batch.debounce_secs = val;
    } else if let Some(val) = get_env_u64(env, "REFRESH_DEBOUNCE_SECONDS")? {
        config.batch.debounce_secs = val;
    }
    if let Some(val) = get_env_u64(env, "BATCH_MAX_WAIT_SECS")? {
        config.batch.max_wait_secs = val;
    } else if let Some(val) = get_env_u64(env, "REFRESH_MAX_WAIT_SECONDS")? {
        config.batch.max_wait_secs = val;
    }
    if let Some(grouping) = get_env_string(env, "BATCH_GROUP_BY")? {
        config.batch.group_by = grouping
            .parse::<KeyGrouping>()
            .context("Invalid JELLYFIN_NOTIFIER_BATCH_GROUP_BY value")?;
    }

    // Server configuration (listen addr, port, log level/format)
    if let Some(addr) = get_env_string(env, "LISTEN_ADDR")? {
        ensure_server(config).listen_addr = addr;
    }
    if let Some(port) = get_port(env)? {
        ensure_server(config).set_port(port);
    }
    if let Some(level) = get_env_string(env, "LOG_LEVEL")? {
        ensure_server(config).log_level = level.to_lowercase();
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT")? {
        ensure_server(config).log_format = format
            .parse::<LogFormat>()
            .context("Invalid JELLYFIN_NOTIFIER_LOG_FORMAT value")?;
    }

    // Request guard
    if let Some(list) = get_env_string(env, "ALLOWLIST")? {
        config.security.allowlist = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(val) = get_env_u32(env, "RATE_LIMIT_PER_MINUTE")? {
        config.security.rate_limit_per_minute = val;
    }

    // Jellyfin target (unprefixed for compatibility with existing deployments)
    if let Some(url) = get_raw_env_string(env, "JELLYFIN_URL")? {
        config.jellyfin.url = Some(url);
    }
    if let Some(api_key) = get_raw_env_string(env, "JELLYFIN_API_KEY")? {
        config.jellyfin.api_key = Some(api_key);
    }
    if let Some(val) = get_env_u64(env, "REQUEST_TIMEOUT_SECS")? {
        config.jellyfin.request_timeout_secs = val;
    }
    if let Some(val) = get_env_u64(env, "REFRESH_TIMEOUT_SECS")? {
        config.jellyfin.refresh_timeout_secs = val;
    }

    Ok(())
}

fn ensure_server(config: &mut RuntimeConfig) -> &mut ServerConfig {
    config.server.get_or_insert_with(ServerConfig::default)
}

/// Blank values count as unset.
fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Result<Option<String>> {
    Ok(env
        .get(key)
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty()))
}

/// Get a raw environment variable without the JELLYFIN_NOTIFIER_ prefix
fn get_raw_env_string<E: EnvSource>(env: &E, key: &str) -> Result<Option<String>> {
    Ok(env
        .get_raw(key)
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty()))
}

/// JELLYFIN_NOTIFIER_PORT wins over the plain PORT convention.
fn get_port<E: EnvSource>(env: &E) -> Result<Option<u16>> {
    let (name, raw) = match get_env_string(env, "PORT")? {
        Some(val) => (format!("{}PORT", ENV_PREFIX), val),
        None => match get_raw_env_string(env, "PORT")? {
            Some(val) => ("PORT".to_string(), val),
            None => return Ok(None),
        },
    };

    let port = raw
        .parse::<u16>()
        .map_err(|e| anyhow!("Failed to parse {}: {}", name, e))?;
    Ok(Some(port))
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match get_env_string(env, key)? {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_u32<E: EnvSource>(env: &E, key: &str) -> Result<Option<u32>> {
    match get_env_string(env, key)? {
        Some(val) => {
            let parsed = val
                .parse::<u32>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
