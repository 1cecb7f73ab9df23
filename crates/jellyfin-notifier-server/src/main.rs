use anyhow::{Context, Result};
use clap::Parser;
use jellyfin_notifier_config::{RuntimeConfig, ServerConfig};
use std::path::PathBuf;

/// Coalesces Radarr/Sonarr webhooks into Jellyfin library refreshes
#[derive(Parser)]
#[command(name = "jellyfin-notifier")]
#[command(version)]
#[command(about = "Coalesces Radarr/Sonarr webhooks into Jellyfin library refreshes", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen port (overrides config file and environment)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Step 1: file and environment layers
    let mut config = if let Some(config_path) = &cli.config {
        RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load_or_default().context("Failed to load configuration")?
    };

    // Step 2: CLI overrides (highest priority)
    apply_cli_overrides(&mut config, &cli);

    // Step 3: run; the config is validated once logging is up
    jellyfin_notifier_server::run_with_config(config).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(port) = cli.port {
        let server = config.server.get_or_insert_with(ServerConfig::default);
        server.set_port(port);
    }

    if let Some(level) = &cli.log_level {
        let server = config.server.get_or_insert_with(ServerConfig::default);
        server.log_level = level.to_lowercase();
    }
}
