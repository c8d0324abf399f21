//! patchworkd - runs the autoconnect service against a JACK server.
//!
//! Without a chain manager attached the topology is empty, so only the
//! hardware, router and mixer infrastructure edges are maintained.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use patchconf::PatchConfig;
use patchwork::{Autoconnect, AutoconnectConfig, JackServer, MemoryDevices, StaticTopology};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./patchwork.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) =
        PatchConfig::load_with_sources_from(cli.config.as_deref()).context("Failed to load config")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.infra.telemetry.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("patchworkd {} starting", env!("CARGO_PKG_VERSION"));
    info!("config files: {:?}, env overrides: {:?}", sources.files, sources.env_overrides);

    let settings = AutoconnectConfig::from(&config);
    let refresh = settings.refresh;
    let service = Autoconnect::new(
        settings,
        Arc::new(StaticTopology::empty()),
        Arc::new(MemoryDevices::new()),
    );

    service
        .start(&JackServer, refresh)
        .context("Failed to start autoconnect")?;
    service.request_audio();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    service.stop().context("Failed to stop autoconnect")?;
    Ok(())
}
