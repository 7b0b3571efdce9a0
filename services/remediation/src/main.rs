//! Remediation loop service entry point

use anyhow::{Context, Result};
use clap::Parser;
use remediation_loop::{CycleMode, RemediationService};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_config::VigilConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to config/vigil.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment overlay (config/environments/<name>.toml)
    #[arg(short, long)]
    environment: Option<String>,

    /// Run a single cycle, print its summary and exit
    #[arg(long)]
    once: bool,

    /// Cycle mode for --once
    #[arg(long, default_value = "full")]
    mode: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remediation_loop=info,relays=info,message_router=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mode: CycleMode = args.mode.parse().map_err(anyhow::Error::msg)?;

    info!("🚀 Starting remediation loop v{}", env!("CARGO_PKG_VERSION"));

    let mut config = VigilConfig::load(args.config.as_deref(), args.environment.as_deref())
        .context("Failed to load configuration")?;
    config.expand_env_vars()?;
    let service = RemediationService::build(config).context("Failed to assemble service")?;

    if args.once {
        let cycle = service.engine().run_cycle("manual", None, mode).await?;
        println!("{}", cycle.summary);
        return Ok(());
    }

    let mut triggers = service.start_triggers();
    let flush_secs = service.config().control_loop.relay_flush_secs;
    let relay_flush =
        (flush_secs > 0).then(|| service.start_relay_flush(Duration::from_secs(flush_secs)));
    info!("✅ Remediation loop running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("🛑 Shutting down");
    triggers.stop();
    if let Some(handle) = relay_flush {
        handle.abort();
    }
    let flushed = service.flush_relays().await;
    info!("Flushed {} relays", flushed.len());
    Ok(())
}
