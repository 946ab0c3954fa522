//! Execution Plane daemon entrypoint. Mirrors `ac-controld`'s shape: a
//! single-subcommand clap CLI, JSON tracing, then a `tokio::main` body.
//! Unlike the control plane this process actively dials out, so `main`
//! also owns a reconnect-with-backoff loop around the runner link.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ac_runner::config::RunnerConfig;
use ac_runner::{link, RunnerService};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(author, version, about = "Execution Plane daemon: hosts agent sessions, links to the control plane")]
struct Cli {
    /// Path to a TOML config file overriding defaults.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = RunnerConfig::load(cli.config.as_deref()).context("loading runner config")?;

    tokio_main(config)
}

#[tokio::main]
async fn tokio_main(config: RunnerConfig) -> Result<()> {
    let service = Arc::new(RunnerService::new(&config));
    service.initialize().await.context("initializing runner service")?;
    info!(control_plane_url = %config.control_plane_url, max_sessions = config.max_sessions, "runner starting");

    let mut backoff = INITIAL_BACKOFF;
    loop {
        match link::run(&config, service.clone()).await {
            Ok(()) => {
                info!("control plane link closed cleanly, reconnecting");
                backoff = INITIAL_BACKOFF;
            }
            Err(err) => {
                warn!(error = %err, backoff_secs = backoff.as_secs(), "runner link failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                continue;
            }
        }
        tokio::time::sleep(backoff).await;
    }
}
