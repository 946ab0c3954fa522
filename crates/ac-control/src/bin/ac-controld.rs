//! Control Plane daemon entrypoint. Grounded on the teacher's `main.rs`
//! clap/`tokio::main`/tracing-init shape, trimmed to this binary's much
//! smaller surface (one subcommand, no auth/session-ui/container modules).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use ac_control::config::ControlPlaneConfig;
use ac_control::{routes, AppState};

#[derive(Debug, Parser)]
#[command(author, version, about = "Agent Control Plane: runner fleet + session registry + HTTP/WS API")]
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
    let config = ControlPlaneConfig::load(cli.config.as_deref()).context("loading control plane config")?;

    tokio_main(config)
}

#[tokio::main]
async fn tokio_main(config: ControlPlaneConfig) -> Result<()> {
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config.runner_registry_config());

    let health_sweep_runners = state.runners.clone();
    tokio::spawn(async move { health_sweep_runners.run_health_sweep_loop().await });

    let router = routes::create_router(state);
    let listener = TcpListener::bind(&bind_addr).await.with_context(|| format!("binding {bind_addr}"))?;
    info!(%bind_addr, "control plane listening");

    axum::serve(listener, router).await.context("control plane server exited")?;
    Ok(())
}
