use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vigil::config::Config;
use vigil::supervisor::Supervisor;

/// Keeps a long-running worker process alive with bounded restarts
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "vigil.toml")]
    config: PathBuf,

    /// Override the worker command from the configuration file
    #[arg(long)]
    command: Option<PathBuf>,

    /// Log filter directive, e.g. "debug" or "vigil=trace" (falls back to RUST_LOG)
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match &args.log_filter {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("parsing log filter {directive:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    if let Some(command) = args.command {
        config.worker.command = command;
        config.validate().context("validating overridden worker command")?;
    }

    let supervisor = Arc::new(Supervisor::new(
        config.worker.clone(),
        config.supervisor.clone(),
    ));
    supervisor.start();

    wait_for_shutdown_signal().await?;

    supervisor.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Received ctrl-c, shutting down");
    Ok(())
}
