//! depwatchd — the depwatch daemon.
//!
//! Loads `depwatch.toml`, checks every configured dependency in the
//! background, and serves the results over HTTP.
//!
//! # Usage
//!
//! ```text
//! depwatchd init --name orders-api > depwatch.toml
//! depwatchd validate --config depwatch.toml
//! depwatchd run --config depwatch.toml --listen 0.0.0.0:9464
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use depwatch_checks::default_registry;
use depwatch_core::{DepwatchConfig, LogFormat};
use depwatch_health::{DepWatch, DepWatchBuilder};
use depwatchd::{build_router, logging};

#[derive(Parser)]
#[command(name = "depwatchd", about = "Dependency health monitor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run checks and serve /metrics and /health.
    Run {
        /// Path to depwatch.toml.
        #[arg(short, long, default_value = "depwatch.toml")]
        config: PathBuf,

        /// Listen address; overrides `listen` in the config.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Print a scaffold depwatch.toml.
    Init {
        /// Instance name written into the scaffold.
        #[arg(long, default_value = "my-service")]
        name: String,
    },
    /// Check a config file without starting any checks.
    Validate {
        #[arg(short, long, default_value = "depwatch.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, listen } => run(&config, listen).await,
        Command::Init { name } => {
            print!("{}", DepwatchConfig::scaffold(&name).to_toml_string()?);
            Ok(())
        }
        Command::Validate { config } => {
            logging::init(LogFormat::Text);
            let path = config;
            let config = load_config(&path)?;
            let depwatch = build(&config, &path)?;
            println!(
                "{}: {} dependencies OK",
                depwatch.name(),
                config.dependencies.len()
            );
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<DepwatchConfig> {
    DepwatchConfig::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}

fn build(config: &DepwatchConfig, path: &Path) -> anyhow::Result<DepWatch> {
    let builder = DepWatchBuilder::from_config(config)
        .with_context(|| format!("invalid config {}", path.display()))?;
    builder
        .probe_registry(default_registry())
        .build()
        .with_context(|| format!("invalid config {}", path.display()))
}

async fn run(path: &Path, listen: Option<String>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    logging::init(config.log_format);

    let depwatch = Arc::new(build(&config, path)?);
    let addr = listen.unwrap_or_else(|| config.listen_addr().to_string());

    depwatch.start().await?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, name = %depwatch.name(), "depwatchd listening");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, build_router(depwatch.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    depwatch.stop().await;
    info!("depwatchd stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}
