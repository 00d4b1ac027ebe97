//! hopper import server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hopper_core::config::AppConfig;
use hopper_server::processor::recover_orphaned_jobs;
use hopper_server::state::JobTaskRegistry;
use hopper_server::sweeper::spawn_sweeper;
use hopper_server::{AppState, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// hopper - bulk spreadsheet import server
#[derive(Parser, Debug)]
#[command(name = "hopperd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "HOPPER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Merge the optional TOML file with `HOPPER_` environment variables.
fn load_config(config_path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(config_path).exists() {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::info!(
            config_path = %config_path,
            "No config file found, using defaults and environment variables"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("HOPPER_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("hopper v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    let storage = hopper_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let metadata = hopper_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    // Must run before any new job can be queued
    let recovered = recover_orphaned_jobs(&metadata)
        .await
        .context("failed to recover orphaned import jobs")?;
    if recovered > 0 {
        tracing::warn!(recovered, "Orphaned import jobs marked as failed");
    }

    let job_registry = Arc::new(JobTaskRegistry::new(metadata.clone()));
    let _watchdog_handle = job_registry.clone().spawn_watchdog();
    tracing::info!("Import task watchdog spawned");

    let state = AppState::new(config.clone(), storage, metadata, job_registry);

    let _sweeper_handle = spawn_sweeper(state.assembler.clone(), config.server.clone());
    tracing::info!(
        interval_secs = config.server.sweep_interval_secs,
        upload_timeout_secs = config.server.upload_timeout_secs,
        "Upload session sweeper spawned"
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
