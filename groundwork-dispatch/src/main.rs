//! groundwork-dispatch - HTTP server for action documents
//!
//! Loads the configuration and entity declarations, synchronizes the
//! schema, then serves `POST /api/actions` and `GET /health`.

use anyhow::{Context, Result};
use clap::Parser;
use groundwork_common::config::{GroundworkConfig, CONFIG_ENV_VAR};
use groundwork_common::db::{init_database, PersistenceGateway};
use groundwork_common::EntityRegistry;
use groundwork_dispatch::{build_router, ActionDispatcher, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "groundwork-dispatch")]
#[command(about = "Action document dispatch server for Groundwork")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configured one
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting Groundwork dispatch v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = GroundworkConfig::load_resolved(args.config.as_deref())
        .context("Failed to load configuration")?;

    let registry = EntityRegistry::from_definitions(config.entities.clone())
        .context("Invalid entity declarations")?;
    info!("Registered {} entity types", registry.len());

    info!("Database path: {}", config.database_path.display());
    let pool = init_database(&config.database_path).await?;

    let gateway = PersistenceGateway::new(pool, Arc::new(registry));
    gateway.sync_schema().await?;

    if config.is_archive {
        info!("Soft delete enabled for archivable entities");
    }
    let dispatcher = ActionDispatcher::new(gateway, config.is_archive);
    let app = build_router(AppState::new(dispatcher));

    let listen = args.listen.unwrap_or(config.listen);
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("groundwork-dispatch listening on http://{}", listen);
    info!("Health check: http://{}/health", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
