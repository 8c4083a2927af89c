//! groundwork-import - bulk load CSV files into the Groundwork database
//!
//! Imports the configured services from the import directory, parents
//! before children. `--drop-tables` empties the configured tables first.

use anyhow::{Context, Result};
use clap::Parser;
use groundwork_common::config::{GroundworkConfig, CONFIG_ENV_VAR};
use groundwork_common::db::{init_database, PersistenceGateway};
use groundwork_common::EntityRegistry;
use groundwork_import::CsvImporter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "groundwork-import")]
#[command(about = "CSV bulk import for Groundwork entities")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Directory holding `<service>.csv` files, overrides the configured one
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Empty the configured foreign_key_tables_to_delete before importing
    #[arg(long)]
    drop_tables: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting Groundwork import v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = GroundworkConfig::load_resolved(args.config.as_deref())
        .context("Failed to load configuration")?;

    let directory = args
        .directory
        .or_else(|| config.import_directory.clone())
        .context("No import directory: pass --directory or set import_directory")?;

    let registry = EntityRegistry::from_definitions(config.entities.clone())
        .context("Invalid entity declarations")?;
    info!("Registered {} entity types", registry.len());

    info!("Database path: {}", config.database_path.display());
    let pool = init_database(&config.database_path).await?;
    let gateway = PersistenceGateway::new(pool, Arc::new(registry));
    gateway.sync_schema().await?;

    let importer = CsvImporter::new(gateway, directory, config.import_services.clone())
        .with_purge_tables(config.foreign_key_tables_to_delete.clone());
    let report = importer
        .run(args.drop_tables)
        .await
        .with_context(|| format!("Import from {} failed", importer.directory().display()))?;

    for file in &report.files {
        info!(
            "  {} ({}): {} rows, {} links",
            file.service, file.entity, file.rows, file.links
        );
    }
    info!("Imported {} rows", report.rows());
    Ok(())
}
