//! Batch ingestion of raw instrument files into the nightcal catalog.
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/ingest, /etc/nightcal/ingest)
//! 2. Environment variables (prefixed with INGEST__)
//! 3. Command line arguments

use anyhow::Context;
use clap::Parser;
use nightcal_ingest::{FitsHeaderReader, IngestConfig, Ingestor};
use nightcal_storage::{CatalogStore, LoggingConfig};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Catalog every instrument file in a directory
#[derive(Parser, Debug)]
#[command(name = "ingest", version, about)]
struct Args {
    /// Directory holding raw instrument files
    directory: Option<PathBuf>,

    /// Catalog database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Substring a file name must contain to be ingested
    #[arg(long)]
    extension_marker: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args)?;

    init_logging(&config.logging)?;

    info!(
        service = "nightcal-ingest",
        version = env!("CARGO_PKG_VERSION"),
        directory = %config.ingest.directory.display(),
        "Starting ingestion"
    );

    let store = CatalogStore::open(&config.database)
        .await
        .context("Failed to open exposure catalog")?;

    let ingestor = Ingestor::new(store.clone(), FitsHeaderReader::new())
        .with_extension_marker(config.ingest.extension_marker.clone());

    let report = ingestor
        .ingest_directory(&config.ingest.directory)
        .await
        .context("Failed to scan directory")?;

    for entry in &report.diagnostics {
        warn!(path = %entry.path.display(), diagnostic = %entry.diagnostic, "Ingestion diagnostic");
    }

    info!(
        files = report.files_seen,
        cataloged = report.cataloged,
        raw_only = report.raw_only,
        already_cataloged = report.already_cataloged,
        skipped = report.skipped,
        "Ingestion complete"
    );

    store.close().await;
    Ok(())
}

/// Merge command line arguments over file and environment configuration.
fn load_config(args: Args) -> anyhow::Result<IngestConfig> {
    let mut config = IngestConfig::load().context("Failed to load configuration")?;

    if let Some(directory) = args.directory {
        config.ingest.directory = directory;
    }
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if let Some(marker) = args.extension_marker {
        config.ingest.extension_marker = marker;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(level, rust_log.as_deref())?;

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// RUST_LOG, when set and valid, replaces the configured directives entirely.
fn log_filter(level: Level, rust_log: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Some(filter) = rust_log.and_then(|spec| EnvFilter::try_new(spec).ok()) {
        return Ok(filter);
    }

    Ok(EnvFilter::new("warn")
        .add_directive(format!("nightcal_ingest={}", level).parse()?)
        .add_directive(format!("nightcal_storage={}", level).parse()?)
        .add_directive("sqlx=warn".parse()?))
}
