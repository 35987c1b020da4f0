use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nightcal_storage::{CatalogConfig, CatalogStore};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Inspect the nightcal exposure catalog
#[derive(Parser, Debug)]
#[command(name = "catalog", version, about)]
struct Cli {
    /// Catalog database URL (overrides configuration)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List science keys without a reduced product
    Pending,
    /// Show the calibration frames matching a science observation
    Resolve {
        /// Unique key of the science observation ("{object}__{date}")
        key: String,
    },
    /// Print row counts per table
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CatalogConfig::load().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    config
        .database
        .validate()
        .context("Invalid database configuration")?;

    init_tracing(&config.logging.level, &config.logging.format);

    let store = CatalogStore::open(&config.database)
        .await
        .context("Failed to open exposure catalog")?;

    match cli.command {
        Command::Pending => {
            let keys = store.list_unreduced_science().await?;
            info!(count = keys.len(), "Pending science observations");
            print_json(&keys)?;
        }
        Command::Resolve { key } => {
            let set = store
                .resolve_science_files(&key)
                .await
                .with_context(|| format!("Failed to resolve {key}"))?;
            print_json(&set)?;
        }
        Command::Stats => {
            let stats = store.stats().await?;
            print_json(&stats)?;
        }
    }

    store.close().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr so stdout stays parseable JSON
    match format {
        "json" => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        _ => subscriber
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
}
