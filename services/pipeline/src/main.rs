use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nightcal_pipeline::{reduce_science_file, PipelineConfig, ReductionDriver};
use nightcal_storage::CatalogStore;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Reduce science exposures with matched darks and flats
#[derive(Parser, Debug)]
#[command(name = "pipeline", version, about)]
struct Cli {
    /// Value stamped into the REDUC keyword
    #[arg(long, global = true)]
    tag: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reduce every cataloged science exposure without a reduced product
    Run {
        /// Catalog database URL
        #[arg(long)]
        database_url: Option<String>,

        /// Directory receiving reduced products
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Reduce one science file against explicit calibration files
    Reduce {
        #[arg(long)]
        science: PathBuf,

        /// Flat-field frame (repeatable)
        #[arg(long = "flat", required = true)]
        flats: Vec<PathBuf>,

        /// Dark frame (repeatable)
        #[arg(long = "dark", required = true)]
        darks: Vec<PathBuf>,

        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load().context("Failed to load configuration")?;
    if let Some(tag) = cli.tag {
        config.reduction.provenance_tag = tag;
    }

    init_tracing(&config.logging.level, &config.logging.format);

    match cli.command {
        Command::Run {
            database_url,
            output_dir,
        } => {
            if let Some(url) = database_url {
                config.database.url = url;
            }
            if let Some(dir) = output_dir {
                config.reduction.output_dir = dir;
            }
            config.validate().context("Invalid configuration")?;

            let store = CatalogStore::open(&config.database)
                .await
                .context("Failed to open exposure catalog")?;
            let driver = ReductionDriver::new(store.clone(), &config.reduction);

            let report = driver.run_pending().await.context("Batch reduction aborted")?;
            for failure in &report.failures {
                error!(unique_key = %failure.unique_key, reason = %failure.reason, "Not reduced");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);

            store.close().await;
        }
        Command::Reduce {
            science,
            flats,
            darks,
            output,
        } => {
            config
                .reduction
                .validate()
                .context("Invalid reduction configuration")?;

            let tag = config.reduction.provenance_tag.clone();
            let target = output.clone();
            let provenance = tokio::task::spawn_blocking(move || {
                reduce_science_file(&science, &flats, &darks, &target, &tag)
            })
            .await?
            .with_context(|| format!("Failed to reduce into {}", output.display()))?;

            info!(
                output = %output.display(),
                darks = provenance.dark_frames,
                flats = provenance.flat_frames,
                clamped = provenance.clamped_pixels,
                "Reduced science file"
            );
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match format {
        "json" => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        _ => subscriber
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
}
