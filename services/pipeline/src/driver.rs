//! Batch reduction of pending science exposures.
//!
//! The driver walks the catalog's unreduced science keys one at a time,
//! resolves each to its calibration set, reduces it on a blocking worker and
//! records the product. A failure is recorded against its key and the batch
//! continues.

use crate::config::ReductionSettings;
use crate::error::{PipelineError, Result};
use crate::fits_io::{read_image, write_reduced};
use crate::reduction::{reduce_with_tag, require_calibration, Provenance};
use nightcal_storage::CatalogStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Reduce one science file against explicit calibration files.
///
/// Calibration counts are checked before any file is read, so an
/// insufficient set never produces output. An existing file at `output` is
/// overwritten.
pub fn reduce_science_file(
    science: &Path,
    flats: &[PathBuf],
    darks: &[PathBuf],
    output: &Path,
    tag: &str,
) -> Result<Provenance> {
    require_calibration(flats.len(), darks.len())?;

    let science_data = read_image(science)?;
    let flat_data = flats
        .iter()
        .map(|p| read_image(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let dark_data = darks
        .iter()
        .map(|p| read_image(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let frame = reduce_with_tag(&science_data, &flat_data, &dark_data, tag)?;
    write_reduced(output, &frame, science)?;

    Ok(frame.provenance)
}

/// A science exposure reduced during a batch
#[derive(Debug, Clone, Serialize)]
pub struct ReducedEntry {
    pub unique_key: String,
    pub output: PathBuf,
    pub provenance: Provenance,
}

/// A science exposure whose reduction failed
#[derive(Debug, Clone, Serialize)]
pub struct ReductionFailure {
    pub unique_key: String,
    pub reason: String,
}

/// Summary of a batch reduction
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub reduced: Vec<ReducedEntry>,
    pub failures: Vec<ReductionFailure>,
}

/// Output file name for a science key.
///
/// Bytes outside `[A-Za-z0-9._-]` are written as `%XX`, `%` included, so
/// distinct keys never share a file name.
pub fn reduced_file_name(unique_key: &str) -> String {
    let mut name = String::with_capacity(unique_key.len() + 13);
    for byte in unique_key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name.push_str("_reduced.fits");
    name
}

/// Reduces every pending science exposure in the catalog
pub struct ReductionDriver {
    store: CatalogStore,
    output_dir: PathBuf,
    provenance_tag: String,
}

impl ReductionDriver {
    pub fn new(store: CatalogStore, settings: &ReductionSettings) -> Self {
        Self {
            store,
            output_dir: settings.output_dir.clone(),
            provenance_tag: settings.provenance_tag.clone(),
        }
    }

    /// Where the reduced product of `unique_key` is written
    pub fn output_path(&self, unique_key: &str) -> PathBuf {
        self.output_dir.join(reduced_file_name(unique_key))
    }

    /// Reduce all science exposures without a reduced product.
    ///
    /// Only failing to list pending keys or to create the output directory
    /// aborts the batch.
    pub async fn run_pending(&self) -> Result<BatchReport> {
        let pending = self.store.list_unreduced_science().await?;
        std::fs::create_dir_all(&self.output_dir)?;

        info!(count = pending.len(), output_dir = %self.output_dir.display(), "Reducing pending science");

        let mut report = BatchReport::default();
        for unique_key in pending {
            match self.reduce_key(&unique_key).await {
                Ok(entry) => {
                    metrics::counter!("pipeline.reductions.succeeded").increment(1);
                    report.reduced.push(entry);
                }
                Err(e) => {
                    metrics::counter!("pipeline.reductions.failed").increment(1);
                    warn!(unique_key = %unique_key, error = %e, "Reduction failed");
                    report.failures.push(ReductionFailure {
                        unique_key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            reduced = report.reduced.len(),
            failed = report.failures.len(),
            "Batch reduction finished"
        );
        Ok(report)
    }

    /// Resolve, reduce and record a single science key
    #[instrument(skip(self))]
    pub async fn reduce_key(&self, unique_key: &str) -> Result<ReducedEntry> {
        let set = self.store.resolve_science_files(unique_key).await?;
        let output = self.output_path(unique_key);

        let science = PathBuf::from(&set.science_path);
        let flats = set.flat_paths();
        let darks = set.dark_paths();
        let tag = self.provenance_tag.clone();
        let target = output.clone();

        let provenance = tokio::task::spawn_blocking(move || {
            reduce_science_file(&science, &flats, &darks, &target, &tag)
        })
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))??;

        if self.store.record_reduced(unique_key, &output).await?.is_none() {
            return Err(PipelineError::ProductNotRecorded {
                unique_key: unique_key.to_string(),
                path: output,
            });
        }

        info!(
            output = %output.display(),
            darks = provenance.dark_frames,
            flats = provenance.flat_frames,
            clamped = provenance.clamped_pixels,
            "Reduced science exposure"
        );

        Ok(ReducedEntry {
            unique_key: unique_key.to_string(),
            output,
            provenance,
        })
    }
}
