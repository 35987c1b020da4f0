//! Batch ingestion of instrument files into the exposure catalog.
//!
//! Every file is processed in isolation: an unreadable header, a missing
//! binning keyword or a store failure becomes an [`IngestDiagnostic`] for that
//! file and the batch moves on. A file's raw row and index row are committed
//! together, so a store failure never leaves a half-cataloged path behind.

use crate::classifier::{classify, Classification};
use crate::fits_reader::{discover_exposures, HeaderReader, ReadError};
use crate::header::ExposureHeader;
use nightcal_storage::{
    CatalogError, CatalogStore, CatalogedExposure, ExposureIndex, NewRawExposure, ScienceRecord,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Default substring identifying instrument files
pub const DEFAULT_EXTENSION_MARKER: &str = ".fits";

/// A reportable, non-fatal condition met while ingesting one file
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestDiagnostic {
    #[error("Unreadable file: {message}")]
    Unreadable { message: String },

    #[error("Invalid header: {message}")]
    InvalidHeader { message: String },

    #[error("Unknown calibration type {frame_type:?}")]
    UnknownCalibration { frame_type: Option<String> },

    #[error("Science exposure missing {missing:?}")]
    IncompleteScience { missing: Vec<String> },

    #[error("Unknown category {category:?}")]
    UnknownCategory { category: Option<String> },

    #[error("Science entry with unique key {unique_key} already exists")]
    DuplicateScienceKey { unique_key: String },

    #[error("Catalog failure: {message}")]
    StoreFailure { message: String },
}

impl From<CatalogError> for IngestDiagnostic {
    fn from(err: CatalogError) -> Self {
        IngestDiagnostic::StoreFailure {
            message: err.to_string(),
        }
    }
}

/// Result of ingesting a single file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Registered and indexed as a flat, dark or science exposure
    Cataloged {
        raw_file_id: i64,
        classification: Classification,
    },
    /// Registered as a raw exposure only
    RawOnly {
        raw_file_id: i64,
        diagnostic: IngestDiagnostic,
    },
    /// The path was already in the catalog; nothing was done
    AlreadyCataloged,
    /// Nothing was registered; a later ingestion retries the file
    Skipped { diagnostic: IngestDiagnostic },
}

impl IngestOutcome {
    pub fn diagnostic(&self) -> Option<&IngestDiagnostic> {
        match self {
            IngestOutcome::RawOnly { diagnostic, .. } | IngestOutcome::Skipped { diagnostic } => {
                Some(diagnostic)
            }
            _ => None,
        }
    }
}

/// Diagnostic attached to the file that raised it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDiagnostic {
    pub path: PathBuf,
    pub diagnostic: IngestDiagnostic,
}

/// Summary of a directory ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub files_seen: usize,
    pub cataloged: usize,
    pub raw_only: usize,
    pub already_cataloged: usize,
    pub skipped: usize,
    pub diagnostics: Vec<FileDiagnostic>,
}

impl IngestReport {
    fn record(&mut self, path: &Path, outcome: IngestOutcome) {
        self.files_seen += 1;
        match outcome {
            IngestOutcome::Cataloged { .. } => self.cataloged += 1,
            IngestOutcome::AlreadyCataloged => self.already_cataloged += 1,
            IngestOutcome::RawOnly { diagnostic, .. } => {
                self.raw_only += 1;
                self.push(path, diagnostic);
            }
            IngestOutcome::Skipped { diagnostic } => {
                self.skipped += 1;
                self.push(path, diagnostic);
            }
        }
    }

    fn push(&mut self, path: &Path, diagnostic: IngestDiagnostic) {
        self.diagnostics.push(FileDiagnostic {
            path: path.to_path_buf(),
            diagnostic,
        });
    }
}

/// Reads, classifies and catalogs instrument files
pub struct Ingestor<R> {
    store: CatalogStore,
    reader: R,
    extension_marker: String,
}

impl<R: HeaderReader> Ingestor<R> {
    pub fn new(store: CatalogStore, reader: R) -> Self {
        Self {
            store,
            reader,
            extension_marker: DEFAULT_EXTENSION_MARKER.to_string(),
        }
    }

    /// Only ingest files whose name contains `marker`
    pub fn with_extension_marker(mut self, marker: impl Into<String>) -> Self {
        self.extension_marker = marker.into();
        self
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Ingest every matching file in `directory`.
    ///
    /// Only a failure to list the directory aborts the run.
    #[instrument(skip(self, directory), fields(directory = %directory.display()))]
    pub async fn ingest_directory(&self, directory: &Path) -> Result<IngestReport, ReadError> {
        let paths = discover_exposures(directory, &self.extension_marker)?;

        let mut report = IngestReport::default();
        for path in &paths {
            let outcome = self.ingest_file(path).await;
            report.record(path, outcome);
        }

        info!(
            files = report.files_seen,
            cataloged = report.cataloged,
            raw_only = report.raw_only,
            already_cataloged = report.already_cataloged,
            skipped = report.skipped,
            "Ingestion finished"
        );

        Ok(report)
    }

    /// Ingest a single file
    pub async fn ingest_file(&self, path: &Path) -> IngestOutcome {
        let outcome = match self.try_ingest(path).await {
            Ok(outcome) => outcome,
            Err(diagnostic) => IngestOutcome::Skipped { diagnostic },
        };

        match &outcome {
            IngestOutcome::Cataloged { classification, .. } => {
                metrics::counter!("ingest.files.cataloged").increment(1);
                debug!(path = %path.display(), ?classification, "Cataloged exposure");
            }
            IngestOutcome::AlreadyCataloged => {
                debug!(path = %path.display(), "Already cataloged");
            }
            IngestOutcome::RawOnly { diagnostic, .. } => {
                metrics::counter!("ingest.files.raw_only").increment(1);
                warn!(path = %path.display(), %diagnostic, "Exposure cataloged without index entry");
            }
            IngestOutcome::Skipped { diagnostic } => {
                metrics::counter!("ingest.files.skipped").increment(1);
                warn!(path = %path.display(), %diagnostic, "Skipping file");
            }
        }

        outcome
    }

    async fn try_ingest(&self, path: &Path) -> Result<IngestOutcome, IngestDiagnostic> {
        let raw = self
            .reader
            .read_header(path)
            .map_err(|e| IngestDiagnostic::Unreadable {
                message: e.to_string(),
            })?;

        let header = ExposureHeader::from_raw(&raw).map_err(|e| IngestDiagnostic::InvalidHeader {
            message: e.to_string(),
        })?;

        let classification = classify(&header);
        let record = new_raw_exposure(path, &header);

        let (raw_file_id, science) = match self
            .store
            .catalog_exposure(&record, &exposure_index(&classification))
            .await?
        {
            CatalogedExposure::AlreadyCataloged => return Ok(IngestOutcome::AlreadyCataloged),
            CatalogedExposure::Registered {
                raw_file_id,
                science,
            } => (raw_file_id, science),
        };

        let diagnostic = match (&classification, science) {
            (_, Some(ScienceRecord::DuplicateKey { unique_key })) => {
                Some(IngestDiagnostic::DuplicateScienceKey { unique_key })
            }
            (Classification::IncompleteScience { missing }, _) => {
                Some(IngestDiagnostic::IncompleteScience {
                    missing: missing.clone(),
                })
            }
            (Classification::UnknownCalibration { frame_type }, _) => {
                Some(IngestDiagnostic::UnknownCalibration {
                    frame_type: frame_type.clone(),
                })
            }
            (Classification::UnknownCategory { category }, _) => {
                Some(IngestDiagnostic::UnknownCategory {
                    category: category.clone(),
                })
            }
            _ => None,
        };

        Ok(match diagnostic {
            None => IngestOutcome::Cataloged {
                raw_file_id,
                classification,
            },
            Some(diagnostic) => IngestOutcome::RawOnly {
                raw_file_id,
                diagnostic,
            },
        })
    }
}

/// Index row a classification is cataloged under
fn exposure_index(classification: &Classification) -> ExposureIndex {
    match classification {
        Classification::Flat => ExposureIndex::Flat,
        Classification::Dark => ExposureIndex::Dark,
        Classification::Science {
            object_name,
            date_obs,
        } => ExposureIndex::Science {
            object_name: object_name.clone(),
            date_obs: date_obs.clone(),
        },
        Classification::IncompleteScience { .. }
        | Classification::UnknownCalibration { .. }
        | Classification::UnknownCategory { .. } => ExposureIndex::RawOnly,
    }
}

fn new_raw_exposure(path: &Path, header: &ExposureHeader) -> NewRawExposure {
    NewRawExposure {
        path: path.to_string_lossy().into_owned(),
        binning: header.binning.clone(),
        filter: header.filter.clone(),
        category: header.category.clone(),
        frame_type: header.frame_type.clone(),
        mjd: header.mjd,
        exposure_time: header.exposure_time,
        read_speed: header.read_speed.clone(),
        object_name: header.object_name.clone(),
        date_obs: header.date_obs.clone(),
    }
}
