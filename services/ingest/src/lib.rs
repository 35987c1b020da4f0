//! Nightcal Ingest
//!
//! Reads the primary header of raw instrument files, validates it into an
//! [`ExposureHeader`], classifies the exposure and registers it in the
//! exposure catalog.
//!
//! # Architecture
//!
//! ```text
//! directory -> discover_exposures -> HeaderReader -> ExposureHeader -> classify -> CatalogStore
//! ```

pub mod classifier;
pub mod config;
pub mod fits_reader;
pub mod header;
pub mod ingestor;

pub use classifier::{classify, Classification};
pub use config::{IngestConfig, IngestSettings};
pub use fits_reader::{discover_exposures, FitsHeaderReader, HeaderReader, ReadError};
pub use header::{ExposureHeader, HeaderError, HeaderValue, RawHeader};
pub use ingestor::{FileDiagnostic, IngestDiagnostic, IngestOutcome, IngestReport, Ingestor};
