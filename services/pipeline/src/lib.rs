//! Nightcal Pipeline - dark and flat-field reduction of cataloged science
//!
//! This library reduces science exposures recorded in the nightcal catalog:
//!
//! - combining matched darks and flats with NaN-ignoring medians
//! - correcting the science frame and stamping provenance into its header
//! - recording the reduced product so the exposure is no longer pending
//!
//! # Example
//!
//! ```rust,no_run
//! use nightcal_pipeline::{PipelineConfig, ReductionDriver};
//! use nightcal_storage::CatalogStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load()?;
//!     let store = CatalogStore::open(&config.database).await?;
//!
//!     let driver = ReductionDriver::new(store, &config.reduction);
//!     let report = driver.run_pending().await?;
//!     println!("reduced {} exposures", report.reduced.len());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod fits_io;
pub mod reduction;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::{PipelineConfig, ReductionSettings};
pub use driver::{
    reduce_science_file, reduced_file_name, BatchReport, ReducedEntry, ReductionDriver,
    ReductionFailure,
};
pub use error::{PipelineError, Result};
pub use fits_io::{read_header_cards, read_image, write_reduced, FitsError};
pub use reduction::{
    median_combine, nan_median, reduce, reduce_with_tag, CalibrationKind, Provenance,
    ReducedFrame, ReductionError, CLAMP_THRESHOLD, DEFAULT_PROVENANCE_TAG,
};
