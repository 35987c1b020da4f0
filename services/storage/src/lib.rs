//! Nightcal Storage
//!
//! Relational catalog of raw instrument exposures for the nightcal reduction
//! pipeline. Every FITS file seen by ingestion is registered once by path;
//! calibration frames are indexed as flats or darks and science frames are
//! keyed by `"{object}__{date}"`. Reduced products are tracked per science key
//! so the pipeline knows which observations are still pending.
//!
//! ## Schema
//!
//! ```text
//! ┌──────────────┐
//! │ raw_files    │◀──────┬──────────────┬──────────────┐
//! │ (path UNIQUE)│       │              │              │
//! └──────────────┘  ┌─────────┐   ┌─────────┐   ┌──────────────┐
//!                   │ flats   │   │ darks   │   │ science      │
//!                   └─────────┘   └─────────┘   │ (unique_key) │
//!                                               └──────────────┘
//!                                                      ▲
//!                                               ┌──────────────┐
//!                                               │ reduced_data │
//!                                               └──────────────┘
//! ```

pub mod calibration_matcher;
pub mod catalog_store;
pub mod config;
pub mod error;

#[cfg(test)]
mod testing;

pub use calibration_matcher::{CalibrationSet, InstrumentSetup};
pub use catalog_store::{
    science_unique_key, CatalogStats, CatalogStore, CatalogedExposure, ExposureIndex,
    NewRawExposure, RawExposure, ReducedProduct, ScienceObservation, ScienceRecord,
};
pub use config::{CatalogConfig, ConfigValidationError, DatabaseConfig, LoggingConfig};
pub use error::{CatalogError, Result};
