use crate::fits_io::FitsError;
use crate::reduction::ReductionError;
use nightcal_storage::CatalogError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reducing a cataloged science exposure
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Reduction failed: {0}")]
    Reduction(#[from] ReductionError),

    #[error("FITS error: {0}")]
    Fits(#[from] FitsError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reduced product {path} for {unique_key} was not recorded")]
    ProductNotRecorded { unique_key: String, path: PathBuf },

    #[error("Reduction worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
