//! Instrument file access.
//!
//! [`HeaderReader`] is the seam between ingestion and the file format.
//! [`FitsHeaderReader`] reads the primary HDU of FITS files with `fitsio`.

use crate::header::{
    HeaderValue, RawHeader, KEY_BINNING_X, KEY_BINNING_Y, KEY_CATEGORY, KEY_DATE,
    KEY_EXPOSURE_TIME, KEY_FILTER, KEY_MJD, KEY_OBJECT, KEY_READ_SPEED, KEY_TYPE,
};
use fitsio::hdu::FitsHdu;
use fitsio::FitsFile;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Keywords extracted from every primary header
pub const HEADER_KEYWORDS: [&str; 10] = [
    KEY_BINNING_X,
    KEY_BINNING_Y,
    KEY_FILTER,
    KEY_CATEGORY,
    KEY_TYPE,
    KEY_MJD,
    KEY_EXPOSURE_TIME,
    KEY_READ_SPEED,
    KEY_DATE,
    KEY_OBJECT,
];

/// Errors raised while reading instrument files
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Cannot decode {path}: {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: fitsio::errors::Error,
    },

    #[error("Cannot list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads the metadata header of an instrument file
#[cfg_attr(test, mockall::automock)]
pub trait HeaderReader {
    /// Decode the header of the file at `path`
    fn read_header(&self, path: &Path) -> Result<RawHeader, ReadError>;
}

/// Header reader for FITS files
#[derive(Debug, Clone, Default)]
pub struct FitsHeaderReader;

impl FitsHeaderReader {
    pub fn new() -> Self {
        Self
    }
}

impl HeaderReader for FitsHeaderReader {
    fn read_header(&self, path: &Path) -> Result<RawHeader, ReadError> {
        let fits_err = |source| ReadError::Fits {
            path: path.to_path_buf(),
            source,
        };

        let mut fptr = FitsFile::open(path).map_err(fits_err)?;
        let hdu = fptr.primary_hdu().map_err(fits_err)?;

        let mut header = RawHeader::new();
        for keyword in HEADER_KEYWORDS {
            if let Some(value) = read_value(&hdu, &mut fptr, keyword).map_err(fits_err)? {
                header.insert(keyword, value);
            }
        }

        trace!(path = %path.display(), keywords = header.len(), "Read primary header");
        Ok(header)
    }
}

/// CFITSIO status for a keyword absent from the header
const KEY_NO_EXIST: i32 = 202;

/// Read a keyword and type its value from the card text.
///
/// Only an absent keyword yields `None`; any other CFITSIO failure is an error.
fn read_value(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    keyword: &str,
) -> Result<Option<HeaderValue>, fitsio::errors::Error> {
    match hdu.read_key::<String>(fptr, keyword) {
        Ok(text) => Ok(Some(parse_card_value(&text))),
        Err(e) if is_missing_keyword(&e) => Ok(None),
        Err(_) => hdu
            .read_key::<f64>(fptr, keyword)
            .map(|v| Some(HeaderValue::Real(v))),
    }
}

fn is_missing_keyword(err: &fitsio::errors::Error) -> bool {
    matches!(err, fitsio::errors::Error::Fits(e) if e.status == KEY_NO_EXIST)
}

/// Type a card value: integer, then real, then logical, else text
pub(crate) fn parse_card_value(text: &str) -> HeaderValue {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return HeaderValue::Integer(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return HeaderValue::Real(v);
    }
    match trimmed {
        "T" => HeaderValue::Logical(true),
        "F" => HeaderValue::Logical(false),
        _ => HeaderValue::Text(text.trim_end().to_string()),
    }
}

/// List regular files in `directory` whose name contains `marker`.
///
/// The result is sorted by path so ingestion order is deterministic.
pub fn discover_exposures(directory: &Path, marker: &str) -> Result<Vec<PathBuf>, ReadError> {
    let io_err = |source| ReadError::Io {
        path: directory.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().contains(marker) {
            paths.push(entry.path());
        }
    }

    paths.sort();
    debug!(directory = %directory.display(), count = paths.len(), "Discovered exposures");
    Ok(paths)
}
