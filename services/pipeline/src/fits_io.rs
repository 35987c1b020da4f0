//! FITS image input/output for reduction.
//!
//! Images are held as `Array2<f64>` in row-major order, `(NAXIS2, NAXIS1)`.
//! Header cards are copied verbatim through the raw CFITSIO record calls, which
//! keeps `HIERARCH` cards, comments and WCS intact.

use crate::reduction::ReducedFrame;
use chrono::Utc;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::{sys, FitsFile};
use ndarray::Array2;
use std::ffi::{c_char, c_int, CStr, CString};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Keywords stamped on every reduced product
pub const PROVENANCE_KEYWORDS: [&str; 6] = ["REDUC", "NDARK", "NFLAT", "NCLAMP", "FLATMED", "REDUCDAT"];

/// Keywords describing data layout, owned by the writer of the new image
const STRUCTURAL_KEYWORDS: [&str; 9] = [
    "SIMPLE", "BITPIX", "EXTEND", "BZERO", "BSCALE", "BLANK", "PCOUNT", "GCOUNT", "END",
];

/// Header card buffer length, terminating NUL included
const CARD_BUFFER_LEN: usize = 81;

/// Errors that can occur reading or writing FITS images
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::errors::Error),

    #[error("Primary HDU of {0} is not an image")]
    NotAnImage(PathBuf),

    #[error("Image in {path} has {naxis} axes, expected 2")]
    UnsupportedDimensions { path: PathBuf, naxis: usize },

    #[error("Cannot shape image data: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("CFITSIO status {status} while {action}")]
    Cfitsio { status: c_int, action: &'static str },

    #[error("Header card contains a NUL byte: {0:?}")]
    InvalidCard(String),
}

/// Read the primary image of a FITS file
pub fn read_image(path: &Path) -> Result<Array2<f64>, FitsError> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.primary_hdu()?;

    let (rows, cols) = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => (shape[0], shape[1]),
        HduInfo::ImageInfo { shape, .. } => {
            return Err(FitsError::UnsupportedDimensions {
                path: path.to_path_buf(),
                naxis: shape.len(),
            })
        }
        _ => return Err(FitsError::NotAnImage(path.to_path_buf())),
    };

    let pixels: Vec<f64> = hdu.read_image(&mut fptr)?;
    let image = Array2::from_shape_vec((rows, cols), pixels)?;

    debug!(path = %path.display(), rows, cols, "Read image");
    Ok(image)
}

/// Write an image as the double-precision primary HDU of a new file.
///
/// Any existing file at `path` is replaced.
pub fn write_image(path: &Path, image: &Array2<f64>) -> Result<(FitsFile, FitsHdu), FitsError> {
    let (rows, cols) = image.dim();
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[rows, cols],
    };

    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    let hdu = fptr.primary_hdu()?;

    let pixels: Vec<f64> = image.iter().copied().collect();
    hdu.write_image(&mut fptr, &pixels)?;

    Ok((fptr, hdu))
}

/// Write a reduced frame and stamp its provenance.
///
/// Every non-structural card of the science file's primary header at
/// `source` is carried over before the provenance keywords are written.
pub fn write_reduced(path: &Path, frame: &ReducedFrame, source: &Path) -> Result<(), FitsError> {
    let mut source_fptr = FitsFile::open(source)?;
    source_fptr.primary_hdu()?;
    let source_cards = read_header_cards(&mut source_fptr)?;

    let (mut fptr, hdu) = write_image(path, &frame.data)?;
    let copied = copy_cards(&mut fptr, &source_cards)?;

    let provenance = &frame.provenance;
    hdu.write_key(&mut fptr, "REDUC", provenance.tag.as_str())?;
    hdu.write_key(&mut fptr, "NDARK", provenance.dark_frames as i64)?;
    hdu.write_key(&mut fptr, "NFLAT", provenance.flat_frames as i64)?;
    hdu.write_key(&mut fptr, "NCLAMP", provenance.clamped_pixels as i64)?;
    hdu.write_key(&mut fptr, "FLATMED", provenance.flat_median)?;
    hdu.write_key(
        &mut fptr,
        "REDUCDAT",
        Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
    )?;

    debug!(path = %path.display(), tag = %provenance.tag, copied, "Wrote reduced frame");
    Ok(())
}

/// Raw cards of the current HDU's header, in order, without `END`
pub fn read_header_cards(fptr: &mut FitsFile) -> Result<Vec<String>, FitsError> {
    let mut status: c_int = 0;
    let mut count: c_int = 0;
    let mut more: c_int = 0;
    // SAFETY: fptr is an open file and every out-pointer is a live local
    unsafe { sys::ffghsp(fptr.as_raw(), &mut count, &mut more, &mut status) };
    cfitsio_status(status, "counting header cards")?;

    let mut cards = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
    for index in 1..=count {
        let mut buffer: [c_char; CARD_BUFFER_LEN] = [0; CARD_BUFFER_LEN];
        // SAFETY: CFITSIO writes at most 80 characters plus NUL into buffer
        unsafe { sys::ffgrec(fptr.as_raw(), index, buffer.as_mut_ptr(), &mut status) };
        cfitsio_status(status, "reading a header card")?;

        // SAFETY: buffer is NUL-terminated, either by CFITSIO or by its zeroed tail
        let card = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        cards.push(card.to_string_lossy().into_owned());
    }

    Ok(cards)
}

/// Append a raw card to the current HDU's header
pub fn append_card(fptr: &mut FitsFile, card: &str) -> Result<(), FitsError> {
    let text = CString::new(card).map_err(|_| FitsError::InvalidCard(card.to_string()))?;
    let mut status: c_int = 0;
    // SAFETY: fptr is open for writing and text outlives the call
    unsafe { sys::ffprec(fptr.as_raw(), text.as_ptr(), &mut status) };
    cfitsio_status(status, "writing a header card")
}

/// Copy cards not describing data layout, skipping any already present
fn copy_cards(fptr: &mut FitsFile, cards: &[String]) -> Result<usize, FitsError> {
    let existing = read_header_cards(fptr)?;

    let mut copied = 0;
    for card in cards {
        if is_carried(card) && !existing.contains(card) {
            append_card(fptr, card)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Whether a science header card belongs on the reduced product
fn is_carried(card: &str) -> bool {
    let keyword = card.get(..8).unwrap_or(card).trim_end();
    !(keyword.starts_with("NAXIS")
        || STRUCTURAL_KEYWORDS.contains(&keyword)
        || PROVENANCE_KEYWORDS.contains(&keyword))
}

fn cfitsio_status(status: c_int, action: &'static str) -> Result<(), FitsError> {
    if status == 0 {
        Ok(())
    } else {
        Err(FitsError::Cfitsio { status, action })
    }
}
