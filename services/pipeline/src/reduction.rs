//! Dark subtraction and flat-field correction.
//!
//! The engine is a pure transform over in-memory arrays:
//!
//! 1. combine the darks with a per-pixel NaN-ignoring median
//! 2. subtract the combined dark from every flat and median-combine the result
//! 3. normalize the combined flat by its own median
//! 4. force flat pixels below [`CLAMP_THRESHOLD`] to 1.0
//! 5. `reduced = (science - dark) / flat`
//!
//! Medians are used throughout so that outlier pixels and cosmic-ray hits in
//! individual calibration frames do not leak into the combined frames.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Normalized flat values below this are replaced by 1.0
pub const CLAMP_THRESHOLD: f64 = 1e-8;

/// Default provenance stamped on reduced frames
pub const DEFAULT_PROVENANCE_TAG: &str = "bias-and-flat-corrected";

/// Kind of calibration frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationKind {
    Dark,
    Flat,
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationKind::Dark => f.write_str("dark"),
            CalibrationKind::Flat => f.write_str("flat"),
        }
    }
}

/// Errors that make a reduction impossible
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReductionError {
    #[error("Insufficient calibration: no {kind} frames")]
    InsufficientCalibration { kind: CalibrationKind },

    #[error("{kind} frame {index} has shape {actual:?}, science has {expected:?}")]
    ShapeMismatch {
        kind: CalibrationKind,
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Combined flat has degenerate median {median}")]
    DegenerateFlat { median: f64 },
}

/// How a reduced frame was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Number of dark frames combined
    pub dark_frames: usize,
    /// Number of flat frames combined
    pub flat_frames: usize,
    /// Median of the dark-subtracted combined flat before normalization
    pub flat_median: f64,
    /// Normalized flat pixels forced to 1.0
    pub clamped_pixels: usize,
    pub tag: String,
}

/// A reduced science frame
#[derive(Debug, Clone)]
pub struct ReducedFrame {
    pub data: Array2<f64>,
    pub provenance: Provenance,
}

/// Median of the non-NaN values; NaN when there are none.
///
/// An even count averages the two middle values.
pub fn nan_median(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut finite: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    median_in_place(&mut finite)
}

fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Per-pixel NaN-ignoring median across a stack of equally shaped frames.
///
/// The stack must be non-empty and share one shape.
pub fn median_combine(frames: &[Array2<f64>]) -> Array2<f64> {
    let shape = frames.first().map(|f| f.dim()).unwrap_or((0, 0));
    let mut stack = Vec::with_capacity(frames.len());

    Array2::from_shape_fn(shape, |idx| {
        stack.clear();
        stack.extend(frames.iter().map(|f| f[idx]).filter(|v| !v.is_nan()));
        median_in_place(&mut stack)
    })
}

fn check_shapes(
    kind: CalibrationKind,
    frames: &[Array2<f64>],
    expected: (usize, usize),
) -> Result<(), ReductionError> {
    match frames.iter().position(|f| f.dim() != expected) {
        Some(index) => Err(ReductionError::ShapeMismatch {
            kind,
            index,
            expected,
            actual: frames[index].dim(),
        }),
        None => Ok(()),
    }
}

/// Check that at least one dark and one flat were supplied
pub fn require_calibration(flat_count: usize, dark_count: usize) -> Result<(), ReductionError> {
    if dark_count == 0 {
        return Err(ReductionError::InsufficientCalibration {
            kind: CalibrationKind::Dark,
        });
    }
    if flat_count == 0 {
        return Err(ReductionError::InsufficientCalibration {
            kind: CalibrationKind::Flat,
        });
    }
    Ok(())
}

/// Reduce a science frame with the default provenance tag
pub fn reduce(
    science: &Array2<f64>,
    flats: &[Array2<f64>],
    darks: &[Array2<f64>],
) -> Result<ReducedFrame, ReductionError> {
    reduce_with_tag(science, flats, darks, DEFAULT_PROVENANCE_TAG)
}

/// Reduce a science frame against its flats and darks
pub fn reduce_with_tag(
    science: &Array2<f64>,
    flats: &[Array2<f64>],
    darks: &[Array2<f64>],
    tag: &str,
) -> Result<ReducedFrame, ReductionError> {
    require_calibration(flats.len(), darks.len())?;
    check_shapes(CalibrationKind::Dark, darks, science.dim())?;
    check_shapes(CalibrationKind::Flat, flats, science.dim())?;

    let combined_dark = median_combine(darks);

    let dark_subtracted: Vec<Array2<f64>> = flats.iter().map(|f| f - &combined_dark).collect();
    let combined_flat = median_combine(&dark_subtracted);

    let flat_median = nan_median(combined_flat.iter().copied());
    if !flat_median.is_finite() || flat_median.abs() < CLAMP_THRESHOLD {
        return Err(ReductionError::DegenerateFlat {
            median: flat_median,
        });
    }

    let mut clamped_pixels = 0;
    let normalized_flat = combined_flat.mapv(|v| {
        let v = v / flat_median;
        if v < CLAMP_THRESHOLD {
            clamped_pixels += 1;
            1.0
        } else {
            v
        }
    });

    let data = (science - &combined_dark) / &normalized_flat;

    Ok(ReducedFrame {
        data,
        provenance: Provenance {
            dark_frames: darks.len(),
            flat_frames: flats.len(),
            flat_median,
            clamped_pixels,
            tag: tag.to_string(),
        },
    })
}
