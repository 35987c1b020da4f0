//! Instrument header model.
//!
//! A [`RawHeader`] is the opaque keyword/value mapping produced by the file
//! reader. [`ExposureHeader::from_raw`] validates it once at ingestion entry so
//! that nothing downstream performs ad hoc keyword lookups.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Horizontal binning scale
pub const KEY_BINNING_X: &str = "CDELT1";
/// Vertical binning scale
pub const KEY_BINNING_Y: &str = "CDELT2";
pub const KEY_FILTER: &str = "HIERARCH ESO INS FILT1 NAME";
/// Data product category (CALIB, SCIENCE, ...)
pub const KEY_CATEGORY: &str = "HIERARCH ESO DPR CATG";
/// Data product subtype (FLAT, DARK, OBJECT, ...)
pub const KEY_TYPE: &str = "HIERARCH ESO DPR TYPE";
pub const KEY_MJD: &str = "MJD-OBS";
pub const KEY_EXPOSURE_TIME: &str = "EXPTIME";
pub const KEY_READ_SPEED: &str = "HIERARCH ESO DET READ SPEED";
pub const KEY_DATE: &str = "DATE";
pub const KEY_OBJECT: &str = "OBJECT";

/// A scalar header value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Logical(bool),
}

impl HeaderValue {
    /// Interpret the value as an integer.
    ///
    /// Reals are truncated toward zero, logicals map to 0/1 and text must
    /// parse as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(v) => Some(*v),
            HeaderValue::Real(v) if v.is_finite() => Some(v.trunc() as i64),
            HeaderValue::Real(_) => None,
            HeaderValue::Logical(v) => Some(i64::from(*v)),
            HeaderValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            HeaderValue::Integer(v) => Some(*v as f64),
            HeaderValue::Real(v) => Some(*v),
            HeaderValue::Text(s) => s.trim().parse().ok(),
            HeaderValue::Logical(_) => None,
        }
    }

    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Integer(v) => write!(f, "{v}"),
            HeaderValue::Real(v) => write!(f, "{v}"),
            HeaderValue::Text(s) => f.write_str(s),
            HeaderValue::Logical(true) => f.write_str("T"),
            HeaderValue::Logical(false) => f.write_str("F"),
        }
    }
}

/// Keyword to value mapping read from a file's primary header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawHeader {
    values: HashMap<String, HeaderValue>,
}

impl RawHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, keyword: impl Into<String>, value: HeaderValue) {
        self.values.insert(keyword.into(), value);
    }

    /// Builder-style insert
    pub fn with(mut self, keyword: impl Into<String>, value: HeaderValue) -> Self {
        self.insert(keyword, value);
        self
    }

    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.values.get(keyword)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn text(&self, keyword: &str) -> Option<String> {
        self.get(keyword).map(HeaderValue::as_text)
    }

    /// Text value, treating an empty or blank string as absent
    fn non_empty_text(&self, keyword: &str) -> Option<String> {
        self.text(keyword).filter(|s| !s.trim().is_empty())
    }

    fn real(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(HeaderValue::as_real)
    }

    fn integer(&self, keyword: &'static str) -> Result<i64, HeaderError> {
        let value = self
            .get(keyword)
            .ok_or(HeaderError::MissingKeyword(keyword))?;
        value.as_integer().ok_or_else(|| HeaderError::NotInteger {
            keyword,
            value: value.to_string(),
        })
    }
}

impl FromIterator<(String, HeaderValue)> for RawHeader {
    fn from_iter<I: IntoIterator<Item = (String, HeaderValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Errors raised while validating a header
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeaderError {
    #[error("Missing required keyword {0}")]
    MissingKeyword(&'static str),

    #[error("Keyword {keyword} is not an integer: {value}")]
    NotInteger {
        keyword: &'static str,
        value: String,
    },
}

/// Validated metadata of one instrument exposure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureHeader {
    /// Composite binning, e.g. "2x2"
    pub binning: String,
    pub filter: Option<String>,
    pub category: Option<String>,
    pub frame_type: Option<String>,
    pub mjd: Option<f64>,
    pub exposure_time: Option<f64>,
    pub read_speed: Option<String>,
    pub date_obs: Option<String>,
    pub object_name: Option<String>,
}

impl ExposureHeader {
    /// Validate a raw header.
    ///
    /// Both binning scales are required; every other field is optional.
    pub fn from_raw(raw: &RawHeader) -> Result<Self, HeaderError> {
        let binning_x = raw.integer(KEY_BINNING_X)?;
        let binning_y = raw.integer(KEY_BINNING_Y)?;

        Ok(Self {
            binning: format!("{binning_x}x{binning_y}"),
            filter: raw.text(KEY_FILTER),
            category: raw.text(KEY_CATEGORY),
            frame_type: raw.text(KEY_TYPE),
            mjd: raw.real(KEY_MJD),
            exposure_time: raw.real(KEY_EXPOSURE_TIME),
            read_speed: raw.text(KEY_READ_SPEED),
            date_obs: raw.non_empty_text(KEY_DATE),
            object_name: raw.non_empty_text(KEY_OBJECT),
        })
    }
}
