use crate::header::{ExposureHeader, KEY_DATE, KEY_OBJECT};
use serde::Serialize;

/// Category value of calibration exposures
pub const CATEGORY_CALIB: &str = "CALIB";
/// Category value of science exposures
pub const CATEGORY_SCIENCE: &str = "SCIENCE";

/// What an exposure turns into once cataloged
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    /// Calibration whose type contains "FLAT"
    Flat,
    /// Calibration whose type is exactly "DARK"
    Dark,
    /// Science exposure carrying both object name and date
    Science {
        object_name: String,
        date_obs: String,
    },
    /// Science exposure lacking the keywords needed for its key
    IncompleteScience { missing: Vec<String> },
    /// Calibration of a type the pipeline does not use
    UnknownCalibration { frame_type: Option<String> },
    /// Neither calibration nor science
    UnknownCategory { category: Option<String> },
}

impl Classification {
    /// Whether this classification creates a catalog entry beyond the raw file
    pub fn is_cataloged(&self) -> bool {
        matches!(
            self,
            Classification::Flat | Classification::Dark | Classification::Science { .. }
        )
    }
}

/// Classify a validated exposure header
pub fn classify(header: &ExposureHeader) -> Classification {
    match header.category.as_deref() {
        Some(CATEGORY_CALIB) => classify_calibration(header.frame_type.as_deref()),
        Some(CATEGORY_SCIENCE) => classify_science(header),
        other => Classification::UnknownCategory {
            category: other.map(str::to_string),
        },
    }
}

fn classify_calibration(frame_type: Option<&str>) -> Classification {
    match frame_type {
        Some(t) if t.contains("FLAT") => Classification::Flat,
        Some("DARK") => Classification::Dark,
        other => Classification::UnknownCalibration {
            frame_type: other.map(str::to_string),
        },
    }
}

fn classify_science(header: &ExposureHeader) -> Classification {
    match (&header.object_name, &header.date_obs) {
        (Some(object_name), Some(date_obs)) => Classification::Science {
            object_name: object_name.clone(),
            date_obs: date_obs.clone(),
        },
        (object_name, date_obs) => {
            let mut missing = Vec::new();
            if object_name.is_none() {
                missing.push(KEY_OBJECT.to_string());
            }
            if date_obs.is_none() {
                missing.push(KEY_DATE.to_string());
            }
            Classification::IncompleteScience { missing }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(category: Option<&str>, frame_type: Option<&str>) -> ExposureHeader {
        ExposureHeader {
            binning: "2x2".to_string(),
            filter: Some("R".to_string()),
            category: category.map(str::to_string),
            frame_type: frame_type.map(str::to_string),
            mjd: None,
            exposure_time: None,
            read_speed: Some("fast".to_string()),
            date_obs: None,
            object_name: None,
        }
    }

    #[test]
    fn test_flat_variants() {
        for frame_type in ["FLAT", "FLAT,SKY", "FLAT,LAMP", "LAMPFLAT"] {
            assert_eq!(
                classify(&header(Some("CALIB"), Some(frame_type))),
                Classification::Flat,
                "{frame_type}"
            );
        }
    }

    #[test]
    fn test_dark_requires_exact_type() {
        assert_eq!(
            classify(&header(Some("CALIB"), Some("DARK"))),
            Classification::Dark
        );
        assert_eq!(
            classify(&header(Some("CALIB"), Some("DARK,LONG"))),
            Classification::UnknownCalibration {
                frame_type: Some("DARK,LONG".to_string())
            }
        );
    }

    #[test]
    fn test_calibration_without_type() {
        assert_eq!(
            classify(&header(Some("CALIB"), None)),
            Classification::UnknownCalibration { frame_type: None }
        );
    }

    #[test]
    fn test_bias_is_unknown_calibration() {
        let classification = classify(&header(Some("CALIB"), Some("BIAS")));
        assert!(!classification.is_cataloged());
        assert_eq!(
            classification,
            Classification::UnknownCalibration {
                frame_type: Some("BIAS".to_string())
            }
        );
    }

    #[test]
    fn test_complete_science() {
        let mut h = header(Some("SCIENCE"), Some("OBJECT"));
        h.object_name = Some("M42".to_string());
        h.date_obs = Some("2023-10-02".to_string());

        assert_eq!(
            classify(&h),
            Classification::Science {
                object_name: "M42".to_string(),
                date_obs: "2023-10-02".to_string(),
            }
        );
    }

    #[test]
    fn test_incomplete_science_lists_missing_keywords() {
        let mut h = header(Some("SCIENCE"), Some("OBJECT"));
        h.object_name = Some("M42".to_string());
        assert_eq!(
            classify(&h),
            Classification::IncompleteScience {
                missing: vec!["DATE".to_string()]
            }
        );

        let h = header(Some("SCIENCE"), Some("OBJECT"));
        assert_eq!(
            classify(&h),
            Classification::IncompleteScience {
                missing: vec!["OBJECT".to_string(), "DATE".to_string()]
            }
        );
    }

    #[test]
    fn test_unknown_category() {
        assert_eq!(
            classify(&header(Some("TECHNICAL"), Some("FLAT"))),
            Classification::UnknownCategory {
                category: Some("TECHNICAL".to_string())
            }
        );
        assert_eq!(
            classify(&header(None, None)),
            Classification::UnknownCategory { category: None }
        );
    }

    #[test]
    fn test_category_match_is_case_sensitive() {
        assert!(matches!(
            classify(&header(Some("calib"), Some("FLAT"))),
            Classification::UnknownCategory { .. }
        ));
    }
}
