//! Calibration matching for science exposures.
//!
//! Flats match a science exposure on binning, read speed and filter; darks on
//! binning and read speed only. Equality is strict: there is no nearest-epoch
//! fallback and no relaxation of any key. A `NULL` attribute never matches,
//! following SQL equality.

use crate::catalog_store::{CatalogStore, RawExposure, RAW_EXPOSURE_COLUMNS};
use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Acquisition parameters a calibration frame must share with a science frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSetup {
    pub binning: String,
    pub read_speed: Option<String>,
    pub filter: Option<String>,
}

/// A science exposure together with its matching calibration frames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSet {
    /// Unique key of the science observation
    pub unique_key: String,
    /// Path of the raw science file
    pub science_path: String,
    /// Acquisition parameters used for matching
    pub setup: InstrumentSetup,
    /// Flats matching on binning, read speed and filter
    pub flats: Vec<RawExposure>,
    /// Darks matching on binning and read speed
    pub darks: Vec<RawExposure>,
}

impl CalibrationSet {
    pub fn flat_paths(&self) -> Vec<PathBuf> {
        self.flats.iter().map(|f| PathBuf::from(&f.path)).collect()
    }

    pub fn dark_paths(&self) -> Vec<PathBuf> {
        self.darks.iter().map(|d| PathBuf::from(&d.path)).collect()
    }
}

#[derive(FromRow)]
struct ScienceSetupRow {
    path: String,
    binning: String,
    read_speed: Option<String>,
    filter: Option<String>,
}

impl CatalogStore {
    /// Resolve the raw path and acquisition parameters of a science observation
    pub async fn science_setup(&self, unique_key: &str) -> Result<(String, InstrumentSetup)> {
        let row = sqlx::query_as::<_, ScienceSetupRow>(
            r#"
            SELECT rf.path, rf.binning, rf.read_speed, rf.filter
            FROM science s
            JOIN raw_files rf ON s.raw_file_id = rf.id
            WHERE s.unique_key = ?
            "#,
        )
        .bind(unique_key)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| CatalogError::ScienceNotFound(unique_key.to_string()))?;

        let setup = InstrumentSetup {
            binning: row.binning,
            read_speed: row.read_speed,
            filter: row.filter,
        };
        Ok((row.path, setup))
    }

    /// Flats whose binning, read speed and filter all equal the setup's
    pub async fn matching_flats(&self, setup: &InstrumentSetup) -> Result<Vec<RawExposure>> {
        let sql = format!(
            r#"
            SELECT {RAW_EXPOSURE_COLUMNS}
            FROM flats f
            JOIN raw_files rf ON f.raw_file_id = rf.id
            WHERE f.binning = ?
              AND f.read_speed = ?
              AND f.filter = ?
            ORDER BY rf.id
            "#
        );

        let flats = sqlx::query_as::<_, RawExposure>(&sql)
            .bind(&setup.binning)
            .bind(&setup.read_speed)
            .bind(&setup.filter)
            .fetch_all(self.pool())
            .await?;

        Ok(flats)
    }

    /// Darks whose binning and read speed equal the setup's
    pub async fn matching_darks(&self, setup: &InstrumentSetup) -> Result<Vec<RawExposure>> {
        let sql = format!(
            r#"
            SELECT {RAW_EXPOSURE_COLUMNS}
            FROM darks d
            JOIN raw_files rf ON d.raw_file_id = rf.id
            WHERE d.binning = ?
              AND d.read_speed = ?
            ORDER BY rf.id
            "#
        );

        let darks = sqlx::query_as::<_, RawExposure>(&sql)
            .bind(&setup.binning)
            .bind(&setup.read_speed)
            .fetch_all(self.pool())
            .await?;

        Ok(darks)
    }

    /// Resolve a science observation to its raw file and matching calibrations.
    ///
    /// Empty flat or dark sets are returned as-is; the caller decides whether
    /// a reduction can proceed. Fails with [`CatalogError::ScienceNotFound`]
    /// for an unknown key.
    #[instrument(skip(self))]
    pub async fn resolve_science_files(&self, unique_key: &str) -> Result<CalibrationSet> {
        let (science_path, setup) = self.science_setup(unique_key).await?;
        let flats = self.matching_flats(&setup).await?;
        let darks = self.matching_darks(&setup).await?;

        debug!(
            flats = flats.len(),
            darks = darks.len(),
            binning = %setup.binning,
            "Resolved calibration set"
        );

        Ok(CalibrationSet {
            unique_key: unique_key.to_string(),
            science_path,
            setup,
            flats,
            darks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::NewRawExposure;
    use crate::testing::temp_store;

    fn exposure(
        path: &str,
        frame_type: &str,
        binning: &str,
        read_speed: &str,
        filter: &str,
    ) -> NewRawExposure {
        NewRawExposure {
            path: path.to_string(),
            binning: binning.to_string(),
            filter: Some(filter.to_string()),
            category: Some(if frame_type == "OBJECT" { "SCIENCE" } else { "CALIB" }.to_string()),
            frame_type: Some(frame_type.to_string()),
            read_speed: Some(read_speed.to_string()),
            ..Default::default()
        }
    }

    async fn add_flat(store: &CatalogStore, path: &str, binning: &str, speed: &str, filter: &str) {
        let id = store
            .register_raw_exposure(&exposure(path, "FLAT", binning, speed, filter))
            .await
            .unwrap()
            .unwrap();
        store
            .record_flat(id, binning, Some(filter), Some(speed))
            .await
            .unwrap();
    }

    async fn add_dark(store: &CatalogStore, path: &str, binning: &str, speed: &str) {
        let id = store
            .register_raw_exposure(&exposure(path, "DARK", binning, speed, "OPEN"))
            .await
            .unwrap()
            .unwrap();
        store.record_dark(id, binning, Some(speed)).await.unwrap();
    }

    async fn add_science(store: &CatalogStore, path: &str, binning: &str, speed: &str, filter: &str) {
        let id = store
            .register_raw_exposure(&exposure(path, "OBJECT", binning, speed, filter))
            .await
            .unwrap()
            .unwrap();
        store.record_science(id, "M42", "2023-10-02").await.unwrap();
    }

    #[tokio::test]
    async fn test_only_exact_matches_are_returned() {
        let (store, _dir) = temp_store().await;
        add_science(&store, "/data/sci.fits", "2x2", "fast", "R").await;

        add_flat(&store, "/data/flat_match_1.fits", "2x2", "fast", "R").await;
        add_flat(&store, "/data/flat_match_2.fits", "2x2", "fast", "R").await;
        add_flat(&store, "/data/flat_bin.fits", "1x1", "fast", "R").await;
        add_flat(&store, "/data/flat_speed.fits", "2x2", "slow", "R").await;
        add_flat(&store, "/data/flat_filter.fits", "2x2", "fast", "V").await;

        add_dark(&store, "/data/dark_match.fits", "2x2", "fast").await;
        add_dark(&store, "/data/dark_bin.fits", "1x1", "fast").await;
        add_dark(&store, "/data/dark_speed.fits", "2x2", "slow").await;

        let set = store.resolve_science_files("M42__2023-10-02").await.unwrap();

        assert_eq!(set.science_path, "/data/sci.fits");
        assert_eq!(
            set.setup,
            InstrumentSetup {
                binning: "2x2".to_string(),
                read_speed: Some("fast".to_string()),
                filter: Some("R".to_string()),
            }
        );
        let flat_paths: Vec<_> = set.flats.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(flat_paths, vec!["/data/flat_match_1.fits", "/data/flat_match_2.fits"]);
        let dark_paths: Vec<_> = set.darks.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(dark_paths, vec!["/data/dark_match.fits"]);
    }

    #[tokio::test]
    async fn test_darks_ignore_filter() {
        let (store, _dir) = temp_store().await;
        add_science(&store, "/data/sci.fits", "2x2", "fast", "Halpha").await;
        add_dark(&store, "/data/dark.fits", "2x2", "fast").await;

        let set = store.resolve_science_files("M42__2023-10-02").await.unwrap();
        assert_eq!(set.darks.len(), 1);
        assert_eq!(set.darks[0].filter.as_deref(), Some("OPEN"));
        assert!(set.flats.is_empty());
    }

    #[tokio::test]
    async fn test_empty_calibration_sets_are_valid() {
        let (store, _dir) = temp_store().await;
        add_science(&store, "/data/sci.fits", "2x2", "fast", "R").await;

        let set = store.resolve_science_files("M42__2023-10-02").await.unwrap();
        assert!(set.flats.is_empty());
        assert!(set.darks.is_empty());
        assert!(set.flat_paths().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_found() {
        let (store, _dir) = temp_store().await;

        let err = store.resolve_science_files("missing__key").await.unwrap_err();
        assert!(matches!(err, CatalogError::ScienceNotFound(ref key) if key == "missing__key"));
    }

    #[tokio::test]
    async fn test_missing_read_speed_never_matches() {
        let (store, _dir) = temp_store().await;
        let mut science = exposure("/data/sci.fits", "OBJECT", "2x2", "fast", "R");
        science.read_speed = None;
        let id = store.register_raw_exposure(&science).await.unwrap().unwrap();
        store.record_science(id, "M42", "2023-10-02").await.unwrap();

        let dark_id = store
            .register_raw_exposure(&exposure("/data/dark.fits", "DARK", "2x2", "fast", "OPEN"))
            .await
            .unwrap()
            .unwrap();
        store.record_dark(dark_id, "2x2", None).await.unwrap();

        let set = store.resolve_science_files("M42__2023-10-02").await.unwrap();
        assert!(set.darks.is_empty());
    }
}
