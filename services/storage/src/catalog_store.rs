use crate::config::DatabaseConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

/// Column list for reading `raw_files` rows aliased as `rf`.
pub(crate) const RAW_EXPOSURE_COLUMNS: &str = "rf.id, rf.path, rf.binning, rf.filter, \
     rf.category, rf.type AS frame_type, rf.mjd, rf.exposure_time, rf.read_speed, \
     rf.object_name, rf.date AS date_obs";

/// A cataloged raw instrument exposure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RawExposure {
    /// Row ID
    pub id: i64,
    /// Path of the instrument file, unique across the catalog
    pub path: String,
    /// Detector binning, e.g. "2x2"
    pub binning: String,
    /// Filter name
    pub filter: Option<String>,
    /// Calibration category (CALIB, SCIENCE, ...)
    pub category: Option<String>,
    /// Free-text subtype (FLAT, DARK, ...)
    pub frame_type: Option<String>,
    /// Modified Julian date of the observation
    pub mjd: Option<f64>,
    /// Exposure time in seconds
    pub exposure_time: Option<f64>,
    /// Detector read speed setting
    pub read_speed: Option<String>,
    /// Observed object
    pub object_name: Option<String>,
    /// Observation date
    pub date_obs: Option<String>,
}

/// A raw exposure about to be registered
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewRawExposure {
    pub path: String,
    pub binning: String,
    pub filter: Option<String>,
    pub category: Option<String>,
    pub frame_type: Option<String>,
    pub mjd: Option<f64>,
    pub exposure_time: Option<f64>,
    pub read_speed: Option<String>,
    pub object_name: Option<String>,
    pub date_obs: Option<String>,
}

/// A science observation awaiting or past reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ScienceObservation {
    pub id: i64,
    pub raw_file_id: i64,
    pub unique_key: String,
    pub object_name: String,
    pub date_obs: String,
}

/// A reduced science product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReducedProduct {
    pub id: i64,
    pub science_unique_key: String,
    pub reduced_path: String,
}

/// Outcome of recording a science observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScienceRecord {
    /// A new science row was created
    Inserted { id: i64, unique_key: String },
    /// Another science file already claimed this key; nothing was written
    DuplicateKey { unique_key: String },
}

/// Index row written alongside a newly registered raw exposure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposureIndex {
    /// Flat indexed on the exposure's binning, filter and read speed
    Flat,
    /// Dark indexed on the exposure's binning and read speed
    Dark,
    Science {
        object_name: String,
        date_obs: String,
    },
    /// No index row; the exposure is kept in `raw_files` only
    RawOnly,
}

/// Outcome of [`CatalogStore::catalog_exposure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogedExposure {
    /// The path was already cataloged; nothing was written
    AlreadyCataloged,
    /// A raw row (and index row, if any) was committed
    Registered {
        raw_file_id: i64,
        /// Set for [`ExposureIndex::Science`]
        science: Option<ScienceRecord>,
    },
}

/// Row counts per catalog table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CatalogStats {
    pub raw_files: i64,
    pub flats: i64,
    pub darks: i64,
    pub science: i64,
    pub reduced: i64,
}

/// Build the unique key identifying a science observation.
pub fn science_unique_key(object_name: &str, date_obs: &str) -> String {
    format!("{object_name}__{date_obs}")
}

/// Exposure catalog backed by SQLite.
///
/// Every insert is an `INSERT OR IGNORE`, so re-running an ingestion is
/// idempotent. Single-row calls autocommit; [`CatalogStore::catalog_exposure`]
/// commits a raw exposure and its index row together.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Open (creating if needed) the catalog database
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await?;

        info!(url = %config.url, "Opened exposure catalog");

        let store = Self { pool };
        if config.run_migrations {
            store.run_migrations().await?;
        }
        Ok(store)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        debug!("Running catalog migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Register a raw exposure.
    ///
    /// Returns `None` when the path is already cataloged.
    #[instrument(skip(self, record), fields(path = %record.path))]
    pub async fn register_raw_exposure(&self, record: &NewRawExposure) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        let id = insert_raw_exposure(&mut conn, record).await?;
        if id.is_some() {
            metrics::counter!("catalog.raw_files.registered").increment(1);
        }
        Ok(id)
    }

    /// Record a flat-field calibration. Duplicates are ignored.
    pub async fn record_flat(
        &self,
        raw_file_id: i64,
        binning: &str,
        filter: Option<&str>,
        read_speed: Option<&str>,
    ) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        insert_flat(&mut conn, raw_file_id, binning, filter, read_speed).await
    }

    /// Record a dark calibration. Duplicates are ignored.
    pub async fn record_dark(
        &self,
        raw_file_id: i64,
        binning: &str,
        read_speed: Option<&str>,
    ) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        insert_dark(&mut conn, raw_file_id, binning, read_speed).await
    }

    /// Record a science observation under `"{object_name}__{date_obs}"`.
    ///
    /// A key that already exists is rejected, never overwritten.
    #[instrument(skip(self))]
    pub async fn record_science(
        &self,
        raw_file_id: i64,
        object_name: &str,
        date_obs: &str,
    ) -> Result<ScienceRecord> {
        let mut conn = self.pool.acquire().await?;
        insert_science(&mut conn, raw_file_id, object_name, date_obs).await
    }

    /// Register a raw exposure and write its index row in one transaction.
    ///
    /// Either both rows are committed or neither is, so a failed index insert
    /// leaves the path uncataloged and a later ingestion retries it. Returns
    /// [`CatalogedExposure::AlreadyCataloged`] without touching the index when
    /// the path is known.
    #[instrument(skip(self, record, index), fields(path = %record.path))]
    pub async fn catalog_exposure(
        &self,
        record: &NewRawExposure,
        index: &ExposureIndex,
    ) -> Result<CatalogedExposure> {
        let mut tx = self.pool.begin().await?;

        let Some(raw_file_id) = insert_raw_exposure(&mut tx, record).await? else {
            return Ok(CatalogedExposure::AlreadyCataloged);
        };

        let science = match index {
            ExposureIndex::Flat => {
                insert_flat(
                    &mut tx,
                    raw_file_id,
                    &record.binning,
                    record.filter.as_deref(),
                    record.read_speed.as_deref(),
                )
                .await?;
                None
            }
            ExposureIndex::Dark => {
                insert_dark(&mut tx, raw_file_id, &record.binning, record.read_speed.as_deref())
                    .await?;
                None
            }
            ExposureIndex::Science {
                object_name,
                date_obs,
            } => Some(insert_science(&mut tx, raw_file_id, object_name, date_obs).await?),
            ExposureIndex::RawOnly => None,
        };

        tx.commit().await?;
        metrics::counter!("catalog.raw_files.registered").increment(1);

        Ok(CatalogedExposure::Registered {
            raw_file_id,
            science,
        })
    }

    /// Mark a science observation as reduced. Duplicates are ignored.
    pub async fn record_reduced(
        &self,
        science_unique_key: &str,
        reduced_path: &Path,
    ) -> Result<Option<i64>> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO reduced_data (science_unique_key, reduced_path) VALUES (?, ?)",
        )
        .bind(science_unique_key)
        .bind(reduced_path.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await?;

        Ok(inserted_id(result.rows_affected(), result.last_insert_rowid()))
    }

    /// Unique keys of every science observation without a reduced product
    pub async fn list_unreduced_science(&self) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            r#"
            SELECT s.unique_key
            FROM science s
            LEFT JOIN reduced_data r ON s.unique_key = r.science_unique_key
            WHERE r.id IS NULL
            ORDER BY s.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    /// Look up a raw exposure by path
    pub async fn raw_exposure_by_path(&self, path: &str) -> Result<Option<RawExposure>> {
        let sql = format!("SELECT {RAW_EXPOSURE_COLUMNS} FROM raw_files rf WHERE rf.path = ?");
        let exposure = sqlx::query_as::<_, RawExposure>(&sql)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        Ok(exposure)
    }

    /// Look up a science observation by unique key
    pub async fn science_observation(&self, unique_key: &str) -> Result<Option<ScienceObservation>> {
        let observation = sqlx::query_as::<_, ScienceObservation>(
            r#"
            SELECT id, raw_file_id, unique_key, object_name, date AS date_obs
            FROM science
            WHERE unique_key = ?
            "#,
        )
        .bind(unique_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(observation)
    }

    /// Look up the reduced product of a science observation
    pub async fn reduced_product(&self, science_unique_key: &str) -> Result<Option<ReducedProduct>> {
        let product = sqlx::query_as::<_, ReducedProduct>(
            "SELECT id, science_unique_key, reduced_path FROM reduced_data WHERE science_unique_key = ?",
        )
        .bind(science_unique_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Get catalog statistics
    pub async fn stats(&self) -> Result<CatalogStats> {
        let stats = sqlx::query_as::<_, CatalogStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM raw_files) AS raw_files,
                (SELECT COUNT(*) FROM flats) AS flats,
                (SELECT COUNT(*) FROM darks) AS darks,
                (SELECT COUNT(*) FROM science) AS science,
                (SELECT COUNT(*) FROM reduced_data) AS reduced
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn inserted_id(rows_affected: u64, last_insert_rowid: i64) -> Option<i64> {
    (rows_affected > 0).then_some(last_insert_rowid)
}

async fn insert_raw_exposure(
    conn: &mut SqliteConnection,
    record: &NewRawExposure,
) -> Result<Option<i64>> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO raw_files (
            path, binning, filter, category, type,
            mjd, exposure_time, read_speed, object_name, date
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.path)
    .bind(&record.binning)
    .bind(&record.filter)
    .bind(&record.category)
    .bind(&record.frame_type)
    .bind(record.mjd)
    .bind(record.exposure_time)
    .bind(&record.read_speed)
    .bind(&record.object_name)
    .bind(&record.date_obs)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        debug!(path = %record.path, "Raw exposure already cataloged");
        return Ok(None);
    }

    Ok(Some(result.last_insert_rowid()))
}

async fn insert_flat(
    conn: &mut SqliteConnection,
    raw_file_id: i64,
    binning: &str,
    filter: Option<&str>,
    read_speed: Option<&str>,
) -> Result<Option<i64>> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO flats (raw_file_id, binning, filter, read_speed) VALUES (?, ?, ?, ?)",
    )
    .bind(raw_file_id)
    .bind(binning)
    .bind(filter)
    .bind(read_speed)
    .execute(&mut *conn)
    .await?;

    Ok(inserted_id(result.rows_affected(), result.last_insert_rowid()))
}

async fn insert_dark(
    conn: &mut SqliteConnection,
    raw_file_id: i64,
    binning: &str,
    read_speed: Option<&str>,
) -> Result<Option<i64>> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO darks (raw_file_id, binning, read_speed) VALUES (?, ?, ?)",
    )
    .bind(raw_file_id)
    .bind(binning)
    .bind(read_speed)
    .execute(&mut *conn)
    .await?;

    Ok(inserted_id(result.rows_affected(), result.last_insert_rowid()))
}

async fn insert_science(
    conn: &mut SqliteConnection,
    raw_file_id: i64,
    object_name: &str,
    date_obs: &str,
) -> Result<ScienceRecord> {
    let unique_key = science_unique_key(object_name, date_obs);

    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO science (raw_file_id, unique_key, object_name, date)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(raw_file_id)
    .bind(&unique_key)
    .bind(object_name)
    .bind(date_obs)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        warn!(unique_key = %unique_key, "Science entry already exists");
        metrics::counter!("catalog.science.duplicates").increment(1);
        return Ok(ScienceRecord::DuplicateKey { unique_key });
    }

    Ok(ScienceRecord::Inserted {
        id: result.last_insert_rowid(),
        unique_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use crate::testing::{raw, temp_store};

    #[test]
    fn test_science_unique_key_format() {
        assert_eq!(
            science_unique_key("NGC 1365", "2023-10-02T03:14:15"),
            "NGC 1365__2023-10-02T03:14:15"
        );
    }

    #[tokio::test]
    async fn test_register_same_path_twice_is_noop() {
        let (store, _dir) = temp_store().await;
        let record = raw("/data/flat_001.fits", "CALIB", "FLAT,SKY");

        let first = store.register_raw_exposure(&record).await.unwrap();
        let second = store.register_raw_exposure(&record).await.unwrap();

        assert!(first.is_some());
        assert_eq!(second, None);
        assert_eq!(store.stats().await.unwrap().raw_files, 1);
    }

    #[tokio::test]
    async fn test_registered_exposure_is_readable_by_path() {
        let (store, _dir) = temp_store().await;
        let mut record = raw("/data/sci_001.fits", "SCIENCE", "OBJECT");
        record.mjd = Some(60219.134);
        record.exposure_time = Some(120.0);
        record.object_name = Some("NGC 1365".to_string());

        let id = store.register_raw_exposure(&record).await.unwrap().unwrap();
        let stored = store
            .raw_exposure_by_path("/data/sci_001.fits")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.binning, "2x2");
        assert_eq!(stored.frame_type.as_deref(), Some("OBJECT"));
        assert_eq!(stored.mjd, Some(60219.134));
        assert_eq!(stored.object_name.as_deref(), Some("NGC 1365"));
        assert_eq!(stored.date_obs, None);
    }

    #[tokio::test]
    async fn test_duplicate_flat_and_dark_are_ignored() {
        let (store, _dir) = temp_store().await;
        let flat_id = store
            .register_raw_exposure(&raw("/data/flat.fits", "CALIB", "FLAT"))
            .await
            .unwrap()
            .unwrap();
        let dark_id = store
            .register_raw_exposure(&raw("/data/dark.fits", "CALIB", "DARK"))
            .await
            .unwrap()
            .unwrap();

        assert!(store
            .record_flat(flat_id, "2x2", Some("R"), Some("fast"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            store
                .record_flat(flat_id, "2x2", Some("R"), Some("fast"))
                .await
                .unwrap(),
            None
        );
        assert!(store
            .record_dark(dark_id, "2x2", Some("fast"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            store.record_dark(dark_id, "2x2", Some("fast")).await.unwrap(),
            None
        );

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.flats, 1);
        assert_eq!(stats.darks, 1);
    }

    #[tokio::test]
    async fn test_duplicate_science_key_keeps_first() {
        let (store, _dir) = temp_store().await;
        let first_raw = store
            .register_raw_exposure(&raw("/data/sci_a.fits", "SCIENCE", "OBJECT"))
            .await
            .unwrap()
            .unwrap();
        let second_raw = store
            .register_raw_exposure(&raw("/data/sci_b.fits", "SCIENCE", "OBJECT"))
            .await
            .unwrap()
            .unwrap();

        let first = store
            .record_science(first_raw, "M42", "2023-10-02")
            .await
            .unwrap();
        let second = store
            .record_science(second_raw, "M42", "2023-10-02")
            .await
            .unwrap();

        assert!(matches!(first, ScienceRecord::Inserted { ref unique_key, .. } if unique_key == "M42__2023-10-02"));
        assert_eq!(
            second,
            ScienceRecord::DuplicateKey {
                unique_key: "M42__2023-10-02".to_string()
            }
        );

        let observation = store
            .science_observation("M42__2023-10-02")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(observation.raw_file_id, first_raw);
        assert_eq!(store.stats().await.unwrap().science, 1);
    }

    #[tokio::test]
    async fn test_unreduced_science_excludes_reduced_keys() {
        let (store, _dir) = temp_store().await;
        for (path, object) in [
            ("/data/sci_1.fits", "M31"),
            ("/data/sci_2.fits", "M33"),
            ("/data/sci_3.fits", "M42"),
        ] {
            let id = store
                .register_raw_exposure(&raw(path, "SCIENCE", "OBJECT"))
                .await
                .unwrap()
                .unwrap();
            store.record_science(id, object, "2023-10-02").await.unwrap();
        }

        store
            .record_reduced("M33__2023-10-02", Path::new("/out/M33.fits"))
            .await
            .unwrap();

        let pending = store.list_unreduced_science().await.unwrap();
        assert_eq!(pending, vec!["M31__2023-10-02", "M42__2023-10-02"]);
    }

    #[tokio::test]
    async fn test_record_reduced_is_idempotent() {
        let (store, _dir) = temp_store().await;
        let id = store
            .register_raw_exposure(&raw("/data/sci.fits", "SCIENCE", "OBJECT"))
            .await
            .unwrap()
            .unwrap();
        store.record_science(id, "M31", "2023-10-02").await.unwrap();

        let out = Path::new("/out/M31.fits");
        assert!(store
            .record_reduced("M31__2023-10-02", out)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            store.record_reduced("M31__2023-10-02", out).await.unwrap(),
            None
        );

        let product = store.reduced_product("M31__2023-10-02").await.unwrap().unwrap();
        assert_eq!(product.reduced_path, "/out/M31.fits");
        assert!(store.list_unreduced_science().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reduced_for_unknown_science_is_rejected() {
        let (store, _dir) = temp_store().await;
        let result = store
            .record_reduced("nothing__here", Path::new("/out/none.fits"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_catalog_exposure_commits_raw_and_index_rows() {
        let (store, _dir) = temp_store().await;
        let mut flat = raw("/data/flat.fits", "CALIB", "FLAT");
        flat.filter = Some("R".to_string());
        flat.read_speed = Some("fast".to_string());

        let outcome = store
            .catalog_exposure(&flat, &ExposureIndex::Flat)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CatalogedExposure::Registered { science: None, .. }
        ));

        let science = store
            .catalog_exposure(
                &raw("/data/sci.fits", "SCIENCE", "OBJECT"),
                &ExposureIndex::Science {
                    object_name: "M42".to_string(),
                    date_obs: "2023-10-02".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            science,
            CatalogedExposure::Registered {
                science: Some(ScienceRecord::Inserted { .. }),
                ..
            }
        ));

        assert_eq!(
            store.catalog_exposure(&flat, &ExposureIndex::Flat).await.unwrap(),
            CatalogedExposure::AlreadyCataloged
        );

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.raw_files, stats.flats, stats.science), (2, 1, 1));
    }

    #[tokio::test]
    async fn test_failed_index_insert_rolls_back_raw_row() {
        let (store, _dir) = temp_store().await;
        let record = raw("/data/dark.fits", "CALIB", "DARK");

        sqlx::query("ALTER TABLE darks RENAME TO darks_offline")
            .execute(store.pool())
            .await
            .unwrap();
        let result = store.catalog_exposure(&record, &ExposureIndex::Dark).await;
        assert!(matches!(result, Err(CatalogError::Database(_))));
        assert_eq!(store.raw_exposure_by_path("/data/dark.fits").await.unwrap(), None);

        sqlx::query("ALTER TABLE darks_offline RENAME TO darks")
            .execute(store.pool())
            .await
            .unwrap();
        let retried = store
            .catalog_exposure(&record, &ExposureIndex::Dark)
            .await
            .unwrap();
        assert!(matches!(retried, CatalogedExposure::Registered { .. }));

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.raw_files, stats.darks), (1, 1));
    }

    #[tokio::test]
    async fn test_reduced_path_claimed_by_another_key_is_not_recorded() {
        let (store, _dir) = temp_store().await;
        for (path, object) in [("/data/sci_1.fits", "M 31"), ("/data/sci_2.fits", "M_31")] {
            let id = store
                .register_raw_exposure(&raw(path, "SCIENCE", "OBJECT"))
                .await
                .unwrap()
                .unwrap();
            store.record_science(id, object, "2023-10-02").await.unwrap();
        }

        let out = Path::new("/out/shared.fits");
        assert!(store
            .record_reduced("M 31__2023-10-02", out)
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            store.record_reduced("M_31__2023-10-02", out).await.unwrap(),
            None
        );
        assert_eq!(
            store.list_unreduced_science().await.unwrap(),
            vec!["M_31__2023-10-02"]
        );
    }
}
