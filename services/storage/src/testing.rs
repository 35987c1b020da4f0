//! Helpers shared by the catalog unit tests.

use crate::catalog_store::{CatalogStore, NewRawExposure};
use crate::config::DatabaseConfig;
use tempfile::TempDir;

/// Open a fresh catalog in a temporary directory.
///
/// The directory must outlive the store.
pub(crate) async fn temp_store() -> (CatalogStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("catalog.db").display());
    let store = CatalogStore::open(&DatabaseConfig::with_url(url))
        .await
        .unwrap();
    (store, dir)
}

/// A 2x2-binned raw exposure with the given classification fields.
pub(crate) fn raw(path: &str, category: &str, frame_type: &str) -> NewRawExposure {
    NewRawExposure {
        path: path.to_string(),
        binning: "2x2".to_string(),
        category: Some(category.to_string()),
        frame_type: Some(frame_type.to_string()),
        ..Default::default()
    }
}
