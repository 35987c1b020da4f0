use thiserror::Error;

/// Errors raised by the exposure catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("No science exposure with unique key {0}")]
    ScienceNotFound(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
