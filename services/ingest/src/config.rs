//! Configuration management for the ingest service.
//!
//! Configuration is layered from optional files and `INGEST__`-prefixed
//! environment variables, then overridden by command line arguments.

use config::{Config, ConfigError, Environment, File};
use nightcal_storage::{ConfigValidationError, DatabaseConfig, LoggingConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration for the ingest service.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Catalog database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Directory scanning configuration
    #[serde(default)]
    pub ingest: IngestSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Directory scanning configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Directory holding raw instrument files
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Substring a file name must contain to be ingested
    #[serde(default = "default_extension_marker")]
    pub extension_marker: String,
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}
fn default_extension_marker() -> String {
    ".fits".to_string()
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            extension_marker: default_extension_marker(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Sources, later overriding earlier:
    /// 1. `config/ingest` in the working directory
    /// 2. `/etc/nightcal/ingest`
    /// 3. Environment variables (e.g. `INGEST__DATABASE__URL`)
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/ingest").required(false))
            .add_source(File::with_name("/etc/nightcal/ingest").required(false))
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.database.validate()?;

        if self.ingest.directory.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "ingest.directory".to_string(),
            ));
        }

        if self.ingest.extension_marker.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "ingest.extension_marker".to_string(),
                message: "Marker must not be empty".to_string(),
            });
        }

        Ok(())
    }
}
