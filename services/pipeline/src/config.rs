//! Configuration for the reduction pipeline.
//!
//! Layered from optional files and `PIPELINE__`-prefixed environment
//! variables, e.g. `PIPELINE__REDUCTION__OUTPUT_DIR=/data/reduced`.

use config::{Config, ConfigError, Environment, File};
use nightcal_storage::{ConfigValidationError, DatabaseConfig, LoggingConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// Longest string value a FITS header card can hold
const MAX_CARD_STRING: usize = 68;

/// Main configuration for the pipeline service
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Catalog database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Reduction output configuration
    #[serde(default)]
    pub reduction: ReductionSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reduction output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReductionSettings {
    /// Directory receiving reduced products
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Value stamped into the REDUC keyword of reduced products
    #[serde(default = "default_provenance_tag")]
    pub provenance_tag: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reduced")
}

fn default_provenance_tag() -> String {
    crate::reduction::DEFAULT_PROVENANCE_TAG.to_string()
}

impl Default for ReductionSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            provenance_tag: default_provenance_tag(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/pipeline").required(false))
            .add_source(File::with_name("/etc/nightcal/pipeline").required(false))
            .add_source(
                Environment::with_prefix("PIPELINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.database.validate()?;
        self.reduction.validate()
    }
}

impl ReductionSettings {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "reduction.output_dir".to_string(),
            ));
        }

        if self.provenance_tag.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "reduction.provenance_tag".to_string(),
            ));
        }
        if self.provenance_tag.len() > MAX_CARD_STRING || !self.provenance_tag.is_ascii() {
            return Err(ConfigValidationError::InvalidValue {
                field: "reduction.provenance_tag".to_string(),
                message: format!("Tag must be ASCII and at most {MAX_CARD_STRING} characters"),
            });
        }

        Ok(())
    }
}
