//! Configuration validation.
//!
//! Each configuration section implements [`Validate`]; the root collects all
//! failures so an operator sees every problem in one pass.

use std::str::FromStr;
use thiserror::Error;

use crate::config::{Config, ObservabilityConfig, ScheduleConfig, StorageConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

/// Collapse a list of section errors into one result.
pub fn collect_errors(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let errors = [
            self.observability.validate(),
            self.storage.validate(),
            self.schedule.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        collect_errors(errors)
    }
}

impl Config {
    /// Load and validate configuration.
    pub fn load_and_validate(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        let config = Self::load_with_env(path)?;
        config.validate().map_err(|e| crate::error::Error::Config(e.to_string()))?;
        Ok(config)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        // Full EnvFilter directives are accepted as long as the base level is known
        let base = self.log_level.split(',').next().unwrap_or_default();
        if !valid_levels.contains(&base.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of {:?}", valid_levels),
            });
        }

        if !["json", "pretty"].contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: "must be \"json\" or \"pretty\"".into(),
            });
        }

        Ok(())
    }
}

impl Validate for StorageConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.data_dir.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "storage.data_dir".into(),
            });
        }
        if self.snapshot_dir.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "storage.snapshot_dir".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ScheduleConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.enabled {
            return Ok(());
        }
        cron::Schedule::from_str(&self.run_cron)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidValue {
                field: "schedule.run_cron".into(),
                reason: e.to_string(),
            })
    }
}
