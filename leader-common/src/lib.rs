//! Leader Common - shared configuration, errors, and logging for the
//! leader screener.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Config loading errors
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{Config, ObservabilityConfig, ScheduleConfig, StorageConfig};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
