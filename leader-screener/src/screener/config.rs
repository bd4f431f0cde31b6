//! Pipeline configuration.
//!
//! Every threshold a run depends on lives here, versioned, and is passed into
//! the stages explicitly. The block is read from the `pipeline` section of the
//! shared config file.

use leader_common::validation::{collect_errors, Validate, ValidationError, ValidationResult};
use leader_common::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::profile::{default_profiles, ProfileKind, ScreenerProfile};
use crate::error::{Result, ScreenerError};
use crate::financial::FinancialThresholds;
use crate::indicators::IndicatorConfig;
use crate::pattern::PatternConfig;
use crate::ranking::TopsisConfig;

/// Configuration schema version this build understands.
pub const CONFIG_VERSION: &str = "2";

// ============================================================================
// Pipeline Configuration
// ============================================================================

/// Stage thresholds and execution limits for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub indicators: IndicatorConfig,

    #[serde(default)]
    pub patterns: PatternConfig,

    #[serde(default)]
    pub financial: FinancialThresholds,

    #[serde(default)]
    pub topsis: TopsisConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default = "default_profiles")]
    pub profiles: Vec<ScreenerProfile>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            calendar: CalendarConfig::default(),
            indicators: IndicatorConfig::default(),
            patterns: PatternConfig::default(),
            financial: FinancialThresholds::default(),
            topsis: TopsisConfig::default(),
            execution: ExecutionConfig::default(),
            profiles: default_profiles(),
        }
    }
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl PipelineConfig {
    /// Read the `pipeline` section; an absent section means defaults.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.pipeline.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(config.pipeline.clone())
            .map_err(|e| ScreenerError::InvalidConfig(format!("pipeline: {}", e)))
    }

    /// [`Self::from_config`] followed by validation.
    pub fn load(config: &Config) -> Result<Self> {
        let pipeline = Self::from_config(config)?;
        pipeline
            .validate()
            .map_err(|e| ScreenerError::InvalidConfig(e.to_string()))?;
        Ok(pipeline)
    }

    pub fn profile(&self, name: &str) -> Option<&ScreenerProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Short description for logs and reports.
    pub fn summary(&self) -> String {
        format!(
            "v{} min_history={} detection={} top_n={} profiles={}",
            self.version,
            self.indicators.min_history,
            self.patterns.detection_threshold,
            self.topsis.top_n,
            self.profiles.len()
        )
    }
}

// ============================================================================
// Calendar & Execution
// ============================================================================

/// Calendar alignment rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Longest run of missing sessions that is forward-filled
    #[serde(default = "default_max_fill_gap")]
    pub max_fill_gap: usize,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            max_fill_gap: default_max_fill_gap(),
        }
    }
}

fn default_max_fill_gap() -> usize {
    5
}

/// Worker pool and publication limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Tickers per chunk; cancellation is checked between chunks
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Worker threads; defaults to the CPU count
    #[serde(default)]
    pub workers: Option<usize>,

    /// Published runs kept on disk, the latest included
    #[serde(default = "default_retain_runs")]
    pub retain_runs: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: None,
            retain_runs: default_retain_runs(),
        }
    }
}

impl ExecutionConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

fn default_chunk_size() -> usize {
    256
}

fn default_retain_runs() -> usize {
    2
}

// ============================================================================
// Validation
// ============================================================================

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

impl Validate for PipelineConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.version != CONFIG_VERSION {
            errors.push(invalid(
                "pipeline.version",
                format!("unsupported version '{}', expected '{}'", self.version, CONFIG_VERSION),
            ));
        }

        let ind = &self.indicators;
        if ind.min_history == 0 {
            errors.push(invalid("pipeline.indicators.min_history", "must be positive"));
        }
        if !(ind.rs_scale.is_finite() && ind.rs_scale > 0.0) {
            errors.push(invalid("pipeline.indicators.rs_scale", "must be positive"));
        }
        let windows = [
            ("rs_new_high_lookback", ind.rs_new_high_lookback),
            ("rs_rank_lookback", ind.rs_rank_lookback),
            ("high_low_lookback", ind.high_low_lookback),
            ("trend_lookback", ind.trend_lookback),
            ("volume_avg_weeks", ind.volume_avg_weeks),
            ("obv_window", ind.obv_window),
            ("momentum_period", ind.momentum_period),
        ];
        for (name, value) in windows {
            if value == 0 {
                errors.push(invalid(&format!("pipeline.indicators.{}", name), "must be positive"));
            }
        }

        errors.extend(self.patterns.validate().err());
        errors.extend(self.topsis.validate().err());

        if self.execution.chunk_size == 0 {
            errors.push(invalid("pipeline.execution.chunk_size", "must be positive"));
        }
        if self.execution.workers == Some(0) {
            errors.push(invalid("pipeline.execution.workers", "must be positive"));
        }
        if self.execution.retain_runs == 0 {
            errors.push(invalid(
                "pipeline.execution.retain_runs",
                "must keep at least the latest run",
            ));
        }

        errors.extend(validate_profiles(&self.profiles).err());

        collect_errors(errors)
    }
}

impl Validate for PatternConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        if !(0.6..=1.0).contains(&self.detection_threshold) {
            errors.push(invalid(
                "pipeline.patterns.detection_threshold",
                "must be within [0.6, 1.0]",
            ));
        }
        if !self.vcp_weights.is_valid() {
            errors.push(invalid(
                "pipeline.patterns.vcp_weights",
                "must be non-negative and sum to 1",
            ));
        }
        if !self.cup_weights.is_valid() {
            errors.push(invalid(
                "pipeline.patterns.cup_weights",
                "must be non-negative and sum to 1",
            ));
        }
        if self.vcp_segments < 2 || self.vcp_base_bars < self.vcp_segments * 2 {
            errors.push(invalid(
                "pipeline.patterns.vcp_segments",
                "need at least 2 segments of 2 bars in the base",
            ));
        }
        if self.cup_min_bars == 0 || self.cup_min_bars >= self.cup_max_bars {
            errors.push(invalid(
                "pipeline.patterns.cup_min_bars",
                "must be positive and below cup_max_bars",
            ));
        }
        if !(self.cup_min_depth > 0.0 && self.cup_min_depth < self.cup_max_depth) {
            errors.push(invalid(
                "pipeline.patterns.cup_min_depth",
                "must be positive and below cup_max_depth",
            ));
        }
        if self.handle_min_bars == 0 || self.handle_min_bars > self.handle_max_bars {
            errors.push(invalid(
                "pipeline.patterns.handle_min_bars",
                "must be positive and at most handle_max_bars",
            ));
        }
        collect_errors(errors)
    }
}

impl Validate for TopsisConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        if self.criteria.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "pipeline.topsis.criteria".into(),
            });
        }
        if self.criteria.iter().any(|c| !c.weight.is_finite() || c.weight < 0.0) {
            errors.push(invalid("pipeline.topsis.criteria", "weights must be non-negative"));
        }
        if !self.criteria.is_empty() && self.criteria.iter().map(|c| c.weight).sum::<f64>() <= 0.0 {
            errors.push(invalid("pipeline.topsis.criteria", "weights must not all be zero"));
        }
        let keys: BTreeSet<_> = self.criteria.iter().map(|c| c.key).collect();
        if keys.len() != self.criteria.len() {
            errors.push(invalid("pipeline.topsis.criteria", "duplicate criterion"));
        }
        if self.top_n == 0 {
            errors.push(invalid("pipeline.topsis.top_n", "must be positive"));
        }
        collect_errors(errors)
    }
}

fn validate_profiles(profiles: &[ScreenerProfile]) -> ValidationResult<()> {
    let mut errors = Vec::new();
    if profiles.is_empty() {
        errors.push(ValidationError::MissingField {
            field: "pipeline.profiles".into(),
        });
    }

    let mut seen = BTreeSet::new();
    for profile in profiles {
        // Names become file names in the snapshot
        let valid_name = !profile.name.is_empty()
            && profile
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid_name {
            errors.push(invalid(
                "pipeline.profiles.name",
                format!("invalid name '{}'", profile.name),
            ));
        }
        if !seen.insert(profile.name.as_str()) {
            errors.push(invalid(
                "pipeline.profiles.name",
                format!("duplicate name '{}'", profile.name),
            ));
        }
        if profile.kind == ProfileKind::Rules && profile.rules.is_empty() {
            errors.push(invalid(
                "pipeline.profiles.rules",
                format!("profile '{}' has no rules", profile.name),
            ));
        }
    }
    if profiles.iter().filter(|p| p.kind == ProfileKind::Leaders).count() > 1 {
        errors.push(invalid("pipeline.profiles.kind", "at most one leaders profile"));
    }
    collect_errors(errors)
}
