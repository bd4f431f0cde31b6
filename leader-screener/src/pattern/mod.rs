//! Chart-pattern detection.
//!
//! Every [`PatternKind`] scores the same four dimensions; the confidence is a
//! fixed-weight blend of them, bucketed once into a [`ConfidenceLevel`] when
//! the [`PatternResult`] is built. Low-confidence results are kept so a
//! consumer can see why a ticker did not qualify.

mod cup_handle;
mod vcp;

use leader_common::util::round_to;
use serde::{Deserialize, Serialize};

use crate::data::PriceSeries;
use crate::indicators::{IndicatorSet, TrendTemplate};

// ============================================================================
// Pattern Kinds
// ============================================================================

/// Supported chart patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    /// Volatility contraction pattern
    #[serde(rename = "vcp")]
    VolatilityContraction,
    #[serde(rename = "cup_with_handle")]
    CupWithHandle,
}

impl PatternKind {
    pub const ALL: [PatternKind; 2] = [Self::VolatilityContraction, Self::CupWithHandle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VolatilityContraction => "vcp",
            Self::CupWithHandle => "cup_with_handle",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Confidence
// ============================================================================

/// Bucketed confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub const HIGH_MIN: f64 = 0.8;
    pub const MEDIUM_MIN: f64 = 0.6;

    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= Self::HIGH_MIN {
            Self::High
        } else if confidence >= Self::MEDIUM_MIN {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// The four sub-scores every pattern computes, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionalScores {
    pub technical_quality: f64,
    pub volume_confirmation: f64,
    pub temporal_validity: f64,
    pub market_context: f64,
}

impl DimensionalScores {
    pub fn new(technical: f64, volume: f64, temporal: f64, market: f64) -> Self {
        Self {
            technical_quality: clamp_unit(technical),
            volume_confirmation: clamp_unit(volume),
            temporal_validity: clamp_unit(temporal),
            market_context: clamp_unit(market),
        }
    }

    /// Same score on every dimension.
    pub fn uniform(score: f64) -> Self {
        Self::new(score, score, score, score)
    }
}

/// Per-kind weights over the four dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionWeights {
    pub technical_quality: f64,
    pub volume_confirmation: f64,
    pub temporal_validity: f64,
    pub market_context: f64,
}

impl DimensionWeights {
    pub fn sum(&self) -> f64 {
        self.technical_quality
            + self.volume_confirmation
            + self.temporal_validity
            + self.market_context
    }

    pub fn is_valid(&self) -> bool {
        let parts = [
            self.technical_quality,
            self.volume_confirmation,
            self.temporal_validity,
            self.market_context,
        ];
        parts.iter().all(|w| w.is_finite() && *w >= 0.0) && (self.sum() - 1.0).abs() < 1e-9
    }

    fn combine(&self, s: &DimensionalScores) -> f64 {
        self.technical_quality * s.technical_quality
            + self.volume_confirmation * s.volume_confirmation
            + self.temporal_validity * s.temporal_validity
            + self.market_context * s.market_context
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Pattern weights, detection threshold, and geometry limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f64,

    #[serde(default = "default_vcp_weights")]
    pub vcp_weights: DimensionWeights,

    #[serde(default = "default_cup_weights")]
    pub cup_weights: DimensionWeights,

    /// Bars in the contraction base
    #[serde(default = "default_vcp_base_bars")]
    pub vcp_base_bars: usize,

    #[serde(default = "default_vcp_segments")]
    pub vcp_segments: usize,

    #[serde(default = "default_cup_min_bars")]
    pub cup_min_bars: usize,

    #[serde(default = "default_cup_max_bars")]
    pub cup_max_bars: usize,

    /// Cup depth band in percent
    #[serde(default = "default_cup_min_depth")]
    pub cup_min_depth: f64,

    #[serde(default = "default_cup_max_depth")]
    pub cup_max_depth: f64,

    #[serde(default = "default_handle_max_depth")]
    pub handle_max_depth: f64,

    #[serde(default = "default_handle_min_bars")]
    pub handle_min_bars: usize,

    #[serde(default = "default_handle_max_bars")]
    pub handle_max_bars: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            detection_threshold: default_detection_threshold(),
            vcp_weights: default_vcp_weights(),
            cup_weights: default_cup_weights(),
            vcp_base_bars: default_vcp_base_bars(),
            vcp_segments: default_vcp_segments(),
            cup_min_bars: default_cup_min_bars(),
            cup_max_bars: default_cup_max_bars(),
            cup_min_depth: default_cup_min_depth(),
            cup_max_depth: default_cup_max_depth(),
            handle_max_depth: default_handle_max_depth(),
            handle_min_bars: default_handle_min_bars(),
            handle_max_bars: default_handle_max_bars(),
        }
    }
}

impl PatternConfig {
    pub fn weights(&self, kind: PatternKind) -> &DimensionWeights {
        match kind {
            PatternKind::VolatilityContraction => &self.vcp_weights,
            PatternKind::CupWithHandle => &self.cup_weights,
        }
    }
}

fn default_detection_threshold() -> f64 {
    0.6
}

fn default_vcp_weights() -> DimensionWeights {
    // Contraction setups lean on volume drying up
    DimensionWeights {
        technical_quality: 0.30,
        volume_confirmation: 0.35,
        temporal_validity: 0.15,
        market_context: 0.20,
    }
}

fn default_cup_weights() -> DimensionWeights {
    DimensionWeights {
        technical_quality: 0.35,
        volume_confirmation: 0.25,
        temporal_validity: 0.20,
        market_context: 0.20,
    }
}

fn default_vcp_base_bars() -> usize {
    60
}

fn default_vcp_segments() -> usize {
    3
}

fn default_cup_min_bars() -> usize {
    35
}

fn default_cup_max_bars() -> usize {
    250
}

fn default_cup_min_depth() -> f64 {
    12.0
}

fn default_cup_max_depth() -> f64 {
    35.0
}

fn default_handle_max_depth() -> f64 {
    12.0
}

fn default_handle_min_bars() -> usize {
    5
}

fn default_handle_max_bars() -> usize {
    25
}

// ============================================================================
// Pattern Result
// ============================================================================

/// One pattern hypothesis for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternResult {
    pub symbol: String,
    pub kind: PatternKind,
    pub detected: bool,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub dimensional_scores: DimensionalScores,
}

impl PatternResult {
    /// Blend `scores` with `weights` and classify against `threshold`.
    pub fn new(
        symbol: impl Into<String>,
        kind: PatternKind,
        scores: DimensionalScores,
        weights: &DimensionWeights,
        threshold: f64,
    ) -> Self {
        let confidence = round_to(clamp_unit(weights.combine(&scores)), 4);
        Self {
            symbol: symbol.into(),
            kind,
            detected: confidence >= threshold,
            confidence,
            confidence_level: ConfidenceLevel::from_confidence(confidence),
            dimensional_scores: scores,
        }
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Runs every pattern kind over one ticker.
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: PatternConfig,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    /// One result per [`PatternKind`], in [`PatternKind::ALL`] order.
    pub fn detect(&self, series: &PriceSeries, indicators: &IndicatorSet) -> Vec<PatternResult> {
        PatternKind::ALL
            .iter()
            .map(|&kind| {
                let scores = match kind {
                    PatternKind::VolatilityContraction => {
                        vcp::score(series, indicators, &self.config)
                    }
                    PatternKind::CupWithHandle => {
                        cup_handle::score(series, indicators, &self.config)
                    }
                };
                PatternResult::new(
                    series.symbol.clone(),
                    kind,
                    scores,
                    self.config.weights(kind),
                    self.config.detection_threshold,
                )
            })
            .collect()
    }
}

/// Shared market-context score: trend-template share blended with RS score.
fn market_context(indicators: &IndicatorSet) -> f64 {
    let template = indicators.trend_template_count() as f64 / TrendTemplate::CRITERIA as f64;
    0.5 * template + 0.5 * indicators.rs_score / 100.0
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Highest value and its first index.
fn arg_max(values: &[f64]) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

/// Lowest value and its first index.
fn arg_min(values: &[f64]) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })
}
