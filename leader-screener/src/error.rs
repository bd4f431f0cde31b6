//! Screener error taxonomy.
//!
//! Per-ticker variants ([`ScreenerError::InsufficientHistory`],
//! [`ScreenerError::UpstreamDataUnavailable`] with a symbol) are contained by
//! the engine and recorded as exclusions. Whole-population variants abort the
//! run before anything is published.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::financial::FinancialCondition;

/// Result type alias for screener operations.
pub type Result<T> = std::result::Result<T, ScreenerError>;

#[derive(Error, Debug)]
pub enum ScreenerError {
    #[error("{symbol}: insufficient history ({available} bars, {required} required)")]
    InsufficientHistory {
        symbol: String,
        required: usize,
        available: usize,
    },

    #[error("{symbol}: missing fundamentals for {condition}")]
    MissingFundamentals {
        symbol: String,
        condition: FinancialCondition,
    },

    #[error("criterion '{criterion}' has zero variance")]
    DegenerateCriterion { criterion: String },

    #[error("a run for {run_date} is already in progress")]
    RunAlreadyInProgress { run_date: NaiveDate },

    #[error("upstream data unavailable{}: {reason}", for_symbol(.symbol))]
    UpstreamDataUnavailable {
        symbol: Option<String>,
        reason: String,
    },

    #[error("universe is empty after exclusions")]
    EmptyUniverse,

    #[error("no tickers qualify for ranking")]
    NoQualifyingCandidates,

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScreenerError {
    /// Whether this error only concerns one ticker.
    pub fn is_per_ticker(&self) -> bool {
        match self {
            Self::InsufficientHistory { .. } | Self::MissingFundamentals { .. } => true,
            Self::UpstreamDataUnavailable { symbol, .. } => symbol.is_some(),
            _ => false,
        }
    }

    /// Reason code used in exclusion records, for per-ticker errors.
    pub fn reason_code(&self) -> Option<ExclusionReason> {
        match self {
            Self::InsufficientHistory { .. } => Some(ExclusionReason::InsufficientHistory),
            Self::UpstreamDataUnavailable { symbol: Some(_), .. } => {
                Some(ExclusionReason::UpstreamDataUnavailable)
            }
            _ => None,
        }
    }
}

fn for_symbol(symbol: &Option<String>) -> String {
    symbol.as_ref().map(|s| format!(" for {}", s)).unwrap_or_default()
}

/// Why a ticker is absent from a run's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    InsufficientHistory,
    UpstreamDataUnavailable,
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientHistory => write!(f, "insufficient_history"),
            Self::UpstreamDataUnavailable => write!(f, "upstream_data_unavailable"),
        }
    }
}
