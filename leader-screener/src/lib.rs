//! Leader Screener Library
//!
//! Multi-factor screening and ranking over daily OHLCV and fundamentals,
//! producing a small, ordered Top-N list of leader candidates plus the
//! per-strategy screener lists it is drawn from.
//!
//! # Stages
//!
//! - **Indicators**: SMAs, RS line and score, volume ratio, OBV trend,
//!   momentum, the eight-point trend template
//! - **Patterns**: volatility contraction and cup-with-handle confidence
//! - **Financials**: nine growth, profitability and leverage conditions
//! - **Composite**: percentile blend of RS score and met-count
//! - **TOPSIS**: multi-criteria Top-N over qualifying candidates
//! - **Signals**: per-screener signal dates and recency queries
//!
//! Runs are deterministic for a given [`screener::RunContext`] and input, and
//! are published atomically by [`store::SnapshotStore`].

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod error;
pub mod financial;
pub mod indicators;
pub mod pattern;
pub mod ranking;
pub mod screener;
pub mod signals;
pub mod store;

pub use data::{JsonDirSource, MarketDataSource};
pub use error::{Result, ScreenerError};
pub use screener::{CancelFlag, Pipeline, PipelineConfig, RunContext, RunScheduler, ScreenerEngine};
pub use store::SnapshotStore;
