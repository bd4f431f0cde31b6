//! Whole-population reducers: composite percentiles and TOPSIS.
//!
//! Both run single-threaded after every per-ticker stage has finished.

pub mod composite;
pub mod topsis;

pub use composite::{
    percentile_ranks, rank_order, CompositeInput, CompositeScore, CompositeScorer,
};
pub use topsis::{
    solve, CandidateRow, Criterion, CriterionKey, Direction, Solution, TopsisConfig,
    TopsisRankEntry, TopsisRanker, TopsisRanking,
};
