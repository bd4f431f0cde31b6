//! Composite scoring.
//!
//! Percentile-ranks the RS score and the financial met-count across the
//! run's population and blends them with an unweighted mean. The resulting
//! order is total and is never re-sorted downstream.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Raw per-ticker inputs to the composite.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeInput {
    pub symbol: String,
    pub rs_score: f64,
    pub met_count: u8,
}

/// Composite result for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub symbol: String,
    /// 1-based position in the composite order
    pub composite_rank: usize,
    pub met_count: u8,
    pub rs_score: f64,
    pub rs_percentile: f64,
    pub financial_percentile: f64,
    pub total_percentile: f64,
}

/// Percentile of each value within `values`, higher is better.
///
/// The best value gets 100. Tied values share the average of the ranks they
/// span: `(n - avg_rank + 1) / n * 100`.
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len() as f64;
    values
        .iter()
        .map(|v| {
            let better = values
                .iter()
                .filter(|o| o.total_cmp(v) == Ordering::Greater)
                .count() as f64;
            let tied = values.iter().filter(|o| o.total_cmp(v) == Ordering::Equal).count() as f64;
            let avg_rank = better + (tied + 1.0) / 2.0;
            (n - avg_rank + 1.0) / n * 100.0
        })
        .collect()
}

/// The composite order: met_count desc, total_percentile desc, RS score desc,
/// symbol asc.
pub fn rank_order(a: &CompositeScore, b: &CompositeScore) -> Ordering {
    b.met_count
        .cmp(&a.met_count)
        .then_with(|| b.total_percentile.total_cmp(&a.total_percentile))
        .then_with(|| b.rs_score.total_cmp(&a.rs_score))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

/// Single-pass reducer over the whole population.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeScorer;

impl CompositeScorer {
    pub fn score(&self, inputs: &[CompositeInput]) -> Vec<CompositeScore> {
        let rs: Vec<f64> = inputs.iter().map(|i| i.rs_score).collect();
        let met: Vec<f64> = inputs.iter().map(|i| i.met_count as f64).collect();
        let rs_pct = percentile_ranks(&rs);
        let fin_pct = percentile_ranks(&met);

        let mut scores: Vec<CompositeScore> = inputs
            .iter()
            .zip(rs_pct.into_iter().zip(fin_pct))
            .map(|(input, (rs_percentile, financial_percentile))| CompositeScore {
                symbol: input.symbol.clone(),
                composite_rank: 0,
                met_count: input.met_count,
                rs_score: input.rs_score,
                rs_percentile,
                financial_percentile,
                total_percentile: (rs_percentile + financial_percentile) / 2.0,
            })
            .collect();

        scores.sort_by(rank_order);
        for (i, score) in scores.iter_mut().enumerate() {
            score.composite_rank = i + 1;
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(symbol: &str, rs_score: f64, met_count: u8) -> CompositeInput {
        CompositeInput {
            symbol: symbol.into(),
            rs_score,
            met_count,
        }
    }

    fn fixed(symbol: &str, met_count: u8, total_percentile: f64) -> CompositeScore {
        CompositeScore {
            symbol: symbol.into(),
            composite_rank: 0,
            met_count,
            rs_score: 50.0,
            rs_percentile: total_percentile,
            financial_percentile: total_percentile,
            total_percentile,
        }
    }

    #[test]
    fn test_percentile_ranks_best_is_100() {
        assert_eq!(percentile_ranks(&[10.0, 30.0, 20.0, 40.0]), vec![25.0, 75.0, 50.0, 100.0]);
        assert_eq!(percentile_ranks(&[7.0]), vec![100.0]);
        assert!(percentile_ranks(&[]).is_empty());
    }

    #[test]
    fn test_percentile_ties_share_average_rank() {
        // Ranks: 40 -> 1, the two 20s -> 2.5, 10 -> 4
        let p = percentile_ranks(&[20.0, 40.0, 20.0, 10.0]);
        assert_eq!(p, vec![62.5, 100.0, 62.5, 25.0]);
    }

    #[test]
    fn test_met_count_before_percentile() {
        let mut v = vec![fixed("A", 9, 70.0), fixed("B", 7, 95.0), fixed("C", 9, 60.0)];
        v.sort_by(rank_order);
        let order: Vec<_> = v.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(order, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_symbol_breaks_full_ties() {
        let mut v = vec![fixed("ZZZ", 5, 50.0), fixed("AAA", 5, 50.0)];
        v.sort_by(rank_order);
        assert_eq!(v[0].symbol, "AAA");
    }

    #[test]
    fn test_scorer_assigns_ranks_and_means() {
        let scores = CompositeScorer.score(&[
            input("X", 90.0, 3),
            input("Y", 60.0, 8),
            input("Z", 75.0, 8),
        ]);
        let order: Vec<_> = scores.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(order, vec!["Z", "Y", "X"]);
        assert_eq!(scores[0].composite_rank, 1);
        for s in &scores {
            assert_eq!(s.total_percentile, (s.rs_percentile + s.financial_percentile) / 2.0);
        }
    }
}
