//! TOPSIS ranking of qualifying tickers.
//!
//! Columns are vector-normalized and weighted; each row's score is its
//! distance to the anti-ideal point over the sum of both distances. A column
//! with zero variance carries no information, so it is dropped and its
//! weight spread over the remaining columns in proportion.

use leader_common::util::round_to;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::composite::CompositeScore;
use crate::error::{Result, ScreenerError};
use crate::indicators::IndicatorSet;

// ============================================================================
// Criteria
// ============================================================================

/// Values a criterion column can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKey {
    TotalPercentile,
    RsPercentile,
    FinancialPercentile,
    RsScore,
    MetCount,
    #[serde(rename = "momentum_20d")]
    Momentum20d,
    VolumeRatio,
}

impl CriterionKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalPercentile => "total_percentile",
            Self::RsPercentile => "rs_percentile",
            Self::FinancialPercentile => "financial_percentile",
            Self::RsScore => "rs_score",
            Self::MetCount => "met_count",
            Self::Momentum20d => "momentum_20d",
            Self::VolumeRatio => "volume_ratio",
        }
    }
}

impl std::fmt::Display for CriterionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether more of a criterion is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Benefit,
    Cost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub key: CriterionKey,
    pub weight: f64,
    #[serde(default = "default_direction")]
    pub direction: Direction,
}

fn default_direction() -> Direction {
    Direction::Benefit
}

// ============================================================================
// Configuration
// ============================================================================

/// Qualification rule, criteria, and list length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopsisConfig {
    #[serde(default = "default_criteria")]
    pub criteria: Vec<Criterion>,

    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Minimum met financial conditions to be a candidate
    #[serde(default = "default_min_met_count")]
    pub min_met_count: u8,

    /// Minimum RS score to be a candidate
    #[serde(default = "default_min_rs_score")]
    pub min_rs_score: f64,
}

impl Default for TopsisConfig {
    fn default() -> Self {
        Self {
            criteria: default_criteria(),
            top_n: default_top_n(),
            min_met_count: default_min_met_count(),
            min_rs_score: default_min_rs_score(),
        }
    }
}

fn default_criteria() -> Vec<Criterion> {
    vec![
        Criterion {
            key: CriterionKey::TotalPercentile,
            weight: 0.40,
            direction: Direction::Benefit,
        },
        Criterion {
            key: CriterionKey::RsScore,
            weight: 0.35,
            direction: Direction::Benefit,
        },
        Criterion {
            key: CriterionKey::Momentum20d,
            weight: 0.25,
            direction: Direction::Benefit,
        },
    ]
}

fn default_top_n() -> usize {
    10
}

fn default_min_met_count() -> u8 {
    5
}

fn default_min_rs_score() -> f64 {
    70.0
}

// ============================================================================
// Candidates and Entries
// ============================================================================

/// One matrix row, carried in composite order.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    pub symbol: String,
    pub composite_rank: usize,
    pub met_count: u8,
    pub values: BTreeMap<CriterionKey, f64>,
}

impl CandidateRow {
    pub fn from_scores(score: &CompositeScore, indicators: &IndicatorSet) -> Self {
        let mut values = BTreeMap::from([
            (CriterionKey::TotalPercentile, score.total_percentile),
            (CriterionKey::RsPercentile, score.rs_percentile),
            (CriterionKey::FinancialPercentile, score.financial_percentile),
            (CriterionKey::RsScore, score.rs_score),
            (CriterionKey::MetCount, score.met_count as f64),
            (CriterionKey::Momentum20d, indicators.momentum_20d),
        ]);
        if let Some(ratio) = indicators.volume_ratio {
            values.insert(CriterionKey::VolumeRatio, ratio);
        }
        Self {
            symbol: score.symbol.clone(),
            composite_rank: score.composite_rank,
            met_count: score.met_count,
            values,
        }
    }

    fn value(&self, key: CriterionKey) -> Option<f64> {
        self.values.get(&key).copied()
    }
}

/// A ranked entry in the Top-N list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopsisRankEntry {
    pub symbol: String,
    pub rank: usize,
    pub topsis_score: f64,
    pub distance_to_ideal: f64,
    pub distance_to_anti_ideal: f64,
    /// Raw criterion values used
    pub criteria: BTreeMap<String, f64>,
    /// Normalized, weighted criterion values
    pub weighted: BTreeMap<String, f64>,
    pub composite_rank: usize,
}

/// Ranking output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopsisRanking {
    pub entries: Vec<TopsisRankEntry>,
    /// Criteria dropped for zero variance
    pub degenerate_criteria: Vec<String>,
    /// Qualifying symbols left unranked for lacking a criterion value
    pub incomplete_candidates: Vec<String>,
    pub candidate_count: usize,
}

// ============================================================================
// Ranker
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TopsisRanker {
    config: TopsisConfig,
}

impl TopsisRanker {
    pub fn new(config: TopsisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TopsisConfig {
        &self.config
    }

    /// Whether a row passes the candidate rule.
    pub fn qualifies(&self, row: &CandidateRow) -> bool {
        row.met_count >= self.config.min_met_count
            && row.value(CriterionKey::RsScore).is_some_and(|rs| rs >= self.config.min_rs_score)
    }

    /// Rank `rows` (already in composite order).
    ///
    /// Rows failing the candidate rule are skipped. Qualifying rows missing a
    /// configured criterion are reported in `incomplete_candidates` and left
    /// out of the matrix. No candidates at all is
    /// [`ScreenerError::NoQualifyingCandidates`].
    pub fn rank(&self, rows: &[CandidateRow]) -> Result<TopsisRanking> {
        let criteria = &self.config.criteria;
        let mut candidates: Vec<&CandidateRow> = Vec::new();
        let mut matrix: Vec<Vec<f64>> = Vec::new();
        let mut incomplete_candidates = Vec::new();
        for row in rows.iter().filter(|r| self.qualifies(r)) {
            match criteria.iter().map(|c| row.value(c.key)).collect::<Option<Vec<f64>>>() {
                Some(values) => {
                    candidates.push(row);
                    matrix.push(values);
                }
                None => {
                    tracing::warn!(
                        symbol = %row.symbol,
                        "Candidate lacks a criterion value; not ranked"
                    );
                    incomplete_candidates.push(row.symbol.clone());
                }
            }
        }
        if candidates.is_empty() {
            return Err(ScreenerError::NoQualifyingCandidates);
        }

        let solved = solve(&matrix, criteria);

        let degenerate_criteria: Vec<String> = solved
            .degenerate
            .iter()
            .map(|&j| {
                let name = criteria[j].key.to_string();
                let err = ScreenerError::DegenerateCriterion { criterion: name.clone() };
                tracing::warn!(criterion = %name, "{}; weight redistributed", err);
                name
            })
            .collect();

        let mut order: Vec<usize> = (0..candidates.len()).collect();
        // Stable: equal scores keep composite order
        order.sort_by(|&a, &b| solved.scores[b].total_cmp(&solved.scores[a]));

        let entries = order
            .into_iter()
            .take(self.config.top_n)
            .enumerate()
            .map(|(pos, i)| {
                let row = candidates[i];
                let named = |values: &[f64]| -> BTreeMap<String, f64> {
                    criteria
                        .iter()
                        .zip(values)
                        .map(|(c, v)| (c.key.to_string(), round_to(*v, 6)))
                        .collect()
                };
                TopsisRankEntry {
                    symbol: row.symbol.clone(),
                    rank: pos + 1,
                    topsis_score: round_to(solved.scores[i], 6),
                    distance_to_ideal: round_to(solved.d_plus[i], 6),
                    distance_to_anti_ideal: round_to(solved.d_minus[i], 6),
                    criteria: named(&matrix[i]),
                    weighted: named(&solved.weighted[i]),
                    composite_rank: row.composite_rank,
                }
            })
            .collect();

        Ok(TopsisRanking {
            entries,
            degenerate_criteria,
            incomplete_candidates,
            candidate_count: candidates.len(),
        })
    }
}

// ============================================================================
// Algorithm
// ============================================================================

/// Raw TOPSIS output for a matrix, one value per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub scores: Vec<f64>,
    pub d_plus: Vec<f64>,
    pub d_minus: Vec<f64>,
    pub weighted: Vec<Vec<f64>>,
    /// Column indices dropped for zero variance
    pub degenerate: Vec<usize>,
}

/// Solve TOPSIS for `matrix` (rows x criteria).
pub fn solve(matrix: &[Vec<f64>], criteria: &[Criterion]) -> Solution {
    let rows = matrix.len();
    let cols = criteria.len();

    let degenerate: Vec<usize> = (0..cols)
        .filter(|&j| {
            let (min, max) = matrix.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                (lo.min(r[j]), hi.max(r[j]))
            });
            (max - min).abs() <= f64::EPSILON * max.abs().max(1.0)
        })
        .collect();

    let informative_weight: f64 = (0..cols)
        .filter(|j| !degenerate.contains(j))
        .map(|j| criteria[j].weight)
        .sum();

    if informative_weight <= 0.0 {
        return Solution {
            scores: vec![0.5; rows],
            d_plus: vec![0.0; rows],
            d_minus: vec![0.0; rows],
            weighted: vec![vec![0.0; cols]; rows],
            degenerate,
        };
    }

    let mut weighted = vec![vec![0.0; cols]; rows];
    for j in (0..cols).filter(|j| !degenerate.contains(j)) {
        let norm = matrix.iter().map(|r| r[j] * r[j]).sum::<f64>().sqrt();
        let weight = criteria[j].weight / informative_weight;
        for (i, row) in matrix.iter().enumerate() {
            weighted[i][j] = row[j] / norm * weight;
        }
    }

    let mut ideal = vec![0.0; cols];
    let mut anti_ideal = vec![0.0; cols];
    for j in (0..cols).filter(|j| !degenerate.contains(j)) {
        let column = weighted.iter().map(|r| r[j]);
        let max = column.clone().fold(f64::NEG_INFINITY, f64::max);
        let min = column.fold(f64::INFINITY, f64::min);
        (ideal[j], anti_ideal[j]) = match criteria[j].direction {
            Direction::Benefit => (max, min),
            Direction::Cost => (min, max),
        };
    }

    let distance = |row: &[f64], point: &[f64]| -> f64 {
        row.iter().zip(point).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt()
    };
    let d_plus: Vec<f64> = weighted.iter().map(|r| distance(r, &ideal)).collect();
    let d_minus: Vec<f64> = weighted.iter().map(|r| distance(r, &anti_ideal)).collect();
    let scores = d_plus
        .iter()
        .zip(&d_minus)
        .map(|(p, m)| if p + m > 0.0 { m / (p + m) } else { 0.5 })
        .collect();

    Solution {
        scores,
        d_plus,
        d_minus,
        weighted,
        degenerate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn benefit(key: CriterionKey, weight: f64) -> Criterion {
        Criterion {
            key,
            weight,
            direction: Direction::Benefit,
        }
    }

    fn row(symbol: &str, rank: usize, met: u8, rs: f64, total: f64, momentum: f64) -> CandidateRow {
        CandidateRow {
            symbol: symbol.into(),
            composite_rank: rank,
            met_count: met,
            values: BTreeMap::from([
                (CriterionKey::TotalPercentile, total),
                (CriterionKey::RsScore, rs),
                (CriterionKey::Momentum20d, momentum),
                (CriterionKey::MetCount, met as f64),
            ]),
        }
    }

    #[test]
    fn test_dominant_row_scores_one() {
        let criteria = vec![
            benefit(CriterionKey::RsScore, 0.5),
            benefit(CriterionKey::TotalPercentile, 0.5),
        ];
        let s = solve(&[vec![90.0, 80.0], vec![50.0, 40.0], vec![70.0, 60.0]], &criteria);
        assert_eq!(s.scores[0], 1.0);
        assert_eq!(s.scores[1], 0.0);
        assert!(s.scores[2] > 0.0 && s.scores[2] < 1.0);
        assert!(s.degenerate.is_empty());
    }

    #[test]
    fn test_cost_direction_inverts() {
        let criteria = vec![Criterion {
            key: CriterionKey::VolumeRatio,
            weight: 1.0,
            direction: Direction::Cost,
        }];
        let s = solve(&[vec![1.0], vec![3.0]], &criteria);
        assert_eq!(s.scores, vec![1.0, 0.0]);
    }

    #[test]
    fn test_zero_variance_column_redistributes_weight() {
        let criteria = vec![
            benefit(CriterionKey::RsScore, 0.6),
            benefit(CriterionKey::MetCount, 0.4),
        ];
        let with_flat = solve(&[vec![90.0, 7.0], vec![60.0, 7.0], vec![75.0, 7.0]], &criteria);
        let alone = solve(
            &[vec![90.0], vec![60.0], vec![75.0]],
            &[benefit(CriterionKey::RsScore, 1.0)],
        );

        assert_eq!(with_flat.degenerate, vec![1]);
        for (a, b) in with_flat.scores.iter().zip(&alone.scores) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(with_flat.scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_all_degenerate_scores_half() {
        let criteria = vec![benefit(CriterionKey::RsScore, 1.0)];
        let s = solve(&[vec![80.0], vec![80.0]], &criteria);
        assert_eq!(s.scores, vec![0.5, 0.5]);
        assert_eq!(s.degenerate, vec![0]);
    }

    #[test]
    fn test_rank_filters_truncates_and_keeps_composite_order_on_ties() {
        let ranker = TopsisRanker::new(TopsisConfig {
            top_n: 2,
            ..TopsisConfig::default()
        });
        let rows = vec![
            row("AAA", 1, 9, 85.0, 90.0, 5.0),
            row("BBB", 2, 9, 85.0, 90.0, 5.0),
            row("LOW", 3, 9, 50.0, 99.0, 50.0),
            row("CCC", 4, 6, 75.0, 60.0, 1.0),
        ];
        let ranking = ranker.rank(&rows).unwrap();

        assert_eq!(ranking.candidate_count, 3);
        let symbols: Vec<_> = ranking.entries.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "BBB"]);
        assert_eq!(ranking.entries[0].rank, 1);
        assert_eq!(ranking.entries[0].topsis_score, ranking.entries[1].topsis_score);
        assert_eq!(ranking.entries[0].criteria["rs_score"], 85.0);
        assert!(ranking.entries[0].criteria.contains_key("momentum_20d"));
    }

    #[test]
    fn test_rank_without_candidates_fails() {
        let ranker = TopsisRanker::default();
        let err = ranker.rank(&[row("AAA", 1, 3, 95.0, 90.0, 5.0)]).unwrap_err();
        assert!(matches!(err, ScreenerError::NoQualifyingCandidates));
    }

    #[test]
    fn test_rank_reports_degenerate_criterion() {
        let ranker = TopsisRanker::default();
        let rows = vec![row("AAA", 1, 9, 85.0, 90.0, 5.0), row("BBB", 2, 9, 80.0, 80.0, 5.0)];
        let ranking = ranker.rank(&rows).unwrap();
        assert_eq!(ranking.degenerate_criteria, vec!["momentum_20d".to_string()]);
        assert_eq!(ranking.entries[0].symbol, "AAA");
    }

    #[test]
    fn test_missing_volume_ratio_is_reported_not_zero_filled() {
        let ranker = TopsisRanker::new(TopsisConfig {
            criteria: vec![
                benefit(CriterionKey::RsScore, 0.5),
                benefit(CriterionKey::VolumeRatio, 0.5),
            ],
            ..TopsisConfig::default()
        });
        let mut aaa = row("AAA", 1, 9, 85.0, 90.0, 5.0);
        aaa.values.insert(CriterionKey::VolumeRatio, 1.5);
        let mut bbb = row("BBB", 2, 9, 80.0, 80.0, 5.0);
        bbb.values.insert(CriterionKey::VolumeRatio, 0.8);
        let quiet = row("QUIET", 3, 9, 95.0, 85.0, 5.0);

        let ranking = ranker.rank(&[aaa, bbb, quiet.clone()]).unwrap();
        assert_eq!(ranking.incomplete_candidates, vec!["QUIET".to_string()]);
        assert_eq!(ranking.candidate_count, 2);
        assert!(ranking.entries.iter().all(|e| e.symbol != "QUIET"));

        let err = ranker.rank(&[quiet]).unwrap_err();
        assert!(matches!(err, ScreenerError::NoQualifyingCandidates));
    }

    #[test]
    fn test_volume_ratio_absent_from_row_without_volume() {
        let score = CompositeScore {
            symbol: "AAA".into(),
            composite_rank: 1,
            met_count: 7,
            rs_score: 85.0,
            rs_percentile: 80.0,
            financial_percentile: 60.0,
            total_percentile: 70.0,
        };
        let mut indicators = crate::screener::engine::tests::evaluation("AAA", 85.0, 7).indicators;
        indicators.volume_ratio = None;
        let row = CandidateRow::from_scores(&score, &indicators);
        assert_eq!(row.value(CriterionKey::VolumeRatio), None);
        assert_eq!(row.value(CriterionKey::RsScore), Some(85.0));
    }

    #[test]
    fn test_criteria_serde() {
        let c: Criterion = serde_json::from_str(r#"{"key":"momentum_20d","weight":0.25}"#).unwrap();
        assert_eq!(c.key, CriterionKey::Momentum20d);
        assert_eq!(c.direction, Direction::Benefit);
    }
}
