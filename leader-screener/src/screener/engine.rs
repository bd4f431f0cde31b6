//! Screening engine.
//!
//! Runs every stage over an owned [`Universe`]: per-ticker work (alignment,
//! indicators, patterns, fundamentals) on a rayon pool in bounded chunks,
//! then the single-threaded reducers (composite scoring, TOPSIS, screener
//! profiles). The engine performs no I/O and touches no clock; the caller
//! supplies the run context.

use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::PipelineConfig;
use super::profile::{ProfileKind, ScreenerProfile};
use super::report::{LeaderRecord, ScreenerRecord};
use crate::data::{align_to_calendar, Benchmark, TickerData, TickerFeed, Universe};
use crate::error::{ExclusionReason, Result, ScreenerError};
use crate::financial::{FinancialEvaluator, FinancialMetricSet};
use crate::indicators::{IndicatorCalculator, IndicatorSet};
use crate::pattern::{PatternDetector, PatternKind, PatternResult};
use crate::ranking::{
    CandidateRow, CompositeInput, CompositeScore, CompositeScorer, TopsisRanker, TopsisRanking,
};
use crate::signals::{SignalEvent, SignalHistory};

// ============================================================================
// Run Context
// ============================================================================

/// Cooperative cancellation shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Dates a run is pinned to.
///
/// `as_of` bounds every input; `generated_at` becomes `last_updated` in the
/// published files. Equal contexts over equal inputs give identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub as_of: NaiveDate,
    pub generated_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(as_of: NaiveDate, generated_at: DateTime<Utc>) -> Self {
        Self { as_of, generated_at }
    }
}

// ============================================================================
// Per-ticker Results
// ============================================================================

/// Everything the per-ticker stages produced for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerEvaluation {
    pub symbol: String,
    pub sector: Option<String>,
    pub indicators: IndicatorSet,
    pub patterns: Vec<PatternResult>,
    pub financial: FinancialMetricSet,
}

impl TickerEvaluation {
    pub fn pattern(&self, kind: PatternKind) -> Option<&PatternResult> {
        self.patterns.iter().find(|p| p.kind == kind)
    }
}

/// A universe member left out of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub symbol: String,
    pub reason: ExclusionReason,
    pub detail: String,
}

impl Exclusion {
    /// Exclusion for a per-ticker error; `None` for errors that must abort.
    pub fn from_error(symbol: &str, err: &ScreenerError) -> Option<Self> {
        err.reason_code().map(|reason| Self {
            symbol: symbol.to_string(),
            reason,
            detail: err.to_string(),
        })
    }
}

// ============================================================================
// Run Output
// ============================================================================

/// Entries of one screener.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenerRecords {
    Rules(Vec<ScreenerRecord>),
    Leaders(Vec<LeaderRecord>),
}

impl ScreenerRecords {
    pub fn len(&self) -> usize {
        match self {
            Self::Rules(r) => r.len(),
            Self::Leaders(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One screener's result for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenerOutput {
    pub name: String,
    pub kind: ProfileKind,
    pub records: ScreenerRecords,
}

impl ScreenerOutput {
    pub fn symbols(&self) -> Vec<&str> {
        match &self.records {
            ScreenerRecords::Rules(r) => r.iter().map(|x| x.symbol.as_str()).collect(),
            ScreenerRecords::Leaders(r) => r.iter().map(|x| x.symbol.as_str()).collect(),
        }
    }

    pub fn leader_records(&self) -> Vec<LeaderRecord> {
        match &self.records {
            ScreenerRecords::Leaders(r) => r.clone(),
            ScreenerRecords::Rules(_) => Vec::new(),
        }
    }

    pub fn signals(&self) -> Vec<SignalEvent> {
        match &self.records {
            ScreenerRecords::Rules(r) => r.iter().map(|x| x.signal(&self.name)).collect(),
            ScreenerRecords::Leaders(r) => r.iter().map(|x| x.signal(&self.name)).collect(),
        }
    }
}

/// Everything a run produced, ready for publication.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub context: RunContext,
    pub config_version: String,
    pub universe_size: usize,
    /// Ordered by symbol
    pub evaluations: Vec<TickerEvaluation>,
    /// Ordered by symbol
    pub exclusions: Vec<Exclusion>,
    /// In composite rank order
    pub composite: Vec<CompositeScore>,
    pub ranking: TopsisRanking,
    /// In profile order
    pub screeners: Vec<ScreenerOutput>,
}

impl RunOutput {
    pub fn screener(&self, name: &str) -> Option<&ScreenerOutput> {
        self.screeners.iter().find(|s| s.name == name)
    }

    pub fn leaders(&self) -> Option<&ScreenerOutput> {
        self.screeners.iter().find(|s| s.kind == ProfileKind::Leaders)
    }

    /// Every screener entry as a signal event.
    pub fn signal_events(&self) -> Vec<SignalEvent> {
        self.screeners.iter().flat_map(|s| s.signals()).collect()
    }
}

/// Signal dates of the previous publication, keyed by screener name.
pub type PreviousSignals = BTreeMap<String, SignalHistory>;

// ============================================================================
// Engine
// ============================================================================

/// Stateless runner for one [`PipelineConfig`].
pub struct ScreenerEngine {
    config: PipelineConfig,
    indicators: IndicatorCalculator,
    patterns: PatternDetector,
    financial: FinancialEvaluator,
    ranker: TopsisRanker,
}

impl ScreenerEngine {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            indicators: IndicatorCalculator::new(config.indicators.clone()),
            patterns: PatternDetector::new(config.patterns.clone()),
            financial: FinancialEvaluator::new(config.financial.clone()),
            ranker: TopsisRanker::new(config.topsis.clone()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over `universe`.
    ///
    /// Per-ticker failures become exclusions. A missing benchmark, an empty
    /// population, no ranking candidates, or cancellation abort the run.
    pub fn run(
        &self,
        universe: Universe,
        ctx: &RunContext,
        previous: &PreviousSignals,
        cancel: &CancelFlag,
    ) -> Result<RunOutput> {
        let benchmark = Benchmark::from_series(&universe.benchmark, ctx.as_of);
        if benchmark.is_empty() {
            return Err(ScreenerError::UpstreamDataUnavailable {
                symbol: None,
                reason: format!("benchmark has no bars on or before {}", ctx.as_of),
            });
        }
        if universe.feeds.is_empty() {
            return Err(ScreenerError::EmptyUniverse);
        }

        let universe_size = universe.feeds.len();
        let (mut evaluations, mut exclusions) =
            self.evaluate_all(universe.feeds, &benchmark, ctx.as_of, cancel)?;
        evaluations.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        exclusions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        if evaluations.is_empty() {
            return Err(ScreenerError::EmptyUniverse);
        }

        let by_symbol: BTreeMap<&str, &TickerEvaluation> =
            evaluations.iter().map(|e| (e.symbol.as_str(), e)).collect();

        let inputs: Vec<CompositeInput> = evaluations
            .iter()
            .map(|e| CompositeInput {
                symbol: e.symbol.clone(),
                rs_score: e.indicators.rs_score,
                met_count: e.financial.met_count,
            })
            .collect();
        let composite = CompositeScorer.score(&inputs);

        let rows: Vec<CandidateRow> = composite
            .iter()
            .filter_map(|s| {
                by_symbol
                    .get(s.symbol.as_str())
                    .map(|e| CandidateRow::from_scores(s, &e.indicators))
            })
            .collect();
        let ranking = self.ranker.rank(&rows)?;

        let screeners = self
            .config
            .profiles
            .iter()
            .map(|profile| {
                self.apply_profile(profile, &composite, &by_symbol, &ranking, ctx.as_of, previous)
            })
            .collect();

        info!(
            as_of = %ctx.as_of,
            universe = universe_size,
            evaluated = evaluations.len(),
            excluded = exclusions.len(),
            candidates = ranking.candidate_count,
            "Screening complete"
        );

        Ok(RunOutput {
            context: *ctx,
            config_version: self.config.version.clone(),
            universe_size,
            evaluations,
            exclusions,
            composite,
            ranking,
            screeners,
        })
    }

    /// Per-ticker stages over bounded chunks, checking `cancel` between them.
    fn evaluate_all(
        &self,
        feeds: Vec<TickerFeed>,
        benchmark: &Benchmark,
        as_of: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<(Vec<TickerEvaluation>, Vec<Exclusion>)> {
        let exec = &self.config.execution;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(exec.worker_count())
            .thread_name(|i| format!("screener-worker-{}", i))
            .build()
            .map_err(|e| ScreenerError::InvalidConfig(format!("worker pool: {}", e)))?;
        let calendar = benchmark.calendar();
        let chunk_size = exec.chunk_size.max(1);

        let mut evaluations = Vec::new();
        let mut exclusions = Vec::new();
        let mut feeds = feeds.into_iter();

        loop {
            if cancel.is_cancelled() {
                warn!(evaluated = evaluations.len(), "Run cancelled");
                return Err(ScreenerError::Cancelled);
            }
            let chunk: Vec<TickerFeed> = feeds.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }

            let results: Vec<(String, Result<TickerEvaluation>)> = pool.install(|| {
                chunk
                    .into_par_iter()
                    .map(|feed| {
                        let result = feed
                            .data
                            .map_err(|e| ScreenerError::UpstreamDataUnavailable {
                                symbol: Some(feed.symbol.clone()),
                                reason: e.to_string(),
                            })
                            .and_then(|data| {
                                self.evaluate_ticker(data, benchmark, &calendar, as_of)
                            });
                        (feed.symbol, result)
                    })
                    .collect()
            });

            for (symbol, result) in results {
                match result {
                    Ok(eval) => evaluations.push(eval),
                    Err(e) => match Exclusion::from_error(&symbol, &e) {
                        Some(exclusion) => {
                            debug!(
                                symbol = %symbol,
                                reason = %exclusion.reason,
                                "Ticker excluded: {}",
                                e
                            );
                            exclusions.push(exclusion);
                        }
                        None => return Err(e),
                    },
                }
            }
        }

        Ok((evaluations, exclusions))
    }

    fn evaluate_ticker(
        &self,
        data: TickerData,
        benchmark: &Benchmark,
        calendar: &[NaiveDate],
        as_of: NaiveDate,
    ) -> Result<TickerEvaluation> {
        let symbol = data.symbol().to_string();
        let cleaned = data.prices.cleaned(as_of);
        let aligned = align_to_calendar(&cleaned, calendar, self.config.calendar.max_fill_gap);
        if aligned.truncated || aligned.dropped > 0 {
            debug!(
                symbol = %symbol,
                filled = aligned.filled,
                dropped = aligned.dropped,
                truncated = aligned.truncated,
                "Series aligned to calendar"
            );
        }

        let indicators = self.indicators.compute(&aligned.series, benchmark)?;
        let patterns = self.patterns.detect(&aligned.series, &indicators);
        let financial = self.financial.evaluate(&symbol, data.fundamentals.as_ref(), as_of);
        for missing in financial.missing_errors() {
            debug!("{}", missing);
        }

        Ok(TickerEvaluation {
            symbol,
            sector: data.profile.sector,
            indicators,
            patterns,
            financial,
        })
    }

    fn apply_profile(
        &self,
        profile: &ScreenerProfile,
        composite: &[CompositeScore],
        by_symbol: &BTreeMap<&str, &TickerEvaluation>,
        ranking: &TopsisRanking,
        as_of: NaiveDate,
        previous: &PreviousSignals,
    ) -> ScreenerOutput {
        let empty = SignalHistory::default();
        let history = previous.get(&profile.name).unwrap_or(&empty);

        let records = match profile.kind {
            ProfileKind::Rules => ScreenerRecords::Rules(
                composite
                    .iter()
                    .filter_map(|score| {
                        let eval = by_symbol.get(score.symbol.as_str())?;
                        let signal_date = history.signal_date(&eval.symbol, as_of);
                        profile
                            .matches(eval)
                            .then(|| ScreenerRecord::new(eval, score, signal_date))
                    })
                    .collect(),
            ),
            ProfileKind::Leaders => ScreenerRecords::Leaders(
                ranking
                    .entries
                    .iter()
                    .map(|entry| {
                        LeaderRecord::new(entry, history.signal_date(&entry.symbol, as_of))
                    })
                    .collect(),
            ),
        };

        debug!(screener = %profile.name, entries = records.len(), "Screener applied");
        ScreenerOutput {
            name: profile.name.clone(),
            kind: profile.kind,
            records,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::{PriceSeries, ProviderError, TickerProfile};
    use crate::financial::tests::strong_ending;
    use crate::indicators::tests::series_from;
    use crate::pattern::{DimensionalScores, PatternConfig};

    /// A hand-built evaluation with neutral indicators and no detected pattern.
    pub(crate) fn evaluation(symbol: &str, rs_score: f64, met_count: u8) -> TickerEvaluation {
        let as_of = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let indicators = IndicatorSet {
            symbol: symbol.to_string(),
            as_of,
            bars: 250,
            close: 50.0,
            sma50: 48.0,
            sma150: 45.0,
            sma200: 42.0,
            sma50_trend_up: true,
            sma150_trend_up: true,
            sma200_trend_up: true,
            high_52w: 52.0,
            low_52w: 30.0,
            rs_line: 0.5,
            rs_score,
            rs_new_high: false,
            volume_ratio: Some(1.0),
            obv_trend: 1,
            momentum_20d: 4.0,
            trend_template: Default::default(),
        };
        let config = PatternConfig::default();
        let patterns = PatternKind::ALL
            .iter()
            .map(|&kind| {
                PatternResult::new(
                    symbol,
                    kind,
                    DimensionalScores::uniform(0.3),
                    config.weights(kind),
                    config.detection_threshold,
                )
            })
            .collect();
        let mut financial = FinancialEvaluator::default().evaluate(symbol, None, as_of);
        financial.met_count = met_count;

        TickerEvaluation {
            symbol: symbol.to_string(),
            sector: Some("Technology".into()),
            indicators,
            patterns,
            financial,
        }
    }

    const BARS: usize = 300;

    fn ctx(series: &PriceSeries) -> RunContext {
        let generated_at = DateTime::parse_from_rfc3339("2023-10-28T22:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        RunContext::new(series.last_date().unwrap(), generated_at)
    }

    fn ticker(symbol: &str, bars: usize, rate: f64, strong: bool) -> TickerFeed {
        let prices = series_from(symbol, bars, |i| 10.0 * (1.0 + rate).powi(i as i32));
        let mut profile = TickerProfile::new(symbol);
        profile.sector = Some("Technology".into());
        TickerFeed {
            symbol: symbol.into(),
            data: Ok(TickerData {
                profile,
                prices,
                fundamentals: strong.then(|| strong_ending(2023)),
            }),
        }
    }

    fn universe(feeds: Vec<TickerFeed>) -> Universe {
        Universe {
            benchmark: series_from("IDX", BARS, |_| 100.0),
            feeds,
        }
    }

    fn sample() -> Universe {
        universe(vec![
            ticker("AAA", BARS, 0.010, true),
            ticker("BBB", BARS, 0.008, true),
            ticker("CCC", BARS, 0.004, false),
            ticker("SHORT", 150, 0.010, true),
            TickerFeed {
                symbol: "GONE".into(),
                data: Err(ProviderError::DataNotAvailable("GONE".into())),
            },
        ])
    }

    fn engine() -> ScreenerEngine {
        let mut config = PipelineConfig::default();
        config.execution.chunk_size = 2;
        config.execution.workers = Some(2);
        ScreenerEngine::new(config)
    }

    #[test]
    fn test_run_excludes_per_ticker_failures() {
        let u = sample();
        let c = ctx(&u.benchmark);
        let out = engine().run(u, &c, &PreviousSignals::new(), &CancelFlag::new()).unwrap();

        assert_eq!(out.universe_size, 5);
        let evaluated: Vec<_> = out.evaluations.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(evaluated, vec!["AAA", "BBB", "CCC"]);

        let excluded: Vec<_> =
            out.exclusions.iter().map(|e| (e.symbol.as_str(), e.reason)).collect();
        assert_eq!(
            excluded,
            vec![
                ("GONE", ExclusionReason::UpstreamDataUnavailable),
                ("SHORT", ExclusionReason::InsufficientHistory),
            ]
        );

        assert!(out.composite.iter().all(|s| s.symbol != "SHORT"));
        assert!(out.signal_events().iter().all(|s| s.symbol != "SHORT"));
    }

    #[test]
    fn test_leaders_restricted_to_candidates() {
        let u = sample();
        let c = ctx(&u.benchmark);
        let out = engine().run(u, &c, &PreviousSignals::new(), &CancelFlag::new()).unwrap();

        // CCC has no fundamentals and fails the met-count rule
        assert_eq!(out.ranking.candidate_count, 2);
        let leaders = out.leaders().unwrap();
        assert_eq!(leaders.symbols(), vec!["AAA", "BBB"]);
        assert_eq!(out.composite[0].composite_rank, 1);
        assert!(out.composite.iter().take(2).all(|s| s.met_count == 9));
    }

    #[test]
    fn test_signal_dates_carry_forward() {
        let u = sample();
        let c = ctx(&u.benchmark);
        let earlier = c.as_of - chrono::Duration::days(3);
        let previous = PreviousSignals::from([(
            "leaders".to_string(),
            SignalHistory::new(BTreeMap::from([("AAA".to_string(), earlier)])),
        )]);
        let out = engine().run(u, &c, &previous, &CancelFlag::new()).unwrap();

        let dates: BTreeMap<_, _> = out
            .leaders()
            .unwrap()
            .leader_records()
            .into_iter()
            .map(|r| (r.symbol, r.signal_date))
            .collect();
        assert_eq!(dates["AAA"], earlier);
        assert_eq!(dates["BBB"], c.as_of);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let c = ctx(&sample().benchmark);
        let a = engine().run(sample(), &c, &PreviousSignals::new(), &CancelFlag::new()).unwrap();
        let b = engine().run(sample(), &c, &PreviousSignals::new(), &CancelFlag::new()).unwrap();
        assert_eq!(a.composite, b.composite);
        assert_eq!(a.ranking, b.ranking);
        assert_eq!(a.screeners, b.screeners);
    }

    #[test]
    fn test_cancelled_run_fails() {
        let u = sample();
        let c = ctx(&u.benchmark);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = engine().run(u, &c, &PreviousSignals::new(), &cancel).unwrap_err();
        assert!(matches!(err, ScreenerError::Cancelled));
    }

    #[test]
    fn test_empty_and_missing_benchmark() {
        let u = universe(Vec::new());
        let c = ctx(&u.benchmark);
        let err = engine().run(u, &c, &PreviousSignals::new(), &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, ScreenerError::EmptyUniverse));

        let mut u = sample();
        u.benchmark = PriceSeries::new("IDX", Vec::new());
        let err = engine().run(u, &c, &PreviousSignals::new(), &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, ScreenerError::UpstreamDataUnavailable { symbol: None, .. }));
    }

    #[test]
    fn test_no_candidates_aborts() {
        let u = universe(vec![ticker("CCC", BARS, 0.004, false)]);
        let c = ctx(&u.benchmark);
        let err = engine().run(u, &c, &PreviousSignals::new(), &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, ScreenerError::NoQualifyingCandidates));
    }
}
