//! Indicator calculator.
//!
//! Derives the technical feature set for one ticker from its calendar-aligned
//! daily series and the benchmark index: simple moving averages, the
//! relative-strength line and its percentile rank, volume ratio, OBV trend,
//! momentum, and the eight-point trend template.

pub mod math;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::{Benchmark, PriceSeries};
use crate::error::{Result, ScreenerError};

// ============================================================================
// Configuration
// ============================================================================

/// Indicator windows and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Bars required before anything is computed
    #[serde(default = "default_min_history")]
    pub min_history: usize,

    /// Multiplier applied to the close / benchmark ratio
    #[serde(default = "default_rs_scale")]
    pub rs_scale: f64,

    /// Window for the RS new-high flag, today included
    #[serde(default = "default_lookback_year")]
    pub rs_new_high_lookback: usize,

    /// Window the RS score ranks today's RS value against
    #[serde(default = "default_lookback_year")]
    pub rs_rank_lookback: usize,

    /// Window for the 52-week high and low
    #[serde(default = "default_lookback_year")]
    pub high_low_lookback: usize,

    /// "Trend up" compares a moving average with its value this many bars ago
    #[serde(default = "default_trend_lookback")]
    pub trend_lookback: usize,

    /// Trailing average volume window in weeks of five sessions
    #[serde(default = "default_volume_avg_weeks")]
    pub volume_avg_weeks: usize,

    #[serde(default = "default_obv_window")]
    pub obv_window: usize,

    #[serde(default = "default_momentum_period")]
    pub momentum_period: usize,

    /// RS score needed for the last trend-template criterion
    #[serde(default = "default_trend_template_min_rs")]
    pub trend_template_min_rs: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            min_history: default_min_history(),
            rs_scale: default_rs_scale(),
            rs_new_high_lookback: default_lookback_year(),
            rs_rank_lookback: default_lookback_year(),
            high_low_lookback: default_lookback_year(),
            trend_lookback: default_trend_lookback(),
            volume_avg_weeks: default_volume_avg_weeks(),
            obv_window: default_obv_window(),
            momentum_period: default_momentum_period(),
            trend_template_min_rs: default_trend_template_min_rs(),
        }
    }
}

fn default_min_history() -> usize {
    200
}

fn default_rs_scale() -> f64 {
    100.0
}

fn default_lookback_year() -> usize {
    252 // trading days
}

fn default_trend_lookback() -> usize {
    20
}

fn default_volume_avg_weeks() -> usize {
    10
}

fn default_obv_window() -> usize {
    20
}

fn default_momentum_period() -> usize {
    20
}

fn default_trend_template_min_rs() -> f64 {
    70.0
}

// ============================================================================
// Indicator Set
// ============================================================================

/// The eight-point stage-2 trend checklist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendTemplate {
    pub price_above_sma150_and_sma200: bool,
    pub sma150_above_sma200: bool,
    pub sma200_trending_up: bool,
    pub sma50_above_sma150_and_sma200: bool,
    pub price_above_sma50: bool,
    pub price_above_low_by_25pct: bool,
    pub price_within_25pct_of_high: bool,
    pub rs_score_above_min: bool,
}

impl TrendTemplate {
    pub const CRITERIA: u8 = 8;

    /// Number of satisfied criteria.
    pub fn count(&self) -> u8 {
        [
            self.price_above_sma150_and_sma200,
            self.sma150_above_sma200,
            self.sma200_trending_up,
            self.sma50_above_sma150_and_sma200,
            self.price_above_sma50,
            self.price_above_low_by_25pct,
            self.price_within_25pct_of_high,
            self.rs_score_above_min,
        ]
        .iter()
        .filter(|c| **c)
        .count() as u8
    }
}

/// Technical features for one ticker as of its last bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub bars: usize,
    pub close: f64,
    pub sma50: f64,
    pub sma150: f64,
    pub sma200: f64,
    pub sma50_trend_up: bool,
    pub sma150_trend_up: bool,
    pub sma200_trend_up: bool,
    pub high_52w: f64,
    pub low_52w: f64,
    pub rs_line: f64,
    /// Percentile rank of today's RS value in its trailing window, 0-100
    pub rs_score: f64,
    pub rs_new_high: bool,
    /// `None` when the trailing window traded no volume
    pub volume_ratio: Option<f64>,
    /// -1, 0, or 1
    pub obv_trend: i8,
    /// Percent change over the momentum period
    pub momentum_20d: f64,
    pub trend_template: TrendTemplate,
}

impl IndicatorSet {
    pub fn trend_template_count(&self) -> u8 {
        self.trend_template.count()
    }
}

// ============================================================================
// Calculator
// ============================================================================

/// Computes [`IndicatorSet`]s with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct IndicatorCalculator {
    config: IndicatorConfig,
}

impl IndicatorCalculator {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Compute indicators for a series already aligned to the benchmark
    /// calendar.
    pub fn compute(&self, series: &PriceSeries, benchmark: &Benchmark) -> Result<IndicatorSet> {
        let cfg = &self.config;
        let n = series.len();
        if n < cfg.min_history {
            return Err(ScreenerError::InsufficientHistory {
                symbol: series.symbol.clone(),
                required: cfg.min_history,
                available: n,
            });
        }

        let closes = series.closes();
        let volumes = series.volumes();
        let last = n - 1;
        let close = closes[last];

        let rs_line = self.rs_line(series, benchmark)?;
        let sma = |window: usize, end: usize| math::sma_at(&closes, window, end);
        let sma50 = sma(50, last).unwrap_or(close);
        let sma150 = sma(150, last).unwrap_or(close);
        let sma200 = sma(200, last).unwrap_or(close);
        let trend_up = |window: usize, today: f64| {
            last.checked_sub(cfg.trend_lookback)
                .and_then(|prior| sma(window, prior))
                .is_some_and(|before| today > before)
        };

        let high_52w =
            math::max_over(&series.highs(), cfg.high_low_lookback, last).unwrap_or(close);
        let low_52w = math::min_over(&series.lows(), cfg.high_low_lookback, last).unwrap_or(close);

        let rs_today = rs_line[last];
        let rs_max = math::max_over(&rs_line, cfg.rs_new_high_lookback, last).unwrap_or(rs_today);
        let rank_start = n.saturating_sub(cfg.rs_rank_lookback);
        let rs_score = math::percentile_of_last(&rs_line[rank_start..]).unwrap_or(0.0);

        let avg_window = cfg.volume_avg_weeks * 5;
        let volume_ratio = math::mean(&volumes[last.saturating_sub(avg_window)..last])
            .filter(|avg| *avg > 0.0)
            .map(|avg| volumes[last] / avg);

        let obv = math::on_balance_volume(&closes, &volumes);
        let obv_start = n.saturating_sub(cfg.obv_window);
        let obv_trend = math::regression_slope(&obv[obv_start..]).map(math::sign).unwrap_or(0);

        let momentum_20d = last
            .checked_sub(cfg.momentum_period)
            .map(|prior| (close / closes[prior] - 1.0) * 100.0)
            .unwrap_or(0.0);

        let sma200_trend_up = trend_up(200, sma200);
        let trend_template = TrendTemplate {
            price_above_sma150_and_sma200: close > sma150 && close > sma200,
            sma150_above_sma200: sma150 > sma200,
            sma200_trending_up: sma200_trend_up,
            sma50_above_sma150_and_sma200: sma50 > sma150 && sma50 > sma200,
            price_above_sma50: close > sma50,
            price_above_low_by_25pct: close >= low_52w * 1.25,
            price_within_25pct_of_high: close >= high_52w * 0.75,
            rs_score_above_min: rs_score >= cfg.trend_template_min_rs,
        };

        Ok(IndicatorSet {
            symbol: series.symbol.clone(),
            as_of: series.bars[last].date,
            bars: n,
            close,
            sma50,
            sma150,
            sma200,
            sma50_trend_up: trend_up(50, sma50),
            sma150_trend_up: trend_up(150, sma150),
            sma200_trend_up,
            high_52w,
            low_52w,
            rs_line: rs_today,
            rs_score,
            // Ties with the window maximum count as a new high
            rs_new_high: rs_today >= rs_max,
            volume_ratio,
            obv_trend,
            momentum_20d,
            trend_template,
        })
    }

    fn rs_line(&self, series: &PriceSeries, benchmark: &Benchmark) -> Result<Vec<f64>> {
        series
            .bars
            .iter()
            .map(|bar| match benchmark.close_on(bar.date) {
                Some(bench) if bench > 0.0 => Ok(bar.close / bench * self.config.rs_scale),
                _ => Err(ScreenerError::UpstreamDataUnavailable {
                    symbol: Some(series.symbol.clone()),
                    reason: format!("no benchmark close on {}", bar.date),
                }),
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::Bar;
    use chrono::Duration;

    pub(crate) fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    /// Series with one bar per calendar day, closes from `close_at(i)`.
    pub(crate) fn series_from(
        symbol: &str,
        n: usize,
        close_at: impl Fn(usize) -> f64,
    ) -> PriceSeries {
        let bars = (0..n)
            .map(|i| {
                let close = close_at(i);
                Bar {
                    date: start() + Duration::days(i as i64),
                    open: close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 1_000.0 + i as f64,
                }
            })
            .collect();
        PriceSeries::new(symbol, bars)
    }

    pub(crate) fn flat_benchmark(n: usize) -> Benchmark {
        let series = series_from("IDX", n, |_| 100.0);
        let as_of = series.last_date().unwrap();
        Benchmark::from_series(&series, as_of)
    }

    #[test]
    fn test_insufficient_history() {
        let calc = IndicatorCalculator::default();
        let series = series_from("AAA", 199, |i| 10.0 + i as f64);
        let err = calc.compute(&series, &flat_benchmark(199)).unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::InsufficientHistory { required: 200, available: 199, .. }
        ));
    }

    #[test]
    fn test_uptrend_passes_trend_template() {
        let calc = IndicatorCalculator::default();
        let n = 300;
        let series = series_from("AAA", n, |i| 10.0 * 1.01f64.powi(i as i32));
        let ind = calc.compute(&series, &flat_benchmark(n)).unwrap();

        assert_eq!(ind.bars, n);
        assert!(ind.rs_new_high);
        assert_eq!(ind.rs_score, 100.0);
        assert!(ind.sma50 > ind.sma150 && ind.sma150 > ind.sma200);
        assert!(ind.sma200_trend_up);
        assert_eq!(ind.obv_trend, 1);
        assert_eq!(ind.trend_template_count(), TrendTemplate::CRITERIA);
        assert!((ind.momentum_20d - (1.01f64.powi(20) - 1.0) * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rs_new_high_tie_is_true() {
        let calc = IndicatorCalculator::default();
        let n = 220;
        // Rally to a peak, fall back, then return exactly to it
        let series = series_from("AAA", n, |i| match i {
            0..=99 => 50.0 + i as f64 * 0.5,
            100..=199 => 99.5 - (i - 99) as f64 * 0.1,
            _ => 99.5,
        });
        let ind = calc.compute(&series, &flat_benchmark(n)).unwrap();
        assert!(ind.rs_new_high);
    }

    #[test]
    fn test_downtrend_flags() {
        let calc = IndicatorCalculator::default();
        let n = 260;
        let series = series_from("AAA", n, |i| 200.0 - i as f64 * 0.5);
        let ind = calc.compute(&series, &flat_benchmark(n)).unwrap();

        assert!(!ind.rs_new_high);
        assert!(!ind.sma50_trend_up);
        assert_eq!(ind.obv_trend, -1);
        assert!(ind.momentum_20d < 0.0);
        assert!(ind.trend_template_count() <= 2);
    }

    #[test]
    fn test_volume_ratio_excludes_today() {
        let calc = IndicatorCalculator::default();
        let n = 210;
        let mut series = series_from("AAA", n, |_| 10.0);
        for bar in series.bars.iter_mut() {
            bar.volume = 100.0;
        }
        series.bars[n - 1].volume = 300.0;
        let ind = calc.compute(&series, &flat_benchmark(n)).unwrap();
        assert_eq!(ind.volume_ratio, Some(3.0));
    }

    #[test]
    fn test_missing_benchmark_close_is_upstream_error() {
        let calc = IndicatorCalculator::default();
        let series = series_from("AAA", 210, |_| 10.0);
        let err = calc.compute(&series, &flat_benchmark(100)).unwrap_err();
        assert!(matches!(err, ScreenerError::UpstreamDataUnavailable { symbol: Some(_), .. }));
    }
}
