//! Input data model.
//!
//! Daily OHLCV series, fundamentals, and the calendar alignment rule that
//! turns whatever the acquisition layer delivered into gap-free series on the
//! benchmark's trading calendar.
//!
//! # Calendar rule
//!
//! - Benchmark sessions before a ticker's first bar are skipped.
//! - A missing session is forward-filled from the previous close (flat bar,
//!   zero volume) while the run of missing sessions is at most `max_fill_gap`.
//! - A longer run discards everything before it; history restarts at the next
//!   real bar.
//! - Ticker bars on dates the benchmark did not trade are dropped.

mod file_source;
mod provider;

pub use file_source::JsonDirSource;
pub use provider::{InMemorySource, MarketDataSource, ProviderError, TickerFeed, Universe};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Prices
// ============================================================================

/// A single daily bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Flat bar carrying a previous close forward.
    pub fn filled(date: NaiveDate, prev_close: f64) -> Self {
        Self {
            date,
            open: prev_close,
            high: prev_close,
            low: prev_close,
            close: prev_close,
            volume: 0.0,
        }
    }

    fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
            && self.close > 0.0
            && self.volume >= 0.0
    }
}

/// Ordered daily bars for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub bars: Vec<Bar>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.date).collect()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Bars up to and including `as_of`, sorted by date, invalid bars and
    /// duplicate dates removed (the later record for a date wins).
    pub fn cleaned(&self, as_of: NaiveDate) -> Self {
        let by_date: BTreeMap<NaiveDate, Bar> = self
            .bars
            .iter()
            .filter(|b| b.date <= as_of && b.is_valid())
            .map(|b| (b.date, *b))
            .collect();

        Self {
            symbol: self.symbol.clone(),
            bars: by_date.into_values().collect(),
        }
    }
}

/// Result of aligning a series to the benchmark calendar.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub series: PriceSeries,
    /// Sessions synthesized by forward-fill
    pub filled: usize,
    /// Ticker bars on non-calendar dates
    pub dropped: usize,
    /// Whether a gap longer than the fill limit reset the history
    pub truncated: bool,
}

/// Align `series` to `calendar` (ascending dates) following the module rule.
pub fn align_to_calendar(
    series: &PriceSeries,
    calendar: &[NaiveDate],
    max_fill_gap: usize,
) -> Alignment {
    let by_date: BTreeMap<NaiveDate, Bar> = series.bars.iter().map(|b| (b.date, *b)).collect();
    let calendar_set: std::collections::BTreeSet<NaiveDate> = calendar.iter().copied().collect();
    let dropped = by_date.keys().filter(|d| !calendar_set.contains(d)).count();

    let mut out: Vec<Bar> = Vec::with_capacity(calendar.len());
    let mut prev_close: Option<f64> = None;
    let mut gap = 0usize;
    let mut filled = 0usize;
    let mut pending_fill = 0usize;
    let mut truncated = false;

    for &date in calendar {
        if let Some(bar) = by_date.get(&date) {
            out.push(*bar);
            prev_close = Some(bar.close);
            gap = 0;
            filled += pending_fill;
            pending_fill = 0;
            continue;
        }

        // Before the first bar, or waiting for history to restart
        let Some(close) = prev_close else { continue };

        gap += 1;
        if gap > max_fill_gap {
            out.clear();
            prev_close = None;
            pending_fill = 0;
            filled = 0;
            truncated = true;
            continue;
        }
        out.push(Bar::filled(date, close));
        pending_fill += 1;
    }
    filled += pending_fill;

    Alignment {
        series: PriceSeries::new(series.symbol.clone(), out),
        filled,
        dropped,
        truncated,
    }
}

/// Benchmark closes keyed by date; its dates are the trading calendar.
#[derive(Debug, Clone, Default)]
pub struct Benchmark {
    pub symbol: String,
    closes: BTreeMap<NaiveDate, f64>,
}

impl Benchmark {
    /// Build from a raw series, cleaned up to `as_of`.
    pub fn from_series(series: &PriceSeries, as_of: NaiveDate) -> Self {
        let cleaned = series.cleaned(as_of);
        Self {
            symbol: cleaned.symbol,
            closes: cleaned.bars.iter().map(|b| (b.date, b.close)).collect(),
        }
    }

    pub fn calendar(&self) -> Vec<NaiveDate> {
        self.closes.keys().copied().collect()
    }

    pub fn close_on(&self, date: NaiveDate) -> Option<f64> {
        self.closes.get(&date).copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.closes.keys().next_back().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

// ============================================================================
// Fundamentals
// ============================================================================

/// Reporting period granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Quarterly,
    Annual,
}

/// One statement period. Any field may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialPeriod {
    pub period_end: NaiveDate,
    pub kind: PeriodKind,
    #[serde(default)]
    pub eps: Option<f64>,
    #[serde(default)]
    pub revenue: Option<f64>,
    #[serde(default)]
    pub net_income: Option<f64>,
    #[serde(default)]
    pub operating_income: Option<f64>,
    #[serde(default)]
    pub total_equity: Option<f64>,
    #[serde(default)]
    pub total_liabilities: Option<f64>,
}

impl FinancialPeriod {
    /// Operating margin in percent.
    pub fn operating_margin(&self) -> Option<f64> {
        match (self.operating_income, self.revenue) {
            (Some(op), Some(rev)) if rev > 0.0 => Some(op / rev * 100.0),
            _ => None,
        }
    }
}

/// Statement history for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    #[serde(default)]
    pub quarterly: Vec<FinancialPeriod>,
    #[serde(default)]
    pub annual: Vec<FinancialPeriod>,
}

impl Fundamentals {
    /// Periods sorted most recent first, restricted to `period_end <= as_of`.
    pub fn normalized(&self, as_of: NaiveDate) -> Self {
        let sort = |periods: &[FinancialPeriod]| {
            let mut v: Vec<FinancialPeriod> = periods
                .iter()
                .filter(|p| p.period_end <= as_of)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.period_end.cmp(&a.period_end));
            v.dedup_by_key(|p| p.period_end);
            v
        };

        Self {
            quarterly: sort(&self.quarterly),
            annual: sort(&self.annual),
        }
    }
}

// ============================================================================
// Ticker
// ============================================================================

/// Universe membership record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerProfile {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
}

impl TickerProfile {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: None,
            sector: None,
        }
    }
}

/// Everything the pipeline needs for one ticker, owned for the run.
#[derive(Debug, Clone)]
pub struct TickerData {
    pub profile: TickerProfile,
    pub prices: PriceSeries,
    pub fundamentals: Option<Fundamentals>,
}

impl TickerData {
    pub fn symbol(&self) -> &str {
        &self.profile.symbol
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn bar(day: u32, close: f64) -> Bar {
        Bar {
            date: d(day),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_align_forward_fills_short_gap() {
        let calendar: Vec<_> = (1..=6).map(d).collect();
        let series = PriceSeries::new(
            "AAA",
            vec![bar(1, 10.0), bar(2, 11.0), bar(5, 12.0), bar(6, 13.0)],
        );

        let aligned = align_to_calendar(&series, &calendar, 5);
        assert_eq!(aligned.series.len(), 6);
        assert_eq!(aligned.filled, 2);
        assert!(!aligned.truncated);
        let fill = aligned.series.bars[2];
        assert_eq!(fill.date, d(3));
        assert_eq!(fill.close, 11.0);
        assert_eq!(fill.volume, 0.0);
    }

    #[test]
    fn test_align_truncates_long_gap() {
        let calendar: Vec<_> = (1..=10).map(d).collect();
        let series = PriceSeries::new(
            "AAA",
            vec![bar(1, 10.0), bar(2, 11.0), bar(9, 12.0), bar(10, 13.0)],
        );

        let aligned = align_to_calendar(&series, &calendar, 3);
        assert!(aligned.truncated);
        assert_eq!(aligned.series.dates(), vec![d(9), d(10)]);
        assert_eq!(aligned.filled, 0);
    }

    #[test]
    fn test_align_skips_before_first_bar_and_drops_off_calendar() {
        let calendar = vec![d(1), d(2), d(4), d(5)];
        let series = PriceSeries::new("AAA", vec![bar(2, 10.0), bar(3, 10.5), bar(4, 11.0)]);

        let aligned = align_to_calendar(&series, &calendar, 5);
        assert_eq!(aligned.dropped, 1);
        assert_eq!(aligned.series.dates(), vec![d(2), d(4), d(5)]);
        assert_eq!(aligned.filled, 1);
    }

    #[test]
    fn test_cleaned_sorts_dedups_and_cuts_at_as_of() {
        let mut bad = bar(3, 10.0);
        bad.close = f64::NAN;
        let series = PriceSeries::new(
            "AAA",
            vec![bar(4, 12.0), bar(1, 10.0), bad, bar(1, 10.5), bar(9, 99.0)],
        );

        let cleaned = series.cleaned(d(5));
        assert_eq!(cleaned.dates(), vec![d(1), d(4)]);
        assert_eq!(cleaned.bars[0].close, 10.5);
    }

    #[test]
    fn test_benchmark_calendar_from_cleaned_series() {
        let series = PriceSeries::new("IDX", vec![bar(4, 101.0), bar(1, 100.0), bar(8, 102.0)]);
        let bench = Benchmark::from_series(&series, d(5));
        assert_eq!(bench.calendar(), vec![d(1), d(4)]);
        assert_eq!(bench.close_on(d(4)), Some(101.0));
        assert_eq!(bench.last_date(), Some(d(4)));
    }

    #[test]
    fn test_fundamentals_normalized_most_recent_first() {
        let period = |m: u32| FinancialPeriod {
            period_end: NaiveDate::from_ymd_opt(2024, m, 28).unwrap(),
            kind: PeriodKind::Quarterly,
            eps: Some(1.0),
            revenue: None,
            net_income: None,
            operating_income: None,
            total_equity: None,
            total_liabilities: None,
        };
        let f = Fundamentals {
            quarterly: vec![period(3), period(9), period(6), period(12)],
            annual: vec![],
        };

        let n = f.normalized(NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        let months: Vec<_> = n
            .quarterly
            .iter()
            .map(|p| p.period_end.format("%m").to_string())
            .collect();
        assert_eq!(months, vec!["09", "06", "03"]);
    }

    #[test]
    fn test_operating_margin() {
        let p = FinancialPeriod {
            period_end: d(1),
            kind: PeriodKind::Quarterly,
            eps: None,
            revenue: Some(200.0),
            net_income: None,
            operating_income: Some(30.0),
            total_equity: None,
            total_liabilities: None,
        };
        assert_eq!(p.operating_margin(), Some(15.0));
    }
}
