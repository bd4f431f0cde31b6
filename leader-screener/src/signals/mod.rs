//! Signal recency tracking.
//!
//! Every screener snapshot entry carries the date its ticker first qualified
//! in an unbroken run of publications. Signals from different screeners on
//! the same ticker stay separate events.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A screener judged a ticker to qualify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub symbol: String,
    pub screener: String,
    pub signal_date: NaiveDate,
    /// Supporting values at the time of the signal
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Signal dates from a screener's previous publication.
#[derive(Debug, Clone, Default)]
pub struct SignalHistory {
    dates: BTreeMap<String, NaiveDate>,
}

impl SignalHistory {
    pub fn new(dates: BTreeMap<String, NaiveDate>) -> Self {
        Self { dates }
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a SignalEvent>) -> Self {
        Self {
            dates: events
                .into_iter()
                .map(|e| (e.symbol.clone(), e.signal_date))
                .collect(),
        }
    }

    /// Signal date for `symbol` qualifying in a run as of `as_of`.
    ///
    /// A ticker that also qualified last time keeps its earlier date; a new
    /// one signals on `as_of`.
    pub fn signal_date(&self, symbol: &str, as_of: NaiveDate) -> NaiveDate {
        match self.dates.get(symbol) {
            Some(&previous) if previous <= as_of => previous,
            _ => as_of,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Events with `as_of - days <= signal_date <= as_of`.
///
/// `days = 0` returns today's signals only. Results are ordered by signal
/// date (newest first), then screener, then symbol. No deduplication across
/// screeners.
pub fn recent_signals(
    events: impl IntoIterator<Item = SignalEvent>,
    as_of: NaiveDate,
    days: u32,
) -> Vec<SignalEvent> {
    let earliest = as_of
        .checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(NaiveDate::MIN);

    let mut recent: Vec<SignalEvent> = events
        .into_iter()
        .filter(|e| e.signal_date >= earliest && e.signal_date <= as_of)
        .collect();
    recent.sort_by(|a, b| {
        b.signal_date
            .cmp(&a.signal_date)
            .then_with(|| a.screener.cmp(&b.screener))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    recent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn event(symbol: &str, screener: &str, d: u32) -> SignalEvent {
        SignalEvent {
            symbol: symbol.into(),
            screener: screener.into(),
            signal_date: day(d),
            metrics: BTreeMap::new(),
        }
    }

    fn sample() -> Vec<SignalEvent> {
        vec![
            event("AAA", "vcp", 10),
            event("AAA", "rs_new_high", 10),
            event("BBB", "vcp", 9),
            event("CCC", "trend_template", 8),
            event("DDD", "vcp", 11),
        ]
    }

    #[test]
    fn test_days_zero_is_today_only() {
        let got = recent_signals(sample(), day(10), 0);
        let keys: Vec<_> = got.iter().map(|e| (e.symbol.as_str(), e.screener.as_str())).collect();
        assert_eq!(keys, vec![("AAA", "rs_new_high"), ("AAA", "vcp")]);
    }

    #[test]
    fn test_days_one_includes_yesterday() {
        let got = recent_signals(sample(), day(10), 1);
        let symbols: Vec<_> = got.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "AAA", "BBB"]);
        assert!(got.iter().all(|e| e.signal_date >= day(9) && e.signal_date <= day(10)));
    }

    #[test]
    fn test_window_is_inclusive_and_excludes_future() {
        let got = recent_signals(sample(), day(10), 2);
        assert_eq!(got.len(), 4);
        assert!(got.iter().all(|e| e.symbol != "DDD"));
        assert_eq!(got.last().map(|e| e.signal_date), Some(day(8)));
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        assert_eq!(recent_signals(sample(), day(10), u32::MAX).len(), 4);
    }

    #[test]
    fn test_carry_forward() {
        let history =
            SignalHistory::from_events(&[event("AAA", "vcp", 3), event("BBB", "vcp", 20)]);
        assert_eq!(history.signal_date("AAA", day(10)), day(3));
        assert_eq!(history.signal_date("NEW", day(10)), day(10));
        // A date after the run's as-of is not carried backwards
        assert_eq!(history.signal_date("BBB", day(10)), day(10));
    }
}
