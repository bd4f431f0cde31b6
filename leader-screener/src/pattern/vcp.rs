//! Volatility contraction scoring.
//!
//! The base is the last `vcp_base_bars` bars split into `vcp_segments`
//! equal segments. A textbook base shows each segment's high-low range and
//! average volume shrinking left to right, with the close pressing against
//! the base high.

use super::{arg_max, market_context, DimensionalScores, PatternConfig};
use crate::data::PriceSeries;
use crate::indicators::IndicatorSet;

/// Close within this fraction of the base high scores full proximity.
const PIVOT_BAND: f64 = 0.15;

struct Segment {
    range_pct: f64,
    avg_volume: f64,
}

pub(super) fn score(
    series: &PriceSeries,
    indicators: &IndicatorSet,
    config: &PatternConfig,
) -> DimensionalScores {
    let segments_wanted = config.vcp_segments.max(2);
    let base_len = config.vcp_base_bars.min(series.len());
    if base_len < segments_wanted * 2 {
        return DimensionalScores::default();
    }

    let base = &series.bars[series.len() - base_len..];
    let seg_len = base_len / segments_wanted;
    let segments: Vec<Segment> = (0..segments_wanted)
        .map(|s| {
            let start = s * seg_len;
            let end = if s + 1 == segments_wanted { base_len } else { start + seg_len };
            let bars = &base[start..end];
            let high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            Segment {
                range_pct: if high > 0.0 { (high - low) / high * 100.0 } else { 0.0 },
                avg_volume: bars.iter().map(|b| b.volume).sum::<f64>() / bars.len() as f64,
            }
        })
        .collect();

    let steps = (segments.len() - 1) as f64;
    let range_contractions = segments
        .windows(2)
        .filter(|w| w[1].range_pct < w[0].range_pct)
        .count() as f64;
    let volume_contractions = segments
        .windows(2)
        .filter(|w| w[1].avg_volume < w[0].avg_volume)
        .count() as f64;

    let (first, last) = (&segments[0], &segments[segments.len() - 1]);
    let tightness = ratio_drop(last.range_pct, first.range_pct);
    let dry_up = ratio_drop(last.avg_volume, first.avg_volume);

    let highs: Vec<f64> = base.iter().map(|b| b.high).collect();
    let (high_idx, base_high) = arg_max(&highs).unwrap_or((0, 0.0));
    let close = indicators.close;
    let proximity = if base_high > 0.0 {
        1.0 - ((base_high - close) / base_high / PIVOT_BAND)
    } else {
        0.0
    };

    let technical =
        0.5 * range_contractions / steps + 0.25 * tightness + 0.25 * proximity.clamp(0.0, 1.0);
    let volume = 0.6 * volume_contractions / steps + 0.4 * dry_up;

    let length = base_len as f64 / config.vcp_base_bars as f64;
    let recency = (high_idx + 1) as f64 / base_len as f64;
    let temporal = 0.5 * length + 0.5 * recency;

    DimensionalScores::new(technical, volume, temporal, market_context(indicators))
}

/// How far `current` has fallen below `initial`, as a share of `initial`.
fn ratio_drop(current: f64, initial: f64) -> f64 {
    if initial > 0.0 {
        (1.0 - current / initial).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Bar;
    use crate::indicators::tests::{flat_benchmark, series_from};
    use crate::indicators::IndicatorCalculator;

    /// Uptrend followed by a 60-bar base whose swings and volume shrink.
    fn contracting_series() -> PriceSeries {
        let n = 300;
        let mut series = series_from("VCP", n, |i| {
            if i < 240 {
                50.0 + i as f64 * 0.2
            } else {
                let j = i - 240;
                let amplitude = match j {
                    0..=19 => 8.0,
                    20..=39 => 4.0,
                    _ => 1.0,
                };
                98.0 - amplitude * ((j % 10) as f64 / 10.0)
            }
        });
        for (i, bar) in series.bars.iter_mut().enumerate() {
            bar.volume = match i {
                0..=239 => 5_000.0,
                240..=259 => 4_000.0,
                260..=279 => 2_500.0,
                _ => 1_000.0,
            };
            if i >= 240 {
                // Widen the intrabar range in proportion to the segment swing
                let j = i - 240;
                let spread = match j {
                    0..=19 => 4.0,
                    20..=39 => 2.0,
                    _ => 0.5,
                };
                *bar = Bar {
                    high: bar.close + spread,
                    low: bar.close - spread,
                    ..*bar
                };
            }
        }
        series
    }

    #[test]
    fn test_contracting_base_scores_high_on_price_and_volume() {
        let series = contracting_series();
        let ind = IndicatorCalculator::default()
            .compute(&series, &flat_benchmark(series.len()))
            .unwrap();
        let scores = score(&series, &ind, &PatternConfig::default());

        assert!(scores.volume_confirmation > 0.8, "{scores:?}");
        assert!(scores.technical_quality > 0.6, "{scores:?}");
        assert!(scores.temporal_validity > 0.5, "{scores:?}");
    }

    #[test]
    fn test_expanding_base_scores_low() {
        let n = 300;
        let mut series = series_from("EXP", n, |i| 100.0 + ((i % 10) as f64) * (i as f64 / 60.0));
        for (i, bar) in series.bars.iter_mut().enumerate() {
            bar.volume = 1_000.0 + i as f64 * 50.0;
        }
        let ind = IndicatorCalculator::default().compute(&series, &flat_benchmark(n)).unwrap();
        let scores = score(&series, &ind, &PatternConfig::default());

        assert_eq!(scores.volume_confirmation, 0.0);
        assert!(scores.technical_quality < 0.5, "{scores:?}");
    }

    #[test]
    fn test_short_series_scores_zero() {
        let series = series_from("S", 4, |_| 10.0);
        let ind_series = series_from("S", 250, |_| 10.0);
        let ind = IndicatorCalculator::default()
            .compute(&ind_series, &flat_benchmark(250))
            .unwrap();
        assert_eq!(score(&series, &ind, &PatternConfig::default()), DimensionalScores::default());
    }
}
