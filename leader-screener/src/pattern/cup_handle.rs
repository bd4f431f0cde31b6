//! Cup-with-handle scoring.
//!
//! Geometry is read off the last `cup_max_bars` bars: the left rim is the
//! highest high that still leaves room for a handle, the bottom is the lowest
//! low after it, the right rim is the highest high after the bottom, and the
//! handle is everything after the right rim.

use super::{arg_max, arg_min, market_context, DimensionalScores, PatternConfig};
use crate::data::{Bar, PriceSeries};
use crate::indicators::IndicatorSet;

#[derive(Debug, Clone, Copy)]
struct CupShape {
    left: usize,
    left_high: f64,
    bottom: usize,
    bottom_low: f64,
    right: usize,
    right_high: f64,
}

pub(super) fn score(
    series: &PriceSeries,
    indicators: &IndicatorSet,
    config: &PatternConfig,
) -> DimensionalScores {
    let len = config.cup_max_bars.min(series.len());
    let window = &series.bars[series.len() - len..];
    let Some(cup) = find_cup(window, config.handle_min_bars) else {
        return DimensionalScores::default();
    };

    let handle = &window[cup.right + 1..];
    let depth = (cup.left_high - cup.bottom_low) / cup.left_high * 100.0;
    let depth_score = band_score(depth, config.cup_min_depth, config.cup_max_depth);
    let recovery = (cup.right_high - cup.bottom_low) / (cup.left_high - cup.bottom_low);

    let handle_low = handle.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let handle_score = if handle.is_empty() {
        0.0
    } else {
        let handle_depth = (cup.right_high - handle_low) / cup.right_high * 100.0;
        let midpoint = cup.bottom_low + (cup.left_high - cup.bottom_low) / 2.0;
        let shallow = if handle_depth <= config.handle_max_depth { 1.0 } else { 0.0 };
        let upper_half = if handle_low >= midpoint { 1.0 } else { 0.0 };
        0.5 * shallow + 0.5 * upper_half
    };
    let technical = 0.4 * depth_score + 0.3 * recovery.clamp(0.0, 1.0) + 0.3 * handle_score;

    let cup_volume = avg_volume(&window[cup.left..=cup.right]);
    let dry_up = match (avg_volume(handle), cup_volume) {
        (Some(h), Some(c)) if c > 0.0 => (1.0 - h / c).clamp(0.0, 1.0),
        _ => 0.0,
    };
    let side_balance = match (
        avg_volume(&window[cup.left..cup.bottom]),
        avg_volume(&window[cup.bottom..=cup.right]),
    ) {
        (Some(left), Some(right)) if left > 0.0 => (right / left).clamp(0.0, 2.0) / 2.0,
        _ => 0.0,
    };
    let volume = 0.5 * dry_up + 0.5 * side_balance;

    let cup_len = cup.right - cup.left;
    let cup_time = if cup_len < config.cup_min_bars {
        cup_len as f64 / config.cup_min_bars as f64
    } else {
        1.0
    };
    let handle_time = if handle.is_empty() {
        0.0
    } else if handle.len() < config.handle_min_bars {
        handle.len() as f64 / config.handle_min_bars as f64
    } else if handle.len() > config.handle_max_bars {
        config.handle_max_bars as f64 / handle.len() as f64
    } else {
        1.0
    };
    let temporal = 0.6 * cup_time + 0.4 * handle_time;

    DimensionalScores::new(technical, volume, temporal, market_context(indicators))
}

fn find_cup(window: &[Bar], handle_min_bars: usize) -> Option<CupShape> {
    let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = window.iter().map(|b| b.low).collect();

    let search_end = window.len().checked_sub(handle_min_bars + 2)?;
    let (left, left_high) = arg_max(&highs[..=search_end])?;
    let (bottom_off, bottom_low) = arg_min(&lows[left + 1..])?;
    let bottom = left + 1 + bottom_off;
    let (right_off, right_high) = arg_max(highs.get(bottom + 1..)?)?;
    let right = bottom + 1 + right_off;

    if left_high <= 0.0 || bottom_low >= left_high {
        return None;
    }
    Some(CupShape {
        left,
        left_high,
        bottom,
        bottom_low,
        right,
        right_high,
    })
}

/// 1 inside `[min, max]`, falling off linearly outside.
fn band_score(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        (value / min).max(0.0)
    } else if value > max {
        (1.0 - (value - max) / max).max(0.0)
    } else {
        1.0
    }
}

fn avg_volume(bars: &[Bar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    Some(bars.iter().map(|b| b.volume).sum::<f64>() / bars.len() as f64)
}
