//! Numeric helpers over price and volume slices.
//!
//! All windows are addressed by their inclusive end index so callers can ask
//! for "the value N bars ago" without slicing twice.

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Simple moving average of `window` values ending at index `end`.
pub fn sma_at(values: &[f64], window: usize, end: usize) -> Option<f64> {
    if window == 0 || end >= values.len() || end + 1 < window {
        return None;
    }
    mean(&values[end + 1 - window..=end])
}

/// Highest value of the `window` values ending at `end` (shorter if history
/// is shorter).
pub fn max_over(values: &[f64], window: usize, end: usize) -> Option<f64> {
    window_slice(values, window, end).map(|w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Lowest value of the `window` values ending at `end`.
pub fn min_over(values: &[f64], window: usize, end: usize) -> Option<f64> {
    window_slice(values, window, end).map(|w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

fn window_slice(values: &[f64], window: usize, end: usize) -> Option<&[f64]> {
    if window == 0 || end >= values.len() {
        return None;
    }
    let start = (end + 1).saturating_sub(window);
    Some(&values[start..=end])
}

/// Share of values less than or equal to the last one, as 0-100.
pub fn percentile_of_last(values: &[f64]) -> Option<f64> {
    let last = *values.last()?;
    let at_or_below = values.iter().filter(|v| **v <= last).count();
    Some(at_or_below as f64 / values.len() as f64 * 100.0)
}

/// Least-squares slope of `values` against their index.
pub fn regression_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = mean(values)?;

    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    Some(num / den)
}

/// On-balance volume, starting at zero on the first bar.
pub fn on_balance_volume(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut obv = Vec::with_capacity(closes.len());
    let mut running = 0.0;
    for i in 0..closes.len().min(volumes.len()) {
        if i > 0 {
            if closes[i] > closes[i - 1] {
                running += volumes[i];
            } else if closes[i] < closes[i - 1] {
                running -= volumes[i];
            }
        }
        obv.push(running);
    }
    obv
}

/// Sign of `value` as -1, 0, or 1, with a small dead zone around zero.
pub fn sign(value: f64) -> i8 {
    const EPS: f64 = 1e-12;
    if value > EPS {
        1
    } else if value < -EPS {
        -1
    } else {
        0
    }
}
