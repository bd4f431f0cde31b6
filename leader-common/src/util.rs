//! Small helpers shared across crates.

use std::path::PathBuf;

/// Expand `~` and `$VAR` references in a configured path.
///
/// Falls back to the literal string when expansion fails (unset variable).
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

/// Round to a fixed number of decimal places.
///
/// Published numbers go through this so reruns serialize identically.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
