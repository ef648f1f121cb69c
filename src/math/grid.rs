//! Sampling grids and nearest-sample lookup.

use crate::error::{Result, TrmcError};

/// Generate `steps` evenly spaced points between `min` and `max` (inclusive).
pub fn linspace(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && max >= min) {
        return Err(TrmcError::InvalidInput(format!(
            "invalid grid range: min={min}, max={max} (must be finite and max>=min)"
        )));
    }
    if steps < 2 {
        return Err(TrmcError::InvalidInput("grid steps must be >= 2".into()));
    }

    let step = (max - min) / (steps as f64 - 1.0);
    let mut out = Vec::with_capacity(steps);
    for i in 0..steps - 1 {
        out.push(min + step * i as f64);
    }
    // Land exactly on the endpoint.
    out.push(max);
    Ok(out)
}

/// Index of the sample in `xs` (sorted ascending) closest to `target`.
///
/// Ties resolve to the lower index. Works for irregular spacing. An empty
/// slice yields 0.
pub fn nearest_index(xs: &[f64], target: f64) -> usize {
    let upper = xs.partition_point(|&x| x < target);
    if upper == 0 {
        return 0;
    }
    if upper == xs.len() {
        return xs.len() - 1;
    }
    let below = upper - 1;
    if (target - xs[below]) <= (xs[upper] - target) {
        below
    } else {
        upper
    }
}
