//! Peak-aligned time windows.
//!
//! Windows are located by nearest-sample lookup, so irregular sampling is fine.

use tracing::debug;

use crate::domain::TraceFrame;
use crate::error::{Result, TrmcError};
use crate::math::nearest_index;

/// Cut a window around the peak of the first column and shift time so the peak is at `t = 0`.
///
/// The window starts at the sample nearest `t_peak - time_before` and ends (inclusive)
/// at the sample nearest `t_peak + time_after`, or at the last sample when
/// `time_after` is `None`. All columns are cut with the same indices.
pub fn offset_to_peak(frame: &TraceFrame, time_before: f64, time_after: Option<f64>) -> Result<TraceFrame> {
    if frame.is_empty() {
        return Err(TrmcError::empty_trace("offset_to_peak"));
    }
    if !(time_before.is_finite() && time_before >= 0.0) {
        return Err(TrmcError::InvalidInput(format!(
            "time_before must be finite and >= 0, got {time_before}"
        )));
    }
    if let Some(after) = time_after {
        if !(after.is_finite() && after >= 0.0) {
            return Err(TrmcError::InvalidInput(format!(
                "time_after must be finite and >= 0, got {after}"
            )));
        }
    }

    let time = frame.time();
    let first = frame.column(0).unwrap_or_default();
    let peak = peak_index(first).ok_or_else(|| TrmcError::empty_trace("offset_to_peak: no finite sample"))?;
    let t_peak = time[peak];

    let lo = nearest_index(time, t_peak - time_before);
    let hi = match time_after {
        Some(after) => nearest_index(time, t_peak + after),
        None => time.len() - 1,
    };
    debug!(peak, t_peak, lo, hi, "peak-aligned window");

    let shifted = time[lo..=hi].iter().map(|t| t - t_peak).collect();
    let columns = frame
        .columns()
        .iter()
        .map(|col| col[lo..=hi].to_vec())
        .collect();
    TraceFrame::new(shifted, columns)
}

/// First index of the largest finite value.
fn peak_index(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if b >= v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
