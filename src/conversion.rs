//! Voltage → photoconductivity conversion and per-fluence aggregation.
//!
//! ```text
//! ΔG(t) = −(ΔV(t) / V_background) / K
//! FOM   = max ΔG / (β · e · fluence · (A_eff · area_correction) · M)
//! ```

use std::fmt::Debug;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::{FomConfig, PhysicalConstants};
use crate::domain::{BatchItem, ConductivityTrace, FomRow, FomTable, VoltageTrace};
use crate::error::{Result, TrmcError};

/// Convert a voltage transient into a conductivity transient.
pub fn to_conductivity(trace: &VoltageTrace, background_voltage: f64, k: f64) -> Result<ConductivityTrace> {
    if background_voltage == 0.0 {
        return Err(TrmcError::DivideByZero("background voltage is zero".into()));
    }
    if k == 0.0 {
        return Err(TrmcError::DivideByZero("calibration constant K is zero".into()));
    }
    if !background_voltage.is_finite() || !k.is_finite() {
        return Err(TrmcError::InvalidInput(format!(
            "background voltage ({background_voltage}) and K ({k}) must be finite"
        )));
    }

    let conductivity = trace
        .voltage()
        .iter()
        .map(|&v| -(v / background_voltage) / k)
        .collect();
    ConductivityTrace::new(trace.time().to_vec(), conductivity)
}

/// Peak conductivity and figure of merit for each `(fluence, trace)` pair.
///
/// Output rows follow input order. Fluence is in photons/cm², matching
/// `effective_area` in cm². The first failing pair fails the table; use
/// [`fom_row`] to keep the others.
pub fn max_g_and_fom(
    traces: &[(f64, ConductivityTrace)],
    fom: &FomConfig,
    constants: &PhysicalConstants,
) -> Result<FomTable> {
    let rows = traces
        .iter()
        .map(|(fluence, trace)| fom_row(*fluence, trace, fom, constants))
        .collect::<Result<Vec<_>>>()?;
    Ok(FomTable { rows })
}

/// Peak conductivity and figure of merit for one fluence.
pub fn fom_row(fluence: f64, trace: &ConductivityTrace, fom: &FomConfig, constants: &PhysicalConstants) -> Result<FomRow> {
    let max_conductivity = trace
        .max()
        .ok_or_else(|| TrmcError::empty_trace(format!("fluence={fluence:e}")))?;

    let area = fom.effective_area * fom.area_correction;
    let denom = fom.beta * constants.elementary_charge * fluence * area * fom.m;
    if denom == 0.0 {
        return Err(TrmcError::DivideByZero(format!(
            "figure-of-merit denominator is zero at fluence={fluence:e}"
        )));
    }

    Ok(FomRow {
        fluence,
        max_conductivity,
        fom: max_conductivity / denom,
    })
}

/// Remove the DC offset: subtract the mean of all samples with `t < until_time`.
///
/// Leaves the trace unchanged when no sample precedes `until_time`.
pub fn subtract_pretrigger_mean(trace: &VoltageTrace, until_time: f64) -> VoltageTrace {
    let n_pre = trace.time().partition_point(|&t| t < until_time);
    if n_pre == 0 {
        return trace.clone();
    }
    let mean = trace.voltage()[..n_pre].iter().sum::<f64>() / n_pre as f64;
    debug!(n_pre, mean, "subtracting pre-trigger offset");
    trace.with_voltage(trace.voltage().iter().map(|v| v - mean).collect())
}

/// Subtract a reference trace (typically the lowest-fluence shot) sample by sample.
///
/// Both traces must share one time axis.
pub fn subtract_trace(trace: &VoltageTrace, reference: &VoltageTrace) -> Result<VoltageTrace> {
    if trace.time() != reference.time() {
        return Err(TrmcError::InvalidInput(
            "trace does not share the reference time axis".into(),
        ));
    }
    let diff = trace
        .voltage()
        .iter()
        .zip(reference.voltage())
        .map(|(v, r)| v - r)
        .collect();
    Ok(trace.with_voltage(diff))
}

/// Convert every keyed trace independently; failures keep their key.
pub fn convert_all<K>(
    traces: &[(K, VoltageTrace)],
    background_voltage: f64,
    k: f64,
) -> Vec<BatchItem<K, ConductivityTrace>>
where
    K: Clone + Debug + Send + Sync,
{
    traces
        .par_iter()
        .map(|(key, trace)| {
            let outcome = to_conductivity(trace, background_voltage, k);
            if let Err(err) = &outcome {
                warn!(key = ?key, error = %err, "conversion failed; skipping");
            }
            BatchItem {
                key: key.clone(),
                outcome,
            }
        })
        .collect()
}
