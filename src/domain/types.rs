//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting and conversion
//! - exported to JSON/CSV
//! - handed to an external plotting layer (fit windows, overlay curves)
//!
//! Constructors validate their invariants once; the numerical code downstream
//! assumes validated values.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrmcError};

/// Version of the model-kind enumeration and parameter layout written to fit documents.
///
/// Bump when a model's parameter order or meaning changes.
pub const MODEL_SCHEMA_VERSION: u32 = 1;

/// A frequency sweep of the cavity reflectivity.
///
/// Frequencies are in Hz and strictly increasing. Values are either a normalized
/// reflectivity ratio or a raw detector voltage, depending on the exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    frequency: Vec<f64>,
    values: Vec<f64>,
}

impl Sweep {
    pub fn new(frequency: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if frequency.is_empty() {
            return Err(TrmcError::InvalidInput("sweep has no samples".into()));
        }
        if frequency.len() != values.len() {
            return Err(TrmcError::InvalidInput(format!(
                "sweep length mismatch: {} frequencies vs {} values",
                frequency.len(),
                values.len()
            )));
        }
        if frequency.iter().chain(values.iter()).any(|v| !v.is_finite()) {
            return Err(TrmcError::InvalidInput("sweep contains non-finite samples".into()));
        }
        ensure_strictly_increasing(&frequency, "sweep frequency")?;
        Ok(Self { frequency, values })
    }

    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    /// Always `false` for a constructed sweep; provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    pub fn frequency(&self) -> &[f64] {
        &self.frequency
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Index of the global minimum value (first occurrence on ties).
    pub fn argmin(&self) -> usize {
        let mut best = 0;
        for (i, &v) in self.values.iter().enumerate().skip(1) {
            if v < self.values[best] {
                best = i;
            }
        }
        best
    }
}

/// Whether the upper edge of a fit window includes the sample `min + half_width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WindowBoundary {
    /// `[min - hw, min + hw]`, i.e. `2·hw + 1` samples.
    Inclusive,
    /// `[min - hw, min + hw)`, i.e. `2·hw` samples.
    Exclusive,
}

/// Contiguous index range `[lo, hi)` into a [`Sweep`], centered on its minimum.
///
/// Windows that would run past either end of the sweep are clipped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitWindow {
    pub lo: usize,
    pub hi: usize,
    /// Index of the minimum the window was built around.
    pub center: usize,
}

impl FitWindow {
    pub fn around(center: usize, half_width: usize, boundary: WindowBoundary, len: usize) -> Self {
        let extra = match boundary {
            WindowBoundary::Inclusive => 1,
            WindowBoundary::Exclusive => 0,
        };
        let lo = center.saturating_sub(half_width);
        let hi = center.saturating_add(half_width).saturating_add(extra).min(len);
        Self { lo, hi, center }
    }

    pub fn len(&self) -> usize {
        self.hi.saturating_sub(self.lo)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frequencies<'a>(&self, sweep: &'a Sweep) -> &'a [f64] {
        &sweep.frequency()[self.lo..self.hi]
    }

    pub fn values<'a>(&self, sweep: &'a Sweep) -> &'a [f64] {
        &sweep.values()[self.lo..self.hi]
    }
}

/// Closed-form resonance models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// `(R0 + Rinf·x²)/(1 + x²)` with `x = 2(f − f0)/w`.
    Lorentzian,
    /// Lorentzian plus `m·f + b`.
    LorentzianLinear,
    /// `c0 + c1·f + c2·f²`.
    Quadratic,
}

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Lorentzian => "Lorentzian",
            ModelKind::LorentzianLinear => "Lorentzian + line",
            ModelKind::Quadratic => "Quadratic",
        }
    }

    pub fn param_len(self) -> usize {
        self.param_names().len()
    }

    /// Parameter names, in vector order.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::Lorentzian => &["f0", "w", "R0", "Rinf"],
            ModelKind::LorentzianLinear => &["f0", "w", "R0", "Rinf", "m", "b"],
            ModelKind::Quadratic => &["c0", "c1", "c2"],
        }
    }

    /// Historical window edge for this kind: Lorentzian fits included the
    /// upper edge sample, polynomial fits did not.
    pub fn default_boundary(self) -> WindowBoundary {
        match self {
            ModelKind::Lorentzian | ModelKind::LorentzianLinear => WindowBoundary::Inclusive,
            ModelKind::Quadratic => WindowBoundary::Exclusive,
        }
    }
}

/// Lorentzian line-shape parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LorentzianParams {
    /// Resonant frequency (Hz).
    pub f0: f64,
    /// Full width at half depth (Hz).
    pub linewidth: f64,
    /// On-resonance value.
    pub r0: f64,
    /// Off-resonance asymptote.
    pub r_inf: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadraticParams {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
    /// Frequency of the minimum of the densely resampled polynomial.
    pub min_frequency: f64,
    /// Value of the densely resampled polynomial at `min_frequency`.
    pub min_value: f64,
}

/// Fitted parameters, tagged by model kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitParams {
    Lorentzian(LorentzianParams),
    LorentzianLinear {
        lorentzian: LorentzianParams,
        slope: f64,
        intercept: f64,
    },
    Quadratic(QuadraticParams),
}

impl FitParams {
    pub fn kind(&self) -> ModelKind {
        match self {
            FitParams::Lorentzian(_) => ModelKind::Lorentzian,
            FitParams::LorentzianLinear { .. } => ModelKind::LorentzianLinear,
            FitParams::Quadratic(_) => ModelKind::Quadratic,
        }
    }

    /// Parameters as a flat vector in [`ModelKind::param_names`] order.
    pub fn to_vec(&self) -> Vec<f64> {
        match *self {
            FitParams::Lorentzian(l) => vec![l.f0, l.linewidth, l.r0, l.r_inf],
            FitParams::LorentzianLinear {
                lorentzian: l,
                slope,
                intercept,
            } => vec![l.f0, l.linewidth, l.r0, l.r_inf, slope, intercept],
            FitParams::Quadratic(q) => vec![q.c0, q.c1, q.c2],
        }
    }

    /// Resonance frequency: `f0` for Lorentzian kinds, the resampled minimum otherwise.
    pub fn resonance_frequency(&self) -> f64 {
        match self {
            FitParams::Lorentzian(l) | FitParams::LorentzianLinear { lorentzian: l, .. } => l.f0,
            FitParams::Quadratic(q) => q.min_frequency,
        }
    }

    /// Evaluate the fitted model at frequency `f`.
    pub fn evaluate(&self, f: f64) -> f64 {
        crate::models::predict(self.kind(), f, &self.to_vec())
    }
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub sse: f64,
    pub rmse: f64,
    /// Samples in the fit window.
    pub n: usize,
    /// Objective evaluations spent by the solver (0 for the closed-form polynomial fit).
    pub evaluations: usize,
}

/// Output of the resonance fitter for one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceFit {
    pub params: FitParams,
    /// Parameter covariance in [`ModelKind::param_names`] order.
    ///
    /// `None` when the window has no residual degrees of freedom.
    pub covariance: Option<Vec<Vec<f64>>>,
    pub window: FitWindow,
    pub quality: FitQuality,
}

impl ResonanceFit {
    pub fn kind(&self) -> ModelKind {
        self.params.kind()
    }

    /// One-sigma parameter uncertainties (square roots of the covariance diagonal).
    pub fn std_errors(&self) -> Option<Vec<f64>> {
        self.covariance.as_ref().map(|cov| {
            cov.iter()
                .enumerate()
                .map(|(i, row)| row[i].max(0.0).sqrt())
                .collect()
        })
    }

    /// Model evaluated on the sweep frequencies inside the fit window.
    pub fn fitted_curve(&self, sweep: &Sweep) -> Vec<(f64, f64)> {
        self.window
            .frequencies(sweep)
            .iter()
            .map(|&f| (f, self.params.evaluate(f)))
            .collect()
    }
}

/// Cavity coupling regime; selects the calibration formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CouplingRegime {
    #[value(name = "under")]
    UnderCoupled,
    #[value(name = "over")]
    OverCoupled,
}

/// A voltage transient: `(time, voltage)` samples on a strictly increasing time axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageTrace {
    time: Vec<f64>,
    voltage: Vec<f64>,
}

impl VoltageTrace {
    pub fn new(time: Vec<f64>, voltage: Vec<f64>) -> Result<Self> {
        validate_trace(&time, &voltage, "voltage trace")?;
        Ok(Self { time, voltage })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Same time axis, new samples. Lengths are checked by the caller.
    pub(crate) fn with_voltage(&self, voltage: Vec<f64>) -> Self {
        debug_assert_eq!(voltage.len(), self.time.len());
        Self {
            time: self.time.clone(),
            voltage,
        }
    }
}

/// Photoconductivity transient, on the time axis of its source [`VoltageTrace`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductivityTrace {
    time: Vec<f64>,
    conductivity: Vec<f64>,
}

impl ConductivityTrace {
    pub fn new(time: Vec<f64>, conductivity: Vec<f64>) -> Result<Self> {
        validate_trace(&time, &conductivity, "conductivity trace")?;
        Ok(Self { time, conductivity })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn conductivity(&self) -> &[f64] {
        &self.conductivity
    }

    /// Largest finite sample, or `None` if there is none.
    pub fn max(&self) -> Option<f64> {
        self.conductivity
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                Some(m) if m >= v => Some(m),
                _ => Some(v),
            })
    }
}

/// Several data columns sharing one time axis (e.g. one column per fluence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    time: Vec<f64>,
    columns: Vec<Vec<f64>>,
}

impl TraceFrame {
    pub fn new(time: Vec<f64>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if columns.is_empty() {
            return Err(TrmcError::InvalidInput("trace frame has no data columns".into()));
        }
        for (i, col) in columns.iter().enumerate() {
            if col.len() != time.len() {
                return Err(TrmcError::InvalidInput(format!(
                    "column {i} has {} samples, time axis has {}",
                    col.len(),
                    time.len()
                )));
            }
        }
        if time.iter().any(|t| !t.is_finite()) {
            return Err(TrmcError::InvalidInput("non-finite time sample".into()));
        }
        ensure_strictly_increasing(&time, "trace time")?;
        Ok(Self { time, columns })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    pub fn column(&self, i: usize) -> Option<&[f64]> {
        self.columns.get(i).map(Vec::as_slice)
    }
}

/// Peak conductivity and figure of merit for one fluence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FomRow {
    /// Photons per cm² per pulse.
    pub fluence: f64,
    pub max_conductivity: f64,
    pub fom: f64,
}

/// Per-fluence results in input order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FomTable {
    pub rows: Vec<FomRow>,
}

impl FomTable {
    /// `(fluence, max conductivity)` pairs in input order.
    pub fn max_conductivity(&self) -> Vec<(f64, f64)> {
        self.rows.iter().map(|r| (r.fluence, r.max_conductivity)).collect()
    }

    /// `(fluence, figure of merit)` pairs in input order.
    pub fn fom(&self) -> Vec<(f64, f64)> {
        self.rows.iter().map(|r| (r.fluence, r.fom)).collect()
    }
}

/// One keyed outcome of a batch run. A failed item never hides its key.
#[derive(Debug)]
pub struct BatchItem<K, T> {
    pub key: K,
    pub outcome: Result<T>,
}

impl<K, T> BatchItem<K, T> {
    /// The value, or `None` for a failed item.
    pub fn ok(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }
}

fn validate_trace(time: &[f64], values: &[f64], what: &str) -> Result<()> {
    if time.len() != values.len() {
        return Err(TrmcError::InvalidInput(format!(
            "{what} length mismatch: {} times vs {} samples",
            time.len(),
            values.len()
        )));
    }
    if time.iter().any(|t| !t.is_finite()) {
        return Err(TrmcError::InvalidInput(format!("{what} has a non-finite time sample")));
    }
    ensure_strictly_increasing(time, what)
}

fn ensure_strictly_increasing(xs: &[f64], what: &str) -> Result<()> {
    if let Some(i) = xs.windows(2).position(|w| w[1] <= w[0]) {
        return Err(TrmcError::InvalidInput(format!(
            "{what} is not strictly increasing at index {}",
            i + 1
        )));
    }
    Ok(())
}
