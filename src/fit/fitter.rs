//! Resonance fitting for a single sweep.
//!
//! Given a sweep, we:
//! - locate the global minimum and build a [`FitWindow`] around it
//! - seed any unset parameters from the windowed data
//! - fit the chosen model inside the window:
//!   - Lorentzian kinds: bounded Levenberg–Marquardt
//!   - quadratic: ordinary polynomial least squares (no bounds, no iteration)
//! - report parameters, covariance, the window and fit quality

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::domain::{
    FitParams, FitQuality, FitWindow, LorentzianParams, ModelKind, QuadraticParams, ResonanceFit,
    Sweep, WindowBoundary,
};
use crate::error::{Result, TrmcError};
use crate::math::{LmOptions, ResidualModel, covariance, levenberg_marquardt, linspace, solve_least_squares};
use crate::models::{fill_jacobian_row, lorentzian};

/// Default half-width of the fit window, in samples.
pub const DEFAULT_WINDOW_HALF_WIDTH: usize = 105;

/// Samples used to locate the minimum of a fitted polynomial.
pub const QUADRATIC_RESAMPLE_POINTS: usize = 1000;

/// Per-parameter box constraints, in [`ModelKind::param_names`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    /// Non-negative Lorentzian parameters; the linear baseline is unbounded.
    pub fn default_for(kind: ModelKind) -> Self {
        let p = kind.param_len();
        let mut lower = vec![0.0; p];
        if kind == ModelKind::LorentzianLinear {
            lower[4] = f64::NEG_INFINITY;
            lower[5] = f64::NEG_INFINITY;
        }
        Self {
            lower,
            upper: vec![f64::INFINITY; p],
        }
    }
}

/// Options that affect how a sweep is fitted.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Initial guess per parameter. `None` entries (or an empty vector) are
    /// seeded from the data: `f0` at the sweep minimum, `w` from the width at
    /// half depth, `R0`/`Rinf` from the window minimum/maximum, slope and
    /// intercept at zero.
    pub initial_guess: Vec<Option<f64>>,
    /// `None` uses [`Bounds::default_for`]. Ignored by the quadratic fit.
    pub bounds: Option<Bounds>,
    pub window_half_width: usize,
    /// `None` uses [`ModelKind::default_boundary`].
    pub boundary: Option<WindowBoundary>,
    pub solver: LmOptions,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            initial_guess: Vec::new(),
            bounds: None,
            window_half_width: DEFAULT_WINDOW_HALF_WIDTH,
            boundary: None,
            solver: LmOptions::default(),
        }
    }
}

/// Fit `kind` to the resonance dip of `sweep`.
pub fn fit_sweep(sweep: &Sweep, kind: ModelKind, opts: &FitOptions) -> Result<ResonanceFit> {
    if opts.window_half_width == 0 {
        return Err(TrmcError::InvalidInput("window half-width must be > 0".into()));
    }
    let boundary = opts.boundary.unwrap_or(kind.default_boundary());
    let window = FitWindow::around(sweep.argmin(), opts.window_half_width, boundary, sweep.len());

    let p = kind.param_len();
    if window.len() < p {
        return Err(TrmcError::FitDidNotConverge(format!(
            "fit window [{}, {}) holds {} samples, {} needs at least {p}",
            window.lo,
            window.hi,
            window.len(),
            kind.display_name()
        )));
    }

    let fit = match kind {
        ModelKind::Quadratic => fit_quadratic(sweep, window)?,
        ModelKind::Lorentzian | ModelKind::LorentzianLinear => fit_lorentzian(sweep, kind, window, opts)?,
    };

    debug!(
        model = kind.display_name(),
        lo = window.lo,
        hi = window.hi,
        f_res = fit.params.resonance_frequency(),
        rmse = fit.quality.rmse,
        evaluations = fit.quality.evaluations,
        "resonance fit complete"
    );
    Ok(fit)
}

/// Centered, scaled abscissa `u = (f − fc)/s` spanning `[-1, 1]` over a window.
#[derive(Debug, Clone, Copy)]
struct Abscissa {
    fc: f64,
    s: f64,
}

impl Abscissa {
    fn of_window(f: &[f64]) -> Self {
        let n = f.len();
        let half_span = 0.5 * (f[n - 1] - f[0]);
        Self {
            fc: 0.5 * (f[0] + f[n - 1]),
            s: if half_span > 0.0 { half_span } else { 1.0 },
        }
    }

    fn at(&self, f: f64) -> f64 {
        (f - self.fc) / self.s
    }

    /// `(m, b)` of `m·f + b` → `(m', b')` of `m'·u + b'`.
    fn line_from_raw(&self, slope: f64, intercept: f64) -> (f64, f64) {
        (slope * self.s, intercept + slope * self.fc)
    }

    fn line_to_raw(&self, slope_u: f64, intercept_u: f64) -> (f64, f64) {
        (slope_u / self.s, intercept_u - slope_u * self.fc / self.s)
    }
}

/// Windowed residuals `model(f_i) − y_i`.
///
/// The linear baseline is evaluated as `m'·u + b'` on the window's [`Abscissa`];
/// a raw `m·f` column at GHz frequencies is nearly parallel to the intercept.
struct WindowedResiduals<'a> {
    kind: ModelKind,
    f: &'a [f64],
    y: &'a [f64],
    abscissa: Abscissa,
}

impl WindowedResiduals<'_> {
    fn predict(&self, f: f64, params: &[f64]) -> f64 {
        let dip = lorentzian(f, params[0], params[1], params[2], params[3]);
        match self.kind {
            ModelKind::LorentzianLinear => dip + params[4] * self.abscissa.at(f) + params[5],
            _ => dip,
        }
    }
}

impl ResidualModel for WindowedResiduals<'_> {
    fn residual_len(&self) -> usize {
        self.f.len()
    }

    fn param_len(&self) -> usize {
        self.kind.param_len()
    }

    fn residuals(&self, params: &[f64], out: &mut DVector<f64>) {
        for (i, (&f, &y)) in self.f.iter().zip(self.y).enumerate() {
            out[i] = self.predict(f, params) - y;
        }
    }

    fn jacobian(&self, params: &[f64], out: &mut DMatrix<f64>) {
        let mut row = vec![0.0; self.kind.param_len()];
        for (i, &f) in self.f.iter().enumerate() {
            fill_jacobian_row(ModelKind::Lorentzian, f, params, &mut row[..4]);
            if self.kind == ModelKind::LorentzianLinear {
                row[4] = self.abscissa.at(f);
                row[5] = 1.0;
            }
            for (j, &v) in row.iter().enumerate() {
                out[(i, j)] = v;
            }
        }
    }
}

fn fit_lorentzian(sweep: &Sweep, kind: ModelKind, window: FitWindow, opts: &FitOptions) -> Result<ResonanceFit> {
    let bounds = opts.bounds.clone().unwrap_or_else(|| Bounds::default_for(kind));
    let mut x0 = seed_params(sweep, kind, window, &opts.initial_guess, &bounds)?;

    let f = window.frequencies(sweep);
    let abscissa = Abscissa::of_window(f);
    let linear = kind == ModelKind::LorentzianLinear;
    if linear {
        if bounds.lower[4..].iter().chain(&bounds.upper[4..]).any(|b| b.is_finite()) {
            return Err(TrmcError::InvalidInput(
                "the linear baseline (slope, intercept) cannot be bounded".into(),
            ));
        }
        (x0[4], x0[5]) = abscissa.line_from_raw(x0[4], x0[5]);
    }

    let problem = WindowedResiduals {
        kind,
        f,
        y: window.values(sweep),
        abscissa,
    };
    let outcome = levenberg_marquardt(&problem, &x0, &bounds.lower, &bounds.upper, &opts.solver)?;

    let p = &outcome.params;
    let dip = LorentzianParams {
        f0: p[0],
        linewidth: p[1],
        r0: p[2],
        r_inf: p[3],
    };
    let params = if linear {
        let (slope, intercept) = abscissa.line_to_raw(p[4], p[5]);
        FitParams::LorentzianLinear {
            lorentzian: dip,
            slope,
            intercept,
        }
    } else {
        FitParams::Lorentzian(dip)
    };

    let mut cov = covariance(&outcome.jacobian, outcome.sse);
    if linear {
        // Raw (m, b) = T·(m', b'), identity on the Lorentzian block.
        let mut t = DMatrix::<f64>::identity(6, 6);
        t[(4, 4)] = 1.0 / abscissa.s;
        t[(5, 4)] = -abscissa.fc / abscissa.s;
        cov = cov.map(|c| &t * c * t.transpose());
    }

    Ok(ResonanceFit {
        params,
        covariance: cov.map(|c| to_rows(&c)),
        window,
        quality: quality(outcome.sse, window.len(), outcome.evaluations),
    })
}

/// Build the starting point: user values where given, data-derived seeds elsewhere.
///
/// Data-derived seeds are pulled inside `bounds`; user values are not, so an
/// infeasible user guess surfaces as a fit failure.
fn seed_params(
    sweep: &Sweep,
    kind: ModelKind,
    window: FitWindow,
    guess: &[Option<f64>],
    bounds: &Bounds,
) -> Result<Vec<f64>> {
    let p = kind.param_len();
    if !guess.is_empty() && guess.len() != p {
        return Err(TrmcError::InvalidInput(format!(
            "{} takes {p} parameters ({}), got an initial guess of length {}",
            kind.display_name(),
            kind.param_names().join(", "),
            guess.len()
        )));
    }
    if bounds.lower.len() != p || bounds.upper.len() != p {
        return Err(TrmcError::InvalidInput(format!(
            "{} takes {p} bounds per side, got lower={}, upper={}",
            kind.display_name(),
            bounds.lower.len(),
            bounds.upper.len()
        )));
    }

    let f = window.frequencies(sweep);
    let y = window.values(sweep);
    let center = window.center - window.lo;
    let y_min = y[center];
    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut seeds = vec![sweep.frequency()[window.center], half_depth_width(f, y, center), y_min, y_max];
    if kind == ModelKind::LorentzianLinear {
        seeds.extend([0.0, 0.0]);
    }

    Ok((0..p)
        .map(|j| match guess.get(j).copied().flatten() {
            Some(v) => v,
            None => seeds[j].clamp(bounds.lower[j], bounds.upper[j]),
        })
        .collect())
}

/// Full width of the dip at half depth, measured outward from `center`.
///
/// Never smaller than one sample spacing.
fn half_depth_width(f: &[f64], y: &[f64], center: usize) -> f64 {
    let y_max = y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let half = 0.5 * (y[center] + y_max);

    let mut left = center;
    while left > 0 && y[left - 1] < half {
        left -= 1;
    }
    let mut right = center;
    while right + 1 < y.len() && y[right + 1] < half {
        right += 1;
    }

    let spacing = (f[f.len() - 1] - f[0]) / (f.len().max(2) - 1) as f64;
    (f[right] - f[left]).max(spacing)
}

/// Polynomial least squares on a centered, scaled abscissa `u = (f − fc)/s`.
///
/// Raw-frequency powers (f² ~ 1e20 at X band) would make the design matrix
/// hopelessly ill-conditioned; coefficients are mapped back afterwards.
fn fit_quadratic(sweep: &Sweep, window: FitWindow) -> Result<ResonanceFit> {
    let f = window.frequencies(sweep);
    let y = window.values(sweep);
    let n = f.len();

    let Abscissa { fc, s } = Abscissa::of_window(f);

    let mut x = DMatrix::<f64>::zeros(n, 3);
    for (i, &fi) in f.iter().enumerate() {
        let u = (fi - fc) / s;
        x[(i, 0)] = 1.0;
        x[(i, 1)] = u;
        x[(i, 2)] = u * u;
    }
    let yv = DVector::from_column_slice(y);
    let a = solve_least_squares(&x, &yv).ok_or_else(|| {
        TrmcError::FitDidNotConverge("polynomial least squares is singular on the fit window".into())
    })?;

    let eval_u = |u: f64| a[0] + a[1] * u + a[2] * u * u;
    let sse: f64 = f
        .iter()
        .zip(y)
        .map(|(&fi, &yi)| (eval_u((fi - fc) / s) - yi).powi(2))
        .sum();

    // c = T·a maps scaled coefficients back to raw-frequency coefficients.
    let t = DMatrix::from_row_slice(
        3,
        3,
        &[
            1.0,
            -fc / s,
            fc * fc / (s * s),
            0.0,
            1.0 / s,
            -2.0 * fc / (s * s),
            0.0,
            0.0,
            1.0 / (s * s),
        ],
    );
    let c = &t * &a;
    let cov = covariance(&x, sse).map(|cov_a| to_rows(&(&t * cov_a * t.transpose())));

    let mut min_frequency = f[0];
    let mut min_value = f64::INFINITY;
    for fg in linspace(f[0], f[n - 1], QUADRATIC_RESAMPLE_POINTS)? {
        let v = eval_u((fg - fc) / s);
        if v < min_value {
            min_value = v;
            min_frequency = fg;
        }
    }

    Ok(ResonanceFit {
        params: FitParams::Quadratic(QuadraticParams {
            c0: c[0],
            c1: c[1],
            c2: c[2],
            min_frequency,
            min_value,
        }),
        covariance: cov,
        window,
        quality: quality(sse, n, 0),
    })
}

fn quality(sse: f64, n: usize, evaluations: usize) -> FitQuality {
    FitQuality {
        sse,
        rmse: (sse / n.max(1) as f64).sqrt(),
        n,
        evaluations,
    }
}

fn to_rows(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    m.row_iter().map(|r| r.iter().copied().collect()).collect()
}
