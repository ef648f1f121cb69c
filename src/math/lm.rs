//! Box-constrained Levenberg–Marquardt.
//!
//! Minimizes `Σ r_i(p)²` subject to `lower ≤ p ≤ upper`.
//!
//! Implementation notes:
//! - Marquardt scaling: each step is solved in variables scaled by the
//!   Jacobian column norms, so parameters of wildly different magnitude
//!   (a GHz resonance next to a dimensionless reflectivity) share one damping term.
//! - Each damped step is the least-squares solution of `[J_s; √λ·I] δ = [−r; 0]`,
//!   which stays well-posed when columns are collinear.
//! - Bounds are enforced by projecting every trial point onto the box. A step is
//!   accepted only if it lowers the objective.
//! - The iteration budget counts objective evaluations, accepted or not.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, TrmcError};
use crate::math::ols::{pseudo_inverse, solve_least_squares};

/// A nonlinear least-squares problem: residuals and their Jacobian.
pub trait ResidualModel {
    /// Number of residuals (rows).
    fn residual_len(&self) -> usize;

    /// Number of parameters (columns).
    fn param_len(&self) -> usize;

    fn residuals(&self, params: &[f64], out: &mut DVector<f64>);

    fn jacobian(&self, params: &[f64], out: &mut DMatrix<f64>);
}

/// Solver limits and tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmOptions {
    /// Maximum objective evaluations.
    pub max_evaluations: usize,
    /// Relative reduction in SSE below which an accepted step ends the fit.
    pub ftol: f64,
    /// Relative (scaled) step size below which an accepted step ends the fit.
    pub xtol: f64,
    /// Largest cosine between the residual and any Jacobian column at a stationary point.
    pub gtol: f64,
    pub initial_lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 1000,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

/// Damping above this means no descent direction is left inside the box.
const LAMBDA_MAX: f64 = 1e16;
const LAMBDA_MIN: f64 = 1e-15;

#[derive(Debug, Clone)]
pub struct LmOutcome {
    pub params: Vec<f64>,
    pub sse: f64,
    /// Jacobian at `params`.
    pub jacobian: DMatrix<f64>,
    pub evaluations: usize,
}

/// Run bounded Levenberg–Marquardt from `x0`.
///
/// Fails with [`TrmcError::FitDidNotConverge`] when the start point violates the
/// bounds, the objective turns non-finite, or the evaluation budget runs out.
pub fn levenberg_marquardt<M: ResidualModel>(
    model: &M,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    opts: &LmOptions,
) -> Result<LmOutcome> {
    let p = model.param_len();
    let n = model.residual_len();
    check_bounds(x0, lower, upper, p)?;

    let mut x = x0.to_vec();
    let mut r = DVector::<f64>::zeros(n);
    model.residuals(&x, &mut r);
    let mut sse = r.norm_squared();
    if !sse.is_finite() {
        return Err(TrmcError::FitDidNotConverge(
            "objective is non-finite at the initial guess".into(),
        ));
    }

    let mut jac = DMatrix::<f64>::zeros(n, p);
    let mut lambda = opts.initial_lambda;
    let mut evaluations = 1;
    let mut r_trial = DVector::<f64>::zeros(n);

    'outer: loop {
        if sse == 0.0 {
            break;
        }

        model.jacobian(&x, &mut jac);
        let scale = column_norms(&jac);
        let js = scaled_columns(&jac, &scale);

        // Stationarity: every (unit-norm) column is orthogonal to the residual.
        let g = js.transpose() * &r;
        if g.amax() <= opts.gtol * sse.sqrt() {
            break;
        }

        loop {
            if evaluations >= opts.max_evaluations {
                return Err(TrmcError::FitDidNotConverge(format!(
                    "exceeded {} objective evaluations (sse={sse:.3e})",
                    opts.max_evaluations
                )));
            }

            let Some(delta_s) = damped_step(&js, &r, lambda) else {
                return Err(TrmcError::FitDidNotConverge(
                    "damped normal equations are singular".into(),
                ));
            };

            let trial: Vec<f64> = (0..p)
                .map(|j| (x[j] + delta_s[j] / scale[j]).clamp(lower[j], upper[j]))
                .collect();
            model.residuals(&trial, &mut r_trial);
            evaluations += 1;
            let sse_trial = r_trial.norm_squared();

            if sse_trial.is_finite() && sse_trial < sse {
                let reduction = (sse - sse_trial) / sse;
                let step_norm = (0..p)
                    .map(|j| ((trial[j] - x[j]) * scale[j]).powi(2))
                    .sum::<f64>()
                    .sqrt();
                let x_norm = (0..p).map(|j| (x[j] * scale[j]).powi(2)).sum::<f64>().sqrt();

                x = trial;
                std::mem::swap(&mut r, &mut r_trial);
                sse = sse_trial;
                lambda = (lambda / 10.0).max(LAMBDA_MIN);

                if reduction <= opts.ftol || step_norm <= opts.xtol * (x_norm + opts.xtol) {
                    break 'outer;
                }
                continue 'outer;
            }

            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                break 'outer;
            }
        }
    }

    model.jacobian(&x, &mut jac);
    Ok(LmOutcome {
        params: x,
        sse,
        jacobian: jac,
        evaluations,
    })
}

/// Parameter covariance `s²·(JᵀJ)⁺` with `s² = sse / (n − p)`.
///
/// Computed as `s²·J⁺(J⁺)ᵀ` on the column-scaled Jacobian; directions the data
/// cannot resolve get zero variance instead of blowing up. `None` when `n ≤ p`.
pub fn covariance(jacobian: &DMatrix<f64>, sse: f64) -> Option<DMatrix<f64>> {
    let (n, p) = jacobian.shape();
    if n <= p {
        return None;
    }
    let s2 = sse / (n - p) as f64;

    let scale = column_norms(jacobian);
    let js = scaled_columns(jacobian, &scale);
    let tol = f64::EPSILON * n.max(p) as f64;
    let pinv = pseudo_inverse(&js, tol)?;

    let mut cov = &pinv * pinv.transpose() * s2;
    for i in 0..p {
        for j in 0..p {
            cov[(i, j)] /= scale[i] * scale[j];
        }
    }
    Some(cov)
}

fn check_bounds(x0: &[f64], lower: &[f64], upper: &[f64], p: usize) -> Result<()> {
    if x0.len() != p || lower.len() != p || upper.len() != p {
        return Err(TrmcError::FitDidNotConverge(format!(
            "expected {p} parameters and bounds, got guess={}, lower={}, upper={}",
            x0.len(),
            lower.len(),
            upper.len()
        )));
    }
    for j in 0..p {
        if lower[j].is_nan() || upper[j].is_nan() || lower[j] > upper[j] {
            return Err(TrmcError::FitDidNotConverge(format!(
                "empty bound interval for parameter {j}: [{}, {}]",
                lower[j], upper[j]
            )));
        }
        if !x0[j].is_finite() || x0[j] < lower[j] || x0[j] > upper[j] {
            return Err(TrmcError::FitDidNotConverge(format!(
                "initial guess for parameter {j} ({}) lies outside [{}, {}]",
                x0[j], lower[j], upper[j]
            )));
        }
    }
    Ok(())
}

fn column_norms(jac: &DMatrix<f64>) -> Vec<f64> {
    jac.column_iter()
        .map(|c| {
            let norm = c.norm();
            if norm > 0.0 && norm.is_finite() { norm } else { 1.0 }
        })
        .collect()
}

fn scaled_columns(jac: &DMatrix<f64>, scale: &[f64]) -> DMatrix<f64> {
    let mut js = jac.clone();
    for (j, mut col) in js.column_iter_mut().enumerate() {
        col /= scale[j];
    }
    js
}

fn damped_step(js: &DMatrix<f64>, r: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let (n, p) = js.shape();
    let mut a = DMatrix::<f64>::zeros(n + p, p);
    a.view_mut((0, 0), (n, p)).copy_from(js);
    let damping = lambda.sqrt();
    for j in 0..p {
        a[(n + j, j)] = damping;
    }
    let mut b = DVector::<f64>::zeros(n + p);
    for i in 0..n {
        b[i] = -r[i];
    }
    solve_least_squares(&a, &b)
}
