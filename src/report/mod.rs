//! Reporting utilities: fit residuals and formatted terminal output.

pub mod format;

pub use format::*;

use crate::domain::{ResonanceFit, Sweep};
use crate::error::{Result, TrmcError};

/// Observed vs fitted reflectivity at one sweep point inside the fit window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitResidual {
    pub frequency: f64,
    pub observed: f64,
    pub fitted: f64,
    pub residual: f64,
}

/// Residuals over the fit window.
pub fn compute_residuals(sweep: &Sweep, fit: &ResonanceFit) -> Result<Vec<FitResidual>> {
    let freqs = fit.window.frequencies(sweep);
    let values = fit.window.values(sweep);
    let mut out = Vec::with_capacity(freqs.len());
    for (&frequency, &observed) in freqs.iter().zip(values) {
        let fitted = fit.params.evaluate(frequency);
        if !fitted.is_finite() {
            return Err(TrmcError::FitDidNotConverge(format!(
                "non-finite model prediction at {frequency:e} Hz"
            )));
        }
        out.push(FitResidual {
            frequency,
            observed,
            fitted,
            residual: observed - fitted,
        });
    }
    Ok(out)
}

/// The residual with the largest magnitude, if any.
pub fn worst_residual(residuals: &[FitResidual]) -> Option<FitResidual> {
    residuals
        .iter()
        .copied()
        .max_by(|a, b| a.residual.abs().total_cmp(&b.residual.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitParams, FitQuality, FitWindow, QuadraticParams};

    #[test]
    fn residuals_cover_the_window_only() {
        let sweep = Sweep::new(vec![0.0, 1.0, 2.0, 3.0, 4.0], vec![9.0, 1.5, 0.0, 1.0, 9.0]).unwrap();
        let fit = ResonanceFit {
            params: FitParams::Quadratic(QuadraticParams {
                c0: 4.0,
                c1: -4.0,
                c2: 1.0,
                min_frequency: 2.0,
                min_value: 0.0,
            }),
            covariance: None,
            window: FitWindow { lo: 1, hi: 4, center: 2 },
            quality: FitQuality {
                sse: 0.25,
                rmse: 0.0,
                n: 3,
                evaluations: 0,
            },
        };
        let r = compute_residuals(&sweep, &fit).unwrap();
        assert_eq!(r.len(), 3);
        assert!((r[0].residual - 0.5).abs() < 1e-12);
        assert_eq!(worst_residual(&r).unwrap().frequency, 1.0);
    }
}
