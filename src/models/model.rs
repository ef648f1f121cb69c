//! Model evaluation for the Lorentzian, Lorentzian-plus-line and quadratic shapes.
//!
//! The fitter relies on two primitive operations:
//! - predict `y(f)` given a flat parameter vector (for residuals/overlays)
//! - fill the row of partial derivatives `∂y/∂p` (for Levenberg–Marquardt)
//!
//! Parameter order follows [`ModelKind::param_names`].

use crate::domain::ModelKind;

/// Lorentzian reflectivity dip.
///
/// `x = 2(f − f0)/w`, `y = (R0 + Rinf·x²)/(1 + x²)`: `y(f0) = R0` and
/// `y → Rinf` far from resonance. The half-depth level is reached at `|f − f0| = w/2`.
pub fn lorentzian(f: f64, f0: f64, w: f64, r0: f64, r_inf: f64) -> f64 {
    let x = 2.0 * (f - f0) / w;
    let x2 = x * x;
    (r0 + r_inf * x2) / (1.0 + x2)
}

/// Predict `y(f)` for the given model kind.
pub fn predict(model: ModelKind, f: f64, params: &[f64]) -> f64 {
    match model {
        ModelKind::Lorentzian => lorentzian(f, params[0], params[1], params[2], params[3]),
        ModelKind::LorentzianLinear => {
            lorentzian(f, params[0], params[1], params[2], params[3]) + params[4] * f + params[5]
        }
        ModelKind::Quadratic => params[0] + params[1] * f + params[2] * f * f,
    }
}

/// Fill `out` with `∂y/∂p_j` at frequency `f`.
///
/// # Panics
/// Panics if `params` or `out` are shorter than `model.param_len()`.
pub fn fill_jacobian_row(model: ModelKind, f: f64, params: &[f64], out: &mut [f64]) {
    match model {
        ModelKind::Lorentzian | ModelKind::LorentzianLinear => {
            let (f0, w, r0, r_inf) = (params[0], params[1], params[2], params[3]);
            let x = 2.0 * (f - f0) / w;
            let d = 1.0 + x * x;
            // ∂y/∂x = 2x(Rinf − R0)/d²
            let dy_dx = 2.0 * x * (r_inf - r0) / (d * d);
            out[0] = dy_dx * (-2.0 / w);
            out[1] = dy_dx * (-x / w);
            out[2] = 1.0 / d;
            out[3] = x * x / d;
            if model == ModelKind::LorentzianLinear {
                out[4] = f;
                out[5] = 1.0;
            }
        }
        ModelKind::Quadratic => {
            out[0] = 1.0;
            out[1] = f;
            out[2] = f * f;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lorentzian_hits_r0_on_resonance_and_half_depth_at_half_width() {
        let (f0, w, r0, r_inf) = (9.0e9, 2.0e7, 0.1, 1.0);
        assert_relative_eq!(lorentzian(f0, f0, w, r0, r_inf), r0);
        assert_relative_eq!(lorentzian(f0 + w / 2.0, f0, w, r0, r_inf), (r0 + r_inf) / 2.0);
        assert!((lorentzian(f0 + 1e3 * w, f0, w, r0, r_inf) - r_inf).abs() < 1e-5);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let params = [9.0e9, 2.0e7, 0.1, 0.95, 1e-11, 0.02];
        let f = 9.0e9 + 7.3e6;
        let mut row = [0.0; 6];
        fill_jacobian_row(ModelKind::LorentzianLinear, f, &params, &mut row);

        for j in 0..6 {
            let h = (params[j].abs() * 1e-6).max(1e-9);
            let mut hi = params;
            let mut lo = params;
            hi[j] += h;
            lo[j] -= h;
            let fd = (predict(ModelKind::LorentzianLinear, f, &hi)
                - predict(ModelKind::LorentzianLinear, f, &lo))
                / (2.0 * h);
            assert_relative_eq!(row[j], fd, max_relative = 1e-5, epsilon = 1e-12);
        }
    }

    #[test]
    fn quadratic_predict() {
        assert_relative_eq!(predict(ModelKind::Quadratic, 2.0, &[2.0, 3.0, 4.0]), 24.0);
    }
}
