//! Cavity calibration constant K.
//!
//! With `Q = f0/w`, `aspect = width/height` and `D = π·f0·εr·ε0·length·aspect`:
//!
//! ```text
//! under-coupled:  K = −2Q(1/√R0 − 1) / D
//! over-coupled:   K =  2Q(1/√R0 + 1) / D
//! ```
//!
//! `R0` is the normalized on-resonance reflectivity (on-resonance value over the
//! off-resonance level), so typically `0 < R0 < 1`.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{CavityGeometry, PhysicalConstants};
use crate::domain::{CouplingRegime, FitParams, ResonanceFit};
use crate::error::{Result, TrmcError};

/// The three fit-derived quantities K depends on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInput {
    /// Resonant frequency (Hz).
    pub f0: f64,
    /// Loaded linewidth (Hz).
    pub linewidth: f64,
    /// Normalized on-resonance reflectivity (dimensionless).
    pub r0: f64,
}

impl CalibrationInput {
    /// Extract calibration inputs from a Lorentzian-kind fit.
    ///
    /// The depth is normalized by the off-resonance level at `f0`. For the
    /// baseline model that level includes the line, which also makes the ratio
    /// independent of how the fit split the offset between `Rinf` and the intercept.
    pub fn from_fit(fit: &ResonanceFit) -> Result<Self> {
        let (l, offset) = match fit.params {
            FitParams::Lorentzian(l) => (l, 0.0),
            FitParams::LorentzianLinear {
                lorentzian,
                slope,
                intercept,
            } => (lorentzian, slope * lorentzian.f0 + intercept),
            FitParams::Quadratic(_) => {
                return Err(TrmcError::InvalidCalibrationInput(
                    "a quadratic fit has no linewidth; fit a Lorentzian model to calibrate".into(),
                ));
            }
        };

        let off_resonance = l.r_inf + offset;
        if off_resonance == 0.0 {
            return Err(TrmcError::DivideByZero("off-resonance reflectivity is zero".into()));
        }
        Ok(Self {
            f0: l.f0,
            linewidth: l.linewidth,
            r0: (l.r0 + offset) / off_resonance,
        })
    }
}

/// K together with the intermediate quantities worth sanity-checking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub k: f64,
    /// Loaded quality factor `f0/w`.
    pub q: f64,
    /// Cavity response time `Q/(π·f0)` (s).
    pub t_rc: f64,
    pub regime: CouplingRegime,
}

/// Calibration constant K for the given fit quantities and cavity.
pub fn calc_k(
    f0: f64,
    linewidth: f64,
    r0: f64,
    regime: CouplingRegime,
    cavity: &CavityGeometry,
    constants: &PhysicalConstants,
) -> Result<f64> {
    calibrate(
        &CalibrationInput { f0, linewidth, r0 },
        regime,
        cavity,
        constants,
    )
    .map(|c| c.k)
}

/// Compute K plus Q and the RC time constant.
pub fn calibrate(
    input: &CalibrationInput,
    regime: CouplingRegime,
    cavity: &CavityGeometry,
    constants: &PhysicalConstants,
) -> Result<Calibration> {
    let CalibrationInput { f0, linewidth, r0 } = *input;

    if !(f0.is_finite() && f0 > 0.0) {
        return Err(TrmcError::InvalidCalibrationInput(format!(
            "resonant frequency must be finite and > 0, got {f0}"
        )));
    }
    if linewidth == 0.0 {
        return Err(TrmcError::DivideByZero("linewidth is zero".into()));
    }
    if !(linewidth.is_finite() && linewidth > 0.0) {
        return Err(TrmcError::InvalidCalibrationInput(format!(
            "linewidth must be finite and > 0, got {linewidth}"
        )));
    }
    if !(r0.is_finite() && r0 > 0.0) {
        return Err(TrmcError::InvalidCalibrationInput(format!(
            "normalized R0 must be finite and > 0, got {r0}"
        )));
    }
    if cavity.height_m == 0.0 {
        return Err(TrmcError::DivideByZero("cavity height is zero".into()));
    }

    let q = f0 / linewidth;
    let t_rc = q / (std::f64::consts::PI * f0);
    let denom = std::f64::consts::PI
        * f0
        * constants.relative_permittivity
        * constants.vacuum_permittivity
        * cavity.length_m
        * cavity.aspect_ratio();
    if denom == 0.0 || !denom.is_finite() {
        return Err(TrmcError::DivideByZero(format!(
            "calibration denominator is {denom} (check cavity geometry and permittivity)"
        )));
    }

    let inv_sqrt_r0 = 1.0 / r0.sqrt();
    let k = match regime {
        CouplingRegime::UnderCoupled => -2.0 * q * (inv_sqrt_r0 - 1.0) / denom,
        CouplingRegime::OverCoupled => 2.0 * q * (inv_sqrt_r0 + 1.0) / denom,
    };

    Ok(Calibration { k, q, t_rc, regime })
}

/// [`calibrate`] with the intermediate values logged for the operator.
pub fn calibrate_with_diagnostics(
    input: &CalibrationInput,
    regime: CouplingRegime,
    cavity: &CavityGeometry,
    constants: &PhysicalConstants,
) -> Result<Calibration> {
    let cal = calibrate(input, regime, cavity, constants)?;
    info!(
        f0 = %format!("{:.3e}", input.f0),
        w = %format!("{:.3e}", input.linewidth),
        r0 = %format!("{:.3e}", input.r0),
        q = %format!("{:.3e}", cal.q),
        t_rc = %format!("{:.3e}", cal.t_rc),
        k = %format!("{:.3e}", cal.k),
        regime = ?regime,
        "calibration"
    );
    Ok(cal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::domain::{FitQuality, FitWindow, LorentzianParams, QuadraticParams};

    fn k(r0: f64, regime: CouplingRegime) -> Result<f64> {
        calc_k(
            9.0e9,
            1.5e7,
            r0,
            regime,
            &CavityGeometry::default(),
            &PhysicalConstants::default(),
        )
    }

    fn fit_with(params: FitParams) -> ResonanceFit {
        ResonanceFit {
            params,
            covariance: None,
            window: FitWindow { lo: 0, hi: 10, center: 5 },
            quality: FitQuality {
                sse: 0.0,
                rmse: 0.0,
                n: 10,
                evaluations: 0,
            },
        }
    }

    #[test]
    fn over_coupled_matches_hand_computation() {
        let (f0, w, r0) = (9.0e9, 1.5e7, 0.25);
        let q = f0 / w;
        let denom = std::f64::consts::PI * f0 * 8.85e-12 * 76e-3 * (22.86e-3 / 10.16e-3);
        let expected = 2.0 * q * (1.0 / 0.5 + 1.0) / denom;
        assert_relative_eq!(k(r0, CouplingRegime::OverCoupled).unwrap(), expected, max_relative = 1e-12);
    }

    #[test]
    fn under_coupled_vanishes_at_unit_reflectivity() {
        assert_relative_eq!(k(1.0, CouplingRegime::UnderCoupled).unwrap(), 0.0);
        assert!(k(0.25, CouplingRegime::UnderCoupled).unwrap() < 0.0);
    }

    #[test]
    fn k_is_monotonic_in_r0() {
        let r0s: Vec<f64> = (1..100).map(|i| i as f64 / 100.0).collect();
        for regime in [CouplingRegime::UnderCoupled, CouplingRegime::OverCoupled] {
            let ks: Vec<f64> = r0s.iter().map(|&r| k(r, regime).unwrap()).collect();
            for pair in ks.windows(2) {
                match regime {
                    CouplingRegime::UnderCoupled => assert!(pair[1] > pair[0]),
                    CouplingRegime::OverCoupled => assert!(pair[1] < pair[0]),
                }
            }
        }
    }

    #[test]
    fn zero_r0_is_rejected_before_the_square_root() {
        for regime in [CouplingRegime::UnderCoupled, CouplingRegime::OverCoupled] {
            assert!(matches!(k(0.0, regime), Err(TrmcError::InvalidCalibrationInput(_))));
            assert!(matches!(k(-0.1, regime), Err(TrmcError::InvalidCalibrationInput(_))));
            assert!(matches!(k(f64::NAN, regime), Err(TrmcError::InvalidCalibrationInput(_))));
        }
    }

    #[test]
    fn zero_linewidth_is_a_division_by_zero() {
        let err = calc_k(
            9.0e9,
            0.0,
            0.3,
            CouplingRegime::OverCoupled,
            &CavityGeometry::default(),
            &PhysicalConstants::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrmcError::DivideByZero(_)));
    }

    #[test]
    fn zero_cavity_length_is_a_division_by_zero() {
        let cavity = CavityGeometry {
            length_m: 0.0,
            ..CavityGeometry::default()
        };
        let err = calc_k(
            9.0e9,
            1.5e7,
            0.3,
            CouplingRegime::OverCoupled,
            &cavity,
            &PhysicalConstants::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrmcError::DivideByZero(_)));
    }

    #[test]
    fn diagnostics_report_q_and_rc_time() {
        let input = CalibrationInput {
            f0: 9.0e9,
            linewidth: 1.5e7,
            r0: 0.3,
        };
        let cal = calibrate_with_diagnostics(
            &input,
            CouplingRegime::OverCoupled,
            &CavityGeometry::default(),
            &PhysicalConstants::default(),
        )
        .unwrap();
        assert_relative_eq!(cal.q, 600.0);
        assert_relative_eq!(cal.t_rc, 600.0 / (std::f64::consts::PI * 9.0e9));
    }

    #[test]
    fn input_from_lorentzian_fit_normalizes_depth() {
        let fit = fit_with(FitParams::Lorentzian(LorentzianParams {
            f0: 9.0e9,
            linewidth: 1.5e7,
            r0: 0.02,
            r_inf: 0.08,
        }));
        let input = CalibrationInput::from_fit(&fit).unwrap();
        assert_relative_eq!(input.r0, 0.25, max_relative = 1e-12);
        assert_relative_eq!(input.linewidth, 1.5e7);
    }

    #[test]
    fn input_from_baseline_fit_includes_line_at_f0() {
        let fit = fit_with(FitParams::LorentzianLinear {
            lorentzian: LorentzianParams {
                f0: 1.0e9,
                linewidth: 1.0e7,
                r0: 0.1,
                r_inf: 0.5,
            },
            slope: 1e-10,
            intercept: 0.2,
        });
        let input = CalibrationInput::from_fit(&fit).unwrap();
        // offset = 0.1 + 0.2
        assert_relative_eq!(input.r0, 0.5, max_relative = 1e-12);
    }

    #[test]
    fn quadratic_fit_cannot_calibrate() {
        let fit = fit_with(FitParams::Quadratic(QuadraticParams {
            c0: 1.0,
            c1: 0.0,
            c2: 1.0,
            min_frequency: 0.0,
            min_value: 1.0,
        }));
        assert!(matches!(
            CalibrationInput::from_fit(&fit),
            Err(TrmcError::InvalidCalibrationInput(_))
        ));
    }
}
