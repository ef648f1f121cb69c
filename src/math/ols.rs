//! Linear least squares.
//!
//! Two places need a small dense least-squares solve:
//!
//! ```text
//! minimize ‖X β − y‖²
//! ```
//!
//! - the quadratic resonance fit (design columns `1, u, u²`)
//! - every damped Levenberg–Marquardt step (the Jacobian stacked on `√λ·I`)
//!
//! Implementation choices:
//! - SVD, so tall and rank-deficient systems solve without panicking.
//!   (Nalgebra's `QR::solve` is intended for square systems.)
//! - Parameter dimension is tiny (3–6 columns), so SVD cost is irrelevant.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-14, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Moore–Penrose pseudo-inverse, with singular values below
/// `rel_tol · σ_max` treated as zero.
pub fn pseudo_inverse(a: &DMatrix<f64>, rel_tol: f64) -> Option<DMatrix<f64>> {
    let svd = a.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    if !(sigma_max.is_finite() && sigma_max > 0.0) {
        return None;
    }
    svd.pseudo_inverse(rel_tol * sigma_max).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert_relative_eq!(beta[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(beta[1], 3.0, epsilon = 1e-10);
    }

    #[test]
    fn pseudo_inverse_of_singular_matrix_is_finite() {
        // Two identical columns: rank 1.
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let p = pseudo_inverse(&a, 1e-12).unwrap();
        assert!(p.iter().all(|v| v.is_finite()));
        assert_relative_eq!(p[(0, 0)], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn pseudo_inverse_of_zero_matrix_is_none() {
        assert!(pseudo_inverse(&DMatrix::zeros(2, 2), 1e-12).is_none());
    }
}
