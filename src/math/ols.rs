//! Linear least squares solver.
//!
//! Two callers share this routine:
//!
//! ```text
//! minimize ‖X·β − y‖²
//! ```
//!
//! - the Wien fit, where `X` has an intercept column and one slope column
//! - each Levenberg–Marquardt step, where `X` is the damped Jacobian
//!   `[J; sqrt(λ)·D]` and `y` is `[r; 0]`
//!
//! Implementation choices:
//! - SVD handles tall systems directly (Nalgebra's `QR::solve` is meant for
//!   square systems and panics otherwise).
//! - Parameter counts are 2–3, so SVD cost is negligible next to the model
//!   evaluations.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Steep spectra can make the temperature column nearly parallel to the
    // scale column; retry with looser singular value cut-offs before giving up.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Inverse of `XᵀX`, used for parameter covariance estimates.
pub fn normal_inverse(x: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let xtx = x.transpose() * x;
    xtx.try_inverse().filter(|m| m.iter().all(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn normal_inverse_of_identity_design() {
        let x = DMatrix::<f64>::identity(3, 3);
        let inv = normal_inverse(&x).unwrap();
        assert!((inv - DMatrix::<f64>::identity(3, 3)).abs().max() < 1e-12);
    }

    #[test]
    fn normal_inverse_rejects_singular_design() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert!(normal_inverse(&x).is_none());
    }
}
