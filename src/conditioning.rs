//! Positive-definite repair of covariance estimates.
//!
//! Sample covariances of colinear assets or short windows are often singular. Solvers
//! downstream need a strictly positive-definite matrix, so a failing estimate is
//! replaced by its nearest positive-definite neighbour in Frobenius norm (eigenvalue
//! clipping followed by a small eigenvalue floor).

use crate::error::{EngineError, Result};
use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};
use tracing::{debug, warn};

/// Eigenvalues below `EIGEN_TOLERANCE * max(1, λ_max)` count as non-positive.
pub const EIGEN_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct ConditionedCovariance {
    pub matrix: Array2<f64>,
    /// Smallest eigenvalue of the raw (symmetrized) estimate
    pub min_eigenvalue: f64,
    pub corrected: bool,
}

fn symmetrize(a: &Array2<f64>) -> Array2<f64> {
    (a + &a.t()) * 0.5
}

fn eigen_floor(eigenvalues: &Array1<f64>) -> f64 {
    let max = eigenvalues.fold(0.0_f64, |m, &v| m.max(v));
    EIGEN_TOLERANCE * max.max(1.0)
}

/// Rebuild `V diag(max(λ, floor)) Vᵀ`.
fn clip_eigenvalues(a: &Array2<f64>, floor: f64) -> Result<Array2<f64>> {
    let (eigenvalues, eigenvectors) = a.eigh(UPLO::Lower)?;
    let clipped = eigenvalues.mapv(|v| v.max(floor));
    let scaled = &eigenvectors * &clipped;
    Ok(symmetrize(&scaled.dot(&eigenvectors.t())))
}

fn frobenius(a: &Array2<f64>) -> f64 {
    a.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Return `cov` unchanged if it is strictly positive definite, otherwise its
/// nearest positive-definite projection.
pub fn condition_covariance(cov: &Array2<f64>) -> Result<ConditionedCovariance> {
    let (rows, cols) = cov.dim();
    if rows != cols || rows == 0 {
        return Err(EngineError::InvalidParameter(format!(
            "covariance must be square and non-empty, got {}x{}",
            rows, cols
        )));
    }
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::SingularCovariance(
            "covariance contains non-finite entries".into(),
        ));
    }

    let sym = symmetrize(cov);
    let (eigenvalues, _) = sym.eigh(UPLO::Lower)?;
    let min_eigenvalue = eigenvalues.fold(f64::INFINITY, |m, &v| m.min(v));
    let floor = eigen_floor(&eigenvalues);
    if min_eigenvalue > floor {
        debug!(min_eigenvalue, "covariance is positive definite");
        return Ok(ConditionedCovariance {
            matrix: sym,
            min_eigenvalue,
            corrected: false,
        });
    }

    // Clipping at the floor instead of zero keeps the Frobenius-nearest PSD
    // eigenvectors and makes the result strictly PD.
    let matrix = clip_eigenvalues(&sym, floor)?;
    let (final_eigs, _) = matrix.eigh(UPLO::Lower)?;
    let final_min = final_eigs.fold(f64::INFINITY, |m, &v| m.min(v));
    if !(final_min > 0.0) {
        return Err(EngineError::SingularCovariance(format!(
            "smallest eigenvalue {} after projection",
            final_min
        )));
    }

    warn!(
        min_eigenvalue,
        repaired_min_eigenvalue = final_min,
        distance = frobenius(&(&matrix - &sym)),
        "covariance not positive definite, replaced by nearest PD matrix"
    );
    Ok(ConditionedCovariance {
        matrix,
        min_eigenvalue,
        corrected: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn positive_definite_input_is_untouched() {
        let cov = array![[0.04, 0.01], [0.01, 0.09]];
        let out = condition_covariance(&cov).unwrap();
        assert!(!out.corrected);
        assert_eq!(out.matrix, cov);
    }

    #[test]
    fn singular_input_is_repaired() {
        // Two perfectly colinear assets
        let cov = array![[0.04, 0.04, 0.0], [0.04, 0.04, 0.0], [0.0, 0.0, 0.01]];
        let out = condition_covariance(&cov).unwrap();
        assert!(out.corrected);
        assert!(out.min_eigenvalue.abs() < 1e-12);
        let (eigs, _) = out.matrix.eigh(UPLO::Lower).unwrap();
        assert!(eigs.iter().all(|&v| v > 0.0));
        for (a, b) in out.matrix.iter().zip(cov.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn indefinite_input_moves_to_nearest_psd() {
        // Eigenvalues 3 and -1; nearest PSD clips -1 to 0
        let cov = array![[1.0, 2.0], [2.0, 1.0]];
        let out = condition_covariance(&cov).unwrap();
        assert!(out.corrected);
        assert_relative_eq!(out.min_eigenvalue, -1.0, epsilon = 1e-10);
        assert_relative_eq!(out.matrix[[0, 0]], 1.5, epsilon = 1e-6);
        assert_relative_eq!(out.matrix[[0, 1]], 1.5, epsilon = 1e-6);
        assert_eq!(out.matrix[[0, 1]], out.matrix[[1, 0]]);
    }

    #[test]
    fn repaired_spectrum_is_floored_not_shifted() {
        let cov = array![[1.0, 2.0], [2.0, 1.0]];
        let out = condition_covariance(&cov).unwrap();
        let (eigs, _) = out.matrix.eigh(UPLO::Lower).unwrap();
        let floor = EIGEN_TOLERANCE * 3.0;
        // The negative eigenvalue lands on the floor, the positive one is kept
        assert_relative_eq!(eigs[0], floor, epsilon = 1e-12);
        assert_relative_eq!(eigs[1], 3.0, epsilon = 1e-10);
    }

    #[test]
    fn rejects_non_square() {
        let cov = Array2::<f64>::zeros((2, 3));
        assert!(condition_covariance(&cov).is_err());
    }
}
