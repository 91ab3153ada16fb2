//! SVD-based helpers shared by the regression strategies: thin decomposition,
//! numerical rank, condition numbers and the Moore-Penrose pseudo-inverse.

use ndarray::{Array1, Array2, ArrayView1, Axis, s};
use ndarray_linalg::SVD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Singular value decomposition failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
    #[error("The decomposition did not return the requested singular vectors.")]
    MissingSingularVectors,
    #[error("Cannot decompose an empty {rows}x{cols} matrix.")]
    Empty { rows: usize, cols: usize },
}

/// `A = U · diag(s) · Vᵀ` truncated to `k = min(rows, cols)` components.
#[derive(Debug, Clone)]
pub struct ThinSvd {
    pub u: Array2<f64>,
    pub s: Array1<f64>,
    pub vt: Array2<f64>,
}

pub fn thin_svd(a: &Array2<f64>) -> Result<ThinSvd, MatrixError> {
    ensure_not_empty(a)?;
    let (u, s, vt) = a.svd(true, true)?;
    let u = u.ok_or(MatrixError::MissingSingularVectors)?;
    let vt = vt.ok_or(MatrixError::MissingSingularVectors)?;
    let k = s.len();
    Ok(ThinSvd {
        u: u.slice(s![.., ..k]).to_owned(),
        s,
        vt: vt.slice(s![..k, ..]).to_owned(),
    })
}

/// Singular values in descending order.
pub fn singular_values(a: &Array2<f64>) -> Result<Array1<f64>, MatrixError> {
    ensure_not_empty(a)?;
    let (_, s, _) = a.svd(false, false)?;
    Ok(s)
}

fn ensure_not_empty(a: &Array2<f64>) -> Result<(), MatrixError> {
    if a.nrows() == 0 || a.ncols() == 0 {
        return Err(MatrixError::Empty {
            rows: a.nrows(),
            cols: a.ncols(),
        });
    }
    Ok(())
}

/// Count of singular values above `smax * max(rows, cols) * eps`.
pub fn rank_from_singular_values(s: ArrayView1<f64>, rows: usize, cols: usize) -> usize {
    let max_sv = s.iter().fold(0.0_f64, |max, &val| max.max(val));
    let tol = max_sv * rows.max(cols) as f64 * f64::EPSILON;
    s.iter().filter(|&&val| val > tol).count()
}

/// Ratio of the extreme singular values of `a`.
///
/// A matrix with more columns than rows has zero singular values that the thin
/// decomposition does not report, so its condition number is infinite.
pub fn condition_number(a: &Array2<f64>) -> Result<f64, MatrixError> {
    if a.nrows() < a.ncols() {
        return Ok(f64::INFINITY);
    }
    let s = singular_values(a)?;
    Ok(ratio_of_extremes(s.view()))
}

fn ratio_of_extremes(s: ArrayView1<f64>) -> f64 {
    let max_sv = s.iter().fold(0.0_f64, |max, &val| max.max(val));
    let min_sv = s.iter().fold(f64::INFINITY, |min, &val| min.min(val));
    if min_sv <= 0.0 || !min_sv.is_finite() {
        return f64::INFINITY;
    }
    max_sv / min_sv
}

/// Moore-Penrose pseudo-inverse with singular values below `rcond * smax` treated as
/// zero. Returns the inverse together with the numerical rank it used.
pub fn pseudo_inverse(a: &Array2<f64>, rcond: f64) -> Result<(Array2<f64>, usize), MatrixError> {
    let svd = thin_svd(a)?;
    let max_sv = svd.s.iter().fold(0.0_f64, |max, &val| max.max(val));
    let cutoff = rcond * max_sv;

    let inv_s: Array1<f64> = svd
        .s
        .mapv(|val| if val > cutoff { 1.0 / val } else { 0.0 });
    let rank = inv_s.iter().filter(|&&val| val != 0.0).count();

    // V · diag(1/s) · Uᵀ
    let scaled_v = svd.vt.t().to_owned() * &inv_s.insert_axis(Axis(0));
    Ok((scaled_v.dot(&svd.u.t()), rank))
}

/// Identifiability summary of a square moment matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixDiagnostics {
    pub dimension: usize,
    pub rank: usize,
    pub condition_number: f64,
    pub invertible: bool,
}

/// Rank and conditioning of `XᵀWᵀWX` (or `XᵀX` without weights).
pub fn moment_matrix_diagnostics(
    x: &Array2<f64>,
    weights: Option<&Array1<f64>>,
) -> Result<MatrixDiagnostics, MatrixError> {
    let weighted = match weights {
        Some(w) => x * &w.view().insert_axis(Axis(1)),
        None => x.to_owned(),
    };
    let moment = weighted.t().dot(&weighted);
    let s = singular_values(&moment)?;
    let dimension = moment.nrows();
    let rank = rank_from_singular_values(s.view(), dimension, dimension);
    Ok(MatrixDiagnostics {
        dimension,
        rank,
        condition_number: ratio_of_extremes(s.view()),
        invertible: rank == dimension,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn pseudo_inverse_of_full_rank_matrix_is_the_inverse() {
        let a = array![[4.0, 1.0], [2.0, 3.0]];
        let (inv, rank) = pseudo_inverse(&a, 1e-15).unwrap();
        assert_eq!(rank, 2);
        let identity = a.dot(&inv);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(identity[[i, j]], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn pseudo_inverse_satisfies_penrose_identity_when_rank_deficient() {
        let a = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let (pinv, rank) = pseudo_inverse(&a, 1e-15).unwrap();
        assert_eq!(rank, 1);
        assert_eq!(pinv.dim(), (2, 3));
        let reconstructed = a.dot(&pinv).dot(&a);
        for (got, want) in reconstructed.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
        }
    }

    #[test]
    fn duplicated_column_makes_moment_matrix_singular() {
        let x = array![[1.0, 1.0, 0.5], [2.0, 2.0, -1.0], [3.0, 3.0, 0.0], [4.0, 4.0, 2.0]];
        let diag = moment_matrix_diagnostics(&x, None).unwrap();
        assert_eq!(diag.dimension, 3);
        assert_eq!(diag.rank, 2);
        assert!(!diag.invertible);
        assert!(diag.condition_number > 1e12);

        let weights = array![1.0, 2.0, 0.5, 3.0];
        let weighted = moment_matrix_diagnostics(&x, Some(&weights)).unwrap();
        assert_eq!(weighted.rank, 2);
    }

    #[test]
    fn condition_number_of_scaled_identity() {
        let a = array![[2.0, 0.0], [0.0, 0.5], [0.0, 0.0]];
        assert_abs_diff_eq!(condition_number(&a).unwrap(), 4.0, epsilon = 1e-12);
        let wide = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert!(condition_number(&wide).unwrap().is_infinite());
    }

    #[test]
    fn empty_matrices_are_rejected() {
        let empty = Array2::<f64>::zeros((3, 0));
        assert!(matches!(
            thin_svd(&empty),
            Err(MatrixError::Empty { rows: 3, cols: 0 })
        ));
    }
}
