//! # Cross-Validated Lasso
//!
//! L1-regularized least squares, `(1 / 2n) ||y - Xw - b||² + alpha ||w||₁`, solved by
//! cyclic coordinate descent over a descending grid of penalties with warm starts.
//! The penalty is selected by leave-one-out cross-validation: every observation is
//! held out once, the whole path is fitted on the rest, and the alpha with the lowest
//! mean held-out squared error wins. The model is then refitted on all observations.
//!
//! The alpha grid is computed once from the full data and shared by every fold.

use crate::diagnostics::Diagnostic;
use crate::preprocess::FactorMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LassoError {
    #[error("Leave-one-out cross-validation needs at least 2 observations, found {0}.")]
    TooFewObservations(usize),
    #[error("The factor matrix has no columns.")]
    NoFeatures,
    #[error("The factor matrix has {rows} rows but the response has {response} values.")]
    LengthMismatch { rows: usize, response: usize },
    #[error("Non-finite value in the {0}; Lasso input must be finite.")]
    NonFiniteInput(&'static str),
    #[error("Invalid Lasso settings: {0}")]
    InvalidSettings(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LassoSettings {
    /// Number of penalties on the path.
    pub n_alphas: usize,
    /// Ratio of the smallest to the largest penalty.
    pub eps: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for LassoSettings {
    fn default() -> Self {
        Self {
            n_alphas: 100,
            eps: 1e-3,
            max_iter: 1000,
            tol: 1e-4,
        }
    }
}

impl LassoSettings {
    pub fn validate(&self) -> Result<(), LassoError> {
        if self.n_alphas == 0 {
            return Err(LassoError::InvalidSettings("n_alphas must be at least 1".into()));
        }
        if !(self.eps > 0.0 && self.eps < 1.0) {
            return Err(LassoError::InvalidSettings(format!(
                "eps must lie in (0, 1), found {}",
                self.eps
            )));
        }
        if self.max_iter == 0 {
            return Err(LassoError::InvalidSettings("max_iter must be at least 1".into()));
        }
        if !(self.tol > 0.0 && self.tol.is_finite()) {
            return Err(LassoError::InvalidSettings(format!(
                "tol must be positive, found {}",
                self.tol
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCoefficient {
    pub name: String,
    pub coef: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LassoCvResult {
    /// Selected penalty.
    pub alpha: f64,
    /// Tested penalties, descending.
    pub alphas: Array1<f64>,
    /// Held-out squared error, one row per alpha and one column per fold.
    pub mse_path: Array2<f64>,
    pub coefficients: Vec<NamedCoefficient>,
    pub intercept: f64,
    pub diagnostics: Vec<Diagnostic>,
}

impl LassoCvResult {
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficients
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.coef)
    }

    /// Factors with a non-zero coefficient.
    pub fn selected(&self) -> impl Iterator<Item = &NamedCoefficient> {
        self.coefficients.iter().filter(|c| c.coef != 0.0)
    }

    /// Mean held-out error per alpha.
    pub fn mean_mse(&self) -> Array1<f64> {
        self.mse_path
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::from_elem(self.alphas.len(), f64::NAN))
    }
}

/// Outcome of one coordinate-descent solve.
#[derive(Debug, Clone, Copy)]
struct Convergence {
    converged: bool,
}

/// Descending log-spaced penalties from `max|Xcᵀyc| / n` down to `eps` times that.
pub fn alpha_grid(x: ArrayView2<f64>, y: ArrayView1<f64>, n_alphas: usize, eps: f64) -> Array1<f64> {
    let (xc, yc, ..) = center(x, y);
    let n = x.nrows().max(1) as f64;
    let alpha_max = xc
        .t()
        .dot(&yc)
        .iter()
        .fold(0.0_f64, |max, &val| max.max(val.abs()))
        / n;
    if alpha_max <= f64::EPSILON {
        return Array1::from_elem(n_alphas, f64::EPSILON);
    }
    let hi = alpha_max.log10();
    let lo = (alpha_max * eps).log10();
    if n_alphas == 1 {
        return Array1::from_elem(1, alpha_max);
    }
    let step = (hi - lo) / (n_alphas - 1) as f64;
    (0..n_alphas)
        .map(|i| 10f64.powf(hi - step * i as f64))
        .collect()
}

/// Column-centered copy of `x`, centered `y`, and the removed means.
fn center(x: ArrayView2<f64>, y: ArrayView1<f64>) -> (Array2<f64>, Array1<f64>, Array1<f64>, f64) {
    let x_mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let y_mean = y.mean().unwrap_or(0.0);
    let xc = &x - &x_mean;
    let yc = y.mapv(|v| v - y_mean);
    (xc, yc, x_mean, y_mean)
}

/// Cyclic coordinate descent on centered data, updating `w` in place.
///
/// `l1_reg` is the penalty already multiplied by the number of samples. Stops when the
/// duality gap falls below `tol * ||y||²`, checked whenever the largest coordinate
/// update is small relative to the largest coefficient.
fn coordinate_descent(
    w: &mut Array1<f64>,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    column_norms: &Array1<f64>,
    l1_reg: f64,
    max_iter: usize,
    tol: f64,
) -> Convergence {
    let p = x.ncols();
    let gap_tol = tol * y.dot(&y);
    let mut residual = &y - &x.dot(&*w);

    for iter in 0..max_iter {
        let mut w_max = 0.0_f64;
        let mut d_w_max = 0.0_f64;
        for j in 0..p {
            if column_norms[j] == 0.0 {
                continue;
            }
            let column = x.column(j);
            let w_old = w[j];
            if w_old != 0.0 {
                residual.scaled_add(w_old, &column);
            }
            let rho = column.dot(&residual);
            w[j] = rho.signum() * (rho.abs() - l1_reg).max(0.0) / column_norms[j];
            if w[j] != 0.0 {
                residual.scaled_add(-w[j], &column);
            }
            d_w_max = d_w_max.max((w[j] - w_old).abs());
            w_max = w_max.max(w[j].abs());
        }

        if w_max == 0.0 || d_w_max / w_max < tol || iter + 1 == max_iter {
            let gap = duality_gap(w, x, y, &residual, l1_reg);
            if gap <= gap_tol {
                return Convergence { converged: true };
            }
        }
    }
    Convergence { converged: false }
}

fn duality_gap(
    w: &Array1<f64>,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    residual: &Array1<f64>,
    l1_reg: f64,
) -> f64 {
    let dual_norm = x
        .t()
        .dot(residual)
        .iter()
        .fold(0.0_f64, |max, &val| max.max(val.abs()));
    let r_norm2 = residual.dot(residual);
    let (scale, mut gap) = if dual_norm > l1_reg {
        let scale = l1_reg / dual_norm;
        (scale, 0.5 * (r_norm2 + r_norm2 * scale * scale))
    } else {
        (1.0, r_norm2)
    };
    let l1_norm: f64 = w.iter().map(|v| v.abs()).sum();
    gap += l1_reg * l1_norm - scale * residual.dot(&y);
    gap
}

/// Coefficients along a penalty path, with the intercept of each fit.
#[derive(Debug, Clone)]
pub struct LassoPath {
    /// One row per alpha.
    pub coefs: Array2<f64>,
    pub intercepts: Array1<f64>,
    /// Solves that hit `max_iter` before the duality gap closed.
    pub unconverged: usize,
}

/// Fits every penalty in `alphas` (descending), warm-starting each from the previous.
pub fn lasso_path(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    alphas: ArrayView1<f64>,
    settings: &LassoSettings,
) -> LassoPath {
    let (xc, yc, x_mean, y_mean) = center(x, y);
    let n = x.nrows() as f64;
    let column_norms = xc.map_axis(Axis(0), |c| c.dot(&c));

    let mut coefs = Array2::zeros((alphas.len(), x.ncols()));
    let mut intercepts = Array1::zeros(alphas.len());
    let mut w = Array1::zeros(x.ncols());
    let mut unconverged = 0;
    for (k, &alpha) in alphas.iter().enumerate() {
        let outcome = coordinate_descent(
            &mut w,
            xc.view(),
            yc.view(),
            &column_norms,
            alpha * n,
            settings.max_iter,
            settings.tol,
        );
        if !outcome.converged {
            unconverged += 1;
        }
        intercepts[k] = y_mean - x_mean.dot(&w);
        coefs.row_mut(k).assign(&w);
    }
    LassoPath {
        coefs,
        intercepts,
        unconverged,
    }
}

/// Squared held-out error of every alpha for the fold that leaves out `held_out`.
fn leave_one_out_errors(
    x: &Array2<f64>,
    y: &Array1<f64>,
    held_out: usize,
    alphas: ArrayView1<f64>,
    settings: &LassoSettings,
) -> (Array1<f64>, usize) {
    let train: Vec<usize> = (0..x.nrows()).filter(|&i| i != held_out).collect();
    let x_train = x.select(Axis(0), &train);
    let y_train = y.select(Axis(0), &train);
    let path = lasso_path(x_train.view(), y_train.view(), alphas, settings);

    let x_test = x.row(held_out);
    let predictions = path.coefs.dot(&x_test) + &path.intercepts;
    let errors = predictions.mapv(|p| (p - y[held_out]).powi(2));
    (errors, path.unconverged)
}

pub fn lasso_cv(
    x: &FactorMatrix,
    y: &Array1<f64>,
    settings: &LassoSettings,
) -> Result<LassoCvResult, LassoError> {
    settings.validate()?;
    let n = x.nrows();
    if y.len() != n {
        return Err(LassoError::LengthMismatch {
            rows: n,
            response: y.len(),
        });
    }
    if n < 2 {
        return Err(LassoError::TooFewObservations(n));
    }
    if x.ncols() == 0 {
        return Err(LassoError::NoFeatures);
    }
    if x.values.iter().any(|v| !v.is_finite()) {
        return Err(LassoError::NonFiniteInput("factor matrix"));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(LassoError::NonFiniteInput("response"));
    }

    let alphas = alpha_grid(x.values.view(), y.view(), settings.n_alphas, settings.eps);

    // --- Leave-one-out folds ---
    let folds: Vec<(Array1<f64>, usize)> = (0..n)
        .into_par_iter()
        .map(|held_out| leave_one_out_errors(&x.values, y, held_out, alphas.view(), settings))
        .collect();
    let mut mse_path = Array2::zeros((alphas.len(), n));
    let mut unconverged = 0;
    for (fold, (errors, fold_unconverged)) in folds.into_iter().enumerate() {
        mse_path.column_mut(fold).assign(&errors);
        unconverged += fold_unconverged;
    }

    let mean_mse = mse_path
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::from_elem(alphas.len(), f64::NAN));
    let best = mean_mse
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best_k, best_mse), (k, &mse)| {
            if mse < best_mse { (k, mse) } else { (best_k, best_mse) }
        })
        .0;
    let alpha = alphas[best];
    log::info!(
        "Lasso LOO: selected alpha {alpha:.4e} (mean squared error {:.4}) out of {} penalties over {n} folds",
        mean_mse[best],
        alphas.len()
    );

    // --- Refit on every observation ---
    let single = Array1::from_elem(1, alpha);
    let refit = lasso_path(x.values.view(), y.view(), single.view(), settings);
    unconverged += refit.unconverged;

    let mut diagnostics = Vec::new();
    if unconverged > 0 {
        diagnostics.push(Diagnostic::warning(
            "lasso_cv",
            format!(
                "{unconverged} coordinate-descent solve(s) stopped after {} iterations without closing the duality gap.",
                settings.max_iter
            ),
        ));
    }
    if best == 0 || best + 1 == alphas.len() {
        diagnostics.push(Diagnostic::info(
            "lasso_cv",
            "The selected alpha lies on the edge of the grid.",
        ));
    }

    let coefficients = x
        .names
        .iter()
        .zip(refit.coefs.row(0).iter())
        .map(|(name, &coef)| NamedCoefficient {
            name: name.clone(),
            coef,
        })
        .collect();

    Ok(LassoCvResult {
        alpha,
        alphas,
        mse_path,
        coefficients,
        intercept: refit.intercepts[0],
        diagnostics,
    })
}
