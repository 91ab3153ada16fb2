//! # AIC-Selected Lasso
//!
//! The Lasso solution path computed exactly by least angle regression with the Lasso
//! modification: a variable leaves the active set when its coefficient would cross
//! zero. Columns are centered and scaled to unit norm before the path is traced.
//!
//! Every breakpoint of the path is scored with
//! `AIC = n * mse / var(y) + 2 * df`, where `df` counts the non-zero coefficients, and
//! the breakpoint with the lowest score is reported on the original column scale.

use crate::diagnostics::Diagnostic;
use crate::lasso::NamedCoefficient;
use crate::preprocess::FactorMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Solve;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on path steps; drops can make the path longer than the column count.
pub const MAX_LARS_STEPS: usize = 500;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LarsError {
    #[error("The AIC-selected Lasso needs at least 2 observations, found {0}.")]
    TooFewObservations(usize),
    #[error("The factor matrix has no columns.")]
    NoFeatures,
    #[error("The factor matrix has {rows} rows but the response has {response} values.")]
    LengthMismatch { rows: usize, response: usize },
    #[error("Non-finite value in the {0}; Lasso input must be finite.")]
    NonFiniteInput(&'static str),
}

/// Breakpoints of a LARS-Lasso path, alphas descending.
#[derive(Debug, Clone)]
pub struct LarsPath {
    pub alphas: Array1<f64>,
    /// One row per breakpoint.
    pub coefs: Array2<f64>,
    /// Columns removed because they made the active Gram matrix singular.
    pub degenerate: Vec<usize>,
    pub hit_step_limit: bool,
}

enum Event {
    Enter(usize),
    Leave(usize),
    Saturated,
}

/// Traces the path on already centered inputs; `x` should have unit-norm columns.
///
/// The active set never grows beyond `min(p, n - 1)`, the rank a centered design
/// can reach. A variable that just left the active set cannot re-enter on the next
/// step, which keeps ties from cycling.
pub fn lars_lasso_path(x: ArrayView2<f64>, y: ArrayView1<f64>, max_steps: usize) -> LarsPath {
    let (n, p) = x.dim();
    let nf = n as f64;
    let max_active = p.min(n.saturating_sub(1));

    let mut beta = Array1::<f64>::zeros(p);
    let mut active: Vec<usize> = Vec::new();
    let mut excluded = vec![false; p];
    let mut degenerate = Vec::new();
    let mut alphas = Vec::new();
    let mut coefs: Vec<Array1<f64>> = Vec::new();

    let corr = x.t().dot(&y);
    let start = (0..p).max_by(|&a, &b| corr[a].abs().total_cmp(&corr[b].abs()));
    let c_start = start.map(|j| corr[j].abs()).unwrap_or(0.0);
    let tiny = 100.0 * f64::EPSILON * c_start.max(f64::MIN_POSITIVE);
    alphas.push(c_start / nf);
    coefs.push(beta.clone());
    if let Some(j) = start.filter(|_| c_start > tiny && max_active > 0) {
        active.push(j);
    }

    let mut just_left: Option<usize> = None;
    let mut steps = 0;
    let mut hit_step_limit = false;
    while !active.is_empty() {
        if steps == max_steps {
            hit_step_limit = true;
            break;
        }
        steps += 1;

        let residual = &y - &x.dot(&beta);
        let corr = x.t().dot(&residual);
        let c = active.iter().fold(0.0_f64, |max, &j| max.max(corr[j].abs()));
        if c <= tiny {
            break;
        }

        // --- Equiangular direction of the active set ---
        let signs: Array1<f64> = active.iter().map(|&j| corr[j].signum()).collect();
        let x_active = x.select(Axis(1), &active);
        let gram = x_active.t().dot(&x_active);
        let direction = match gram.solve(&signs) {
            Ok(w) if w.iter().all(|v| v.is_finite()) && signs.dot(&w) > 0.0 => w,
            _ => {
                // Only the newest member can have made the Gram matrix singular.
                if let Some(j) = active.pop() {
                    log::debug!("LARS: column {j} is degenerate with the active set; excluded.");
                    excluded[j] = true;
                    degenerate.push(j);
                }
                continue;
            }
        };
        let u = x_active.dot(&direction);
        let a = x.t().dot(&u);

        // --- Step length to the next event ---
        let mut gamma = c;
        let mut event = Event::Saturated;
        if active.len() < max_active {
            for j in 0..p {
                if excluded[j] || active.contains(&j) || just_left == Some(j) {
                    continue;
                }
                for step in [(c - corr[j]) / (1.0 - a[j]), (c + corr[j]) / (1.0 + a[j])] {
                    if step > tiny && step < gamma {
                        gamma = step;
                        event = Event::Enter(j);
                    }
                }
            }
        }
        for (k, &j) in active.iter().enumerate() {
            let step = -beta[j] / direction[k];
            if step > tiny && step < gamma {
                gamma = step;
                event = Event::Leave(j);
            }
        }

        for (k, &j) in active.iter().enumerate() {
            beta[j] += gamma * direction[k];
        }
        just_left = None;
        let saturated = match event {
            Event::Enter(j) => {
                active.push(j);
                false
            }
            Event::Leave(j) => {
                beta[j] = 0.0;
                active.retain(|&k| k != j);
                just_left = Some(j);
                false
            }
            Event::Saturated => true,
        };
        alphas.push((c - gamma).max(0.0) / nf);
        coefs.push(beta.clone());
        if saturated {
            break;
        }
    }

    let mut path = Array2::zeros((coefs.len(), p));
    for (k, row) in coefs.iter().enumerate() {
        path.row_mut(k).assign(row);
    }
    LarsPath {
        alphas: Array1::from_vec(alphas),
        coefs: path,
        degenerate,
        hit_step_limit,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LassoAicResult {
    pub alpha: f64,
    pub coefficients: Vec<NamedCoefficient>,
    pub intercept: f64,
    /// Path breakpoints and the criterion at each of them.
    pub alphas: Array1<f64>,
    pub criterion: Array1<f64>,
    pub diagnostics: Vec<Diagnostic>,
}

impl LassoAicResult {
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficients
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.coef)
    }
}

pub fn lasso_aic(x: &FactorMatrix, y: &Array1<f64>) -> Result<LassoAicResult, LarsError> {
    let (n, p) = x.values.dim();
    if y.len() != n {
        return Err(LarsError::LengthMismatch {
            rows: n,
            response: y.len(),
        });
    }
    if n < 2 {
        return Err(LarsError::TooFewObservations(n));
    }
    if p == 0 {
        return Err(LarsError::NoFeatures);
    }
    if x.values.iter().any(|v| !v.is_finite()) {
        return Err(LarsError::NonFiniteInput("factor matrix"));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(LarsError::NonFiniteInput("response"));
    }

    // --- Center and scale to unit norm ---
    let x_mean = x
        .values
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(p));
    let y_mean = y.mean().unwrap_or(0.0);
    let xc = &x.values - &x_mean;
    let yc = y.mapv(|v| v - y_mean);
    let scale = xc.map_axis(Axis(0), |c| {
        let norm = c.dot(&c).sqrt();
        if norm > 0.0 { norm } else { 1.0 }
    });
    let xn = &xc / &scale;

    let path = lars_lasso_path(xn.view(), yc.view(), MAX_LARS_STEPS);

    // --- Information criterion along the path ---
    let nf = n as f64;
    let variance = yc.dot(&yc) / nf;
    let criterion: Array1<f64> = path
        .coefs
        .outer_iter()
        .map(|beta| {
            let residual = &yc - &xn.dot(&beta);
            let mse = residual.dot(&residual) / nf;
            let df = beta.iter().filter(|b| b.abs() > f64::EPSILON).count() as f64;
            nf * mse / variance + 2.0 * df
        })
        .collect();
    let best = criterion
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best_k, best_c), (k, &c)| {
            if c < best_c { (k, c) } else { (best_k, best_c) }
        })
        .0;

    let coef = &path.coefs.row(best) / &scale;
    let intercept = y_mean - x_mean.dot(&coef);

    let mut diagnostics = Vec::new();
    if variance == 0.0 {
        diagnostics.push(Diagnostic::warning(
            "lasso_aic",
            "The response is constant; the criterion is undefined and every coefficient is zero.",
        ));
    }
    for &j in &path.degenerate {
        diagnostics.push(Diagnostic::warning(
            "lasso_aic",
            format!(
                "'{}' is collinear with the active set and was left out of the path.",
                x.names[j]
            ),
        ));
    }
    if path.hit_step_limit {
        diagnostics.push(Diagnostic::warning(
            "lasso_aic",
            format!("The path stopped after {MAX_LARS_STEPS} steps before reaching the least-squares end."),
        ));
    }
    log::info!(
        "Lasso AIC: selected alpha {:.4e} at breakpoint {best} of {} ({} non-zero coefficients)",
        path.alphas[best],
        path.alphas.len(),
        coef.iter().filter(|&&c| c != 0.0).count()
    );

    let coefficients = x
        .names
        .iter()
        .zip(coef.iter())
        .map(|(name, &coef)| NamedCoefficient {
            name: name.clone(),
            coef,
        })
        .collect();

    Ok(LassoAicResult {
        alpha: path.alphas[best],
        coefficients,
        intercept,
        alphas: path.alphas,
        criterion,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn random_design(n: usize, p: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        Array2::from_shape_fn((n, p), |_| normal.sample(&mut rng))
    }

    fn names(p: usize) -> Vec<String> {
        (0..p).map(|j| format!("f{j}")).collect()
    }

    #[test]
    fn path_ends_at_least_squares_when_well_determined() {
        let values = random_design(40, 3, 9);
        let y = values.dot(&array![2.0, -1.0, 0.5]) + 3.0;
        let x = FactorMatrix {
            names: names(3),
            values,
        };
        let result = lasso_aic(&x, &y).unwrap();
        // Exact data: the full least-squares fit has zero error and the lowest AIC.
        assert_abs_diff_eq!(result.coefficient("f0").unwrap(), 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(result.coefficient("f1").unwrap(), -1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(result.coefficient("f2").unwrap(), 0.5, epsilon = 1e-8);
        assert_abs_diff_eq!(result.intercept, 3.0, epsilon = 1e-8);
        assert_abs_diff_eq!(result.alpha, 0.0, epsilon = 1e-10);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn alphas_decrease_along_the_path() {
        let x = random_design(30, 6, 4);
        let mut rng = StdRng::seed_from_u64(8);
        let noise = Normal::new(0.0, 0.5).unwrap();
        let y = x.column(0).mapv(|v| v * 1.5 + noise.sample(&mut rng));
        let xc = &x - &x.mean_axis(Axis(0)).unwrap();
        let norms = xc.map_axis(Axis(0), |c| c.dot(&c).sqrt());
        let xn = &xc / &norms;
        let yc = y.mapv(|v| v - y.mean().unwrap());
        let path = lars_lasso_path(xn.view(), yc.view(), MAX_LARS_STEPS);
        assert!(path.coefs.row(0).iter().all(|&c| c == 0.0));
        assert!(path.alphas.windows(2).into_iter().all(|w| w[0] >= w[1] - 1e-12));
        // The strongest predictor enters first.
        assert!(path.coefs[[1, 0]] != 0.0);
        assert!(path.coefs.row(1).iter().skip(1).all(|&c| c == 0.0));
    }

    #[test]
    fn noise_columns_are_mostly_left_out() {
        let values = random_design(60, 5, 21);
        let mut rng = StdRng::seed_from_u64(3);
        let noise = Normal::new(0.0, 0.2).unwrap();
        let y = values.column(0).mapv(|v| 2.0 * v + noise.sample(&mut rng));
        let x = FactorMatrix {
            names: names(5),
            values,
        };
        let result = lasso_aic(&x, &y).unwrap();
        assert!(result.coefficient("f0").unwrap() > 1.8);
        assert_eq!(result.criterion.len(), result.alphas.len());
        let best = result
            .criterion
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        assert!(result.criterion.iter().all(|&c| c >= best));
    }

    #[test]
    fn identical_columns_never_share_the_active_set() {
        let base = random_design(20, 2, 5);
        let mut values = Array2::zeros((20, 3));
        values.column_mut(0).assign(&base.column(0));
        values.column_mut(1).assign(&base.column(1));
        values.column_mut(2).assign(&base.column(0));
        let y = base.column(0).mapv(|v| 4.0 * v) + &base.column(1);
        let x = FactorMatrix {
            names: names(3),
            values,
        };
        let result = lasso_aic(&x, &y).unwrap();
        let twin_a = result.coefficient("f0").unwrap();
        let twin_b = result.coefficient("f2").unwrap();
        assert!(twin_a == 0.0 || twin_b == 0.0);
        assert_abs_diff_eq!(twin_a + twin_b, 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.coefficient("f1").unwrap(), 1.0, epsilon = 1e-6);
    }
}
