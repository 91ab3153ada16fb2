//! # Least-Squares Strategies
//!
//! Weighted and ordinary least squares with an intercept, fitted through the
//! pseudo-inverse of the (whitened) design matrix so that a rank-deficient design
//! still yields the minimum-norm solution instead of an abort.
//!
//! The summary mirrors the usual regression report: per-coefficient inference from the
//! Student t distribution, the overall F test, information criteria, and the residual
//! normality diagnostics (Omnibus, Jarque-Bera, skew, kurtosis, Durbin-Watson).
//!
//! For WLS every residual statistic is computed on the whitened residuals
//! `sqrt(w) * (y - Xβ)`, and the total sum of squares is centered on the weighted mean.

use crate::diagnostics::{Diagnostic, format_cond};
use crate::ingest::ObservationTable;
use crate::linalg::{self, MatrixDiagnostics, MatrixError};
use crate::preprocess::FactorMatrix;
use ahash::AHashMap;
use ndarray::{Array1, Array2, Axis, s};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, StudentsT};
use std::f64::consts::PI;
use std::fmt;
use thiserror::Error;

/// Relative singular-value cutoff of the pseudo-inverse.
const PINV_RCOND: f64 = 1e-15;
/// Design condition numbers above this are reported as strong multicollinearity.
const CONDITION_WARNING: f64 = 1000.0;
pub const INTERCEPT_NAME: &str = "const";

#[derive(Error, Debug)]
pub enum RegressionError {
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error("The design matrix has {rows} rows but the response has {response} values.")]
    ResponseLengthMismatch { rows: usize, response: usize },
    #[error("The design matrix has {rows} rows but {weights} weights were supplied.")]
    WeightLengthMismatch { rows: usize, weights: usize },
    #[error("Weight {index} must be positive and finite, found {value}.")]
    InvalidWeight { index: usize, value: f64 },
    #[error("Response value {index} is not finite ({value}).")]
    NonFiniteResponse { index: usize, value: f64 },
    #[error("Cannot fit a regression without observations.")]
    NoObservations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegressionMethod {
    Ols,
    Wls,
}

impl RegressionMethod {
    fn stage(self) -> &'static str {
        match self {
            RegressionMethod::Ols => "ols",
            RegressionMethod::Wls => "wls",
        }
    }
}

impl fmt::Display for RegressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegressionMethod::Ols => write!(f, "OLS"),
            RegressionMethod::Wls => write!(f, "WLS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub name: String,
    pub coef: f64,
    pub std_err: f64,
    pub t_value: f64,
    pub p_value: f64,
    /// Bounds of the 95% confidence interval.
    pub conf_low: f64,
    pub conf_high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSummary {
    pub method: RegressionMethod,
    pub n_observations: usize,
    pub df_model: f64,
    pub df_resid: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub f_statistic: f64,
    pub f_p_value: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub omnibus: f64,
    pub omnibus_p_value: f64,
    pub skew: f64,
    pub kurtosis: f64,
    pub durbin_watson: f64,
    pub jarque_bera: f64,
    pub jarque_bera_p_value: f64,
    /// Condition number of the whitened design matrix, intercept included.
    pub condition_number: f64,
    pub coefficients: Vec<CoefficientRow>,
    /// Identifiability of the factor moment matrix, intercept excluded.
    pub moment: MatrixDiagnostics,
    pub diagnostics: Vec<Diagnostic>,
}

impl RegressionSummary {
    pub fn coefficient(&self, name: &str) -> Option<&CoefficientRow> {
        self.coefficients.iter().find(|row| row.name == name)
    }
}

impl fmt::Display for RegressionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} regression, {} observations", self.method, self.n_observations)?;
        writeln!(
            f,
            "R-squared: {:.3}   Adj. R-squared: {:.3}   F-statistic: {:.3} (p = {:.4})",
            self.r_squared, self.adj_r_squared, self.f_statistic, self.f_p_value
        )?;
        writeln!(
            f,
            "Log-likelihood: {:.3}   AIC: {:.3}   BIC: {:.3}   Df model: {}   Df resid: {}",
            self.log_likelihood, self.aic, self.bic, self.df_model, self.df_resid
        )?;
        writeln!(
            f,
            "{:<36} {:>10} {:>10} {:>8} {:>8} {:>10} {:>10}",
            "", "coef", "std err", "t", "P>|t|", "[0.025", "0.975]"
        )?;
        for row in &self.coefficients {
            writeln!(
                f,
                "{:<36} {:>10.4} {:>10.4} {:>8.3} {:>8.3} {:>10.4} {:>10.4}",
                row.name, row.coef, row.std_err, row.t_value, row.p_value, row.conf_low, row.conf_high
            )?;
        }
        writeln!(
            f,
            "Omnibus: {:.3} (p = {:.3})   Skew: {:.3}   Kurtosis: {:.3}",
            self.omnibus, self.omnibus_p_value, self.skew, self.kurtosis
        )?;
        writeln!(
            f,
            "Durbin-Watson: {:.3}   Jarque-Bera: {:.3} (p = {:.3})   Cond. No.: {}",
            self.durbin_watson,
            self.jarque_bera,
            self.jarque_bera_p_value,
            format_cond(self.condition_number)
        )
    }
}

/// `n_treatment / (number of observations sharing the study identifier)`.
///
/// A study reporting several scales for one rater splits its patient count evenly
/// across them, so it weighs no more than a study reporting a single scale.
pub fn study_weights(table: &ObservationTable) -> Array1<f64> {
    let mut scales_per_study: AHashMap<&str, usize> = AHashMap::new();
    for obs in table.observations() {
        *scales_per_study.entry(obs.study.as_str()).or_insert(0) += 1;
    }
    table
        .observations()
        .iter()
        .map(|obs| obs.n_treatment as f64 / scales_per_study[obs.study.as_str()] as f64)
        .collect()
}

pub fn ordinary_least_squares(
    x: &FactorMatrix,
    y: &Array1<f64>,
) -> Result<RegressionSummary, RegressionError> {
    fit(RegressionMethod::Ols, x, y, None)
}

pub fn weighted_least_squares(
    x: &FactorMatrix,
    y: &Array1<f64>,
    weights: &Array1<f64>,
) -> Result<RegressionSummary, RegressionError> {
    fit(RegressionMethod::Wls, x, y, Some(weights))
}

fn fit(
    method: RegressionMethod,
    x: &FactorMatrix,
    y: &Array1<f64>,
    weights: Option<&Array1<f64>>,
) -> Result<RegressionSummary, RegressionError> {
    let n = x.nrows();
    let stage = method.stage();
    if n == 0 {
        return Err(RegressionError::NoObservations);
    }
    if y.len() != n {
        return Err(RegressionError::ResponseLengthMismatch {
            rows: n,
            response: y.len(),
        });
    }
    if let Some((index, &value)) = y.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(RegressionError::NonFiniteResponse { index, value });
    }
    let weights = match weights {
        Some(w) => {
            if w.len() != n {
                return Err(RegressionError::WeightLengthMismatch {
                    rows: n,
                    weights: w.len(),
                });
            }
            if let Some((index, &value)) = w
                .iter()
                .enumerate()
                .find(|(_, v)| !(v.is_finite() && **v > 0.0))
            {
                return Err(RegressionError::InvalidWeight { index, value });
            }
            w.clone()
        }
        None => Array1::ones(n),
    };

    let mut diagnostics = Vec::new();

    // --- Identifiability of the factor moment matrix ---
    let moment = match method {
        RegressionMethod::Wls => linalg::moment_matrix_diagnostics(&x.values, Some(&weights))?,
        RegressionMethod::Ols => linalg::moment_matrix_diagnostics(&x.values, None)?,
    };
    log::info!(
        "{method}: moment matrix rank {} of {}, condition number {}",
        moment.rank,
        moment.dimension,
        format_cond(moment.condition_number)
    );
    if !moment.invertible {
        diagnostics.push(Diagnostic::warning(
            stage,
            format!(
                "Moment matrix has rank {} < {}: the system is not identifiable and cannot be inverted; coefficients come from the pseudo-inverse.",
                moment.rank, moment.dimension
            ),
        ));
    }

    // --- Whitened design with intercept ---
    let mut design = Array2::ones((n, x.ncols() + 1));
    design.slice_mut(s![.., 1..]).assign(&x.values);
    let sqrt_w = weights.mapv(f64::sqrt);
    let design_w = &design * &sqrt_w.view().insert_axis(Axis(1));
    let y_w = y * &sqrt_w;

    let (pinv, rank) = linalg::pseudo_inverse(&design_w, PINV_RCOND)?;
    let params = pinv.dot(&y_w);
    let normalized_cov = pinv.dot(&pinv.t());

    let k = design.ncols();
    if rank < k {
        diagnostics.push(Diagnostic::warning(
            stage,
            format!("Design matrix has rank {rank} for {k} coefficients; the minimum-norm solution is reported."),
        ));
    }

    let df_model = rank as f64 - 1.0;
    let df_resid = n as f64 - rank as f64;
    if df_resid <= 0.0 {
        diagnostics.push(Diagnostic::warning(
            stage,
            format!("{n} observations leave {df_resid} residual degrees of freedom; inference statistics are undefined."),
        ));
    }

    let resid_w = &y_w - &design_w.dot(&params);
    let ssr = resid_w.dot(&resid_w);
    let scale = ssr / df_resid;

    let weighted_mean = weights.dot(y) / weights.sum();
    let centered_tss: f64 = y
        .iter()
        .zip(weights.iter())
        .map(|(&yi, &wi)| wi * (yi - weighted_mean).powi(2))
        .sum();
    let ess = centered_tss - ssr;
    let r_squared = 1.0 - ssr / centered_tss;
    let adj_r_squared = 1.0 - (n as f64 - 1.0) / df_resid * (1.0 - r_squared);
    let f_statistic = (ess / df_model) / (ssr / df_resid);
    let f_p_value = FisherSnedecor::new(df_model, df_resid)
        .map(|dist| dist.sf(f_statistic))
        .unwrap_or(f64::NAN);

    // --- Likelihood and information criteria ---
    let nobs2 = n as f64 / 2.0;
    let mut log_likelihood = -nobs2 * (2.0 * PI).ln() - nobs2 * (ssr / n as f64).ln() - nobs2;
    if method == RegressionMethod::Wls {
        log_likelihood += 0.5 * weights.mapv(f64::ln).sum();
    }
    let n_params = df_model + 1.0;
    let aic = -2.0 * log_likelihood + 2.0 * n_params;
    let bic = -2.0 * log_likelihood + (n as f64).ln() * n_params;

    // --- Coefficient inference ---
    let t_dist = StudentsT::new(0.0, 1.0, df_resid).ok();
    let t_crit = t_dist
        .as_ref()
        .map(|dist| dist.inverse_cdf(0.975))
        .unwrap_or(f64::NAN);
    let names = std::iter::once(INTERCEPT_NAME.to_string()).chain(x.names.iter().cloned());
    let coefficients = names
        .enumerate()
        .map(|(j, name)| {
            let coef = params[j];
            let std_err = (normalized_cov[[j, j]] * scale).sqrt();
            let t_value = coef / std_err;
            let p_value = t_dist
                .as_ref()
                .map(|dist| 2.0 * dist.sf(t_value.abs()))
                .unwrap_or(f64::NAN);
            CoefficientRow {
                name,
                coef,
                std_err,
                t_value,
                p_value,
                conf_low: coef - t_crit * std_err,
                conf_high: coef + t_crit * std_err,
            }
        })
        .collect();

    // --- Residual diagnostics ---
    let (omnibus, omnibus_p_value) = omnibus_test(&resid_w);
    if omnibus.is_nan() {
        diagnostics.push(Diagnostic::info(
            stage,
            format!("Omnibus normality test needs at least 8 residuals, found {n}."),
        ));
    }
    let (skew, kurtosis) = skew_and_kurtosis(&resid_w);
    let jarque_bera = n as f64 / 6.0 * (skew.powi(2) + (kurtosis - 3.0).powi(2) / 4.0);
    let jarque_bera_p_value = chi_squared_sf(jarque_bera, 2.0);

    let condition_number = linalg::condition_number(&design_w)?;
    if condition_number > CONDITION_WARNING {
        diagnostics.push(Diagnostic::warning(
            stage,
            format!(
                "Design condition number is {}; strong multicollinearity or other numerical problems.",
                format_cond(condition_number)
            ),
        ));
    }

    Ok(RegressionSummary {
        method,
        n_observations: n,
        df_model,
        df_resid,
        r_squared,
        adj_r_squared,
        f_statistic,
        f_p_value,
        log_likelihood,
        aic,
        bic,
        omnibus,
        omnibus_p_value,
        skew,
        kurtosis,
        durbin_watson: durbin_watson(&resid_w),
        jarque_bera,
        jarque_bera_p_value,
        condition_number,
        coefficients,
        moment,
        diagnostics,
    })
}

fn chi_squared_sf(statistic: f64, dof: f64) -> f64 {
    if !statistic.is_finite() {
        return f64::NAN;
    }
    ChiSquared::new(dof)
        .map(|dist| dist.sf(statistic))
        .unwrap_or(f64::NAN)
}

/// Population skewness and Pearson (non-excess) kurtosis.
fn skew_and_kurtosis(resid: &Array1<f64>) -> (f64, f64) {
    let n = resid.len() as f64;
    let mean = resid.sum() / n;
    let central = resid.mapv(|r| r - mean);
    let m2 = central.mapv(|c| c.powi(2)).sum() / n;
    let m3 = central.mapv(|c| c.powi(3)).sum() / n;
    let m4 = central.mapv(|c| c.powi(4)).sum() / n;
    (m3 / m2.powf(1.5), m4 / m2.powi(2))
}

/// D'Agostino-Pearson K² and its chi-squared(2) p-value; NaN below 8 residuals.
fn omnibus_test(resid: &Array1<f64>) -> (f64, f64) {
    if resid.len() < 8 {
        return (f64::NAN, f64::NAN);
    }
    let (skew, kurtosis) = skew_and_kurtosis(resid);
    let n = resid.len() as f64;
    let k2 = skew_z(skew, n).powi(2) + kurtosis_z(kurtosis, n).powi(2);
    (k2, chi_squared_sf(k2, 2.0))
}

fn skew_z(skew: f64, n: f64) -> f64 {
    let mut y = skew * ((n + 1.0) * (n + 3.0) / (6.0 * (n - 2.0))).sqrt();
    let beta2 = 3.0 * (n * n + 27.0 * n - 70.0) * (n + 1.0) * (n + 3.0)
        / ((n - 2.0) * (n + 5.0) * (n + 7.0) * (n + 9.0));
    let w2 = -1.0 + (2.0 * (beta2 - 1.0)).sqrt();
    let delta = 1.0 / (0.5 * w2.ln()).sqrt();
    let alpha = (2.0 / (w2 - 1.0)).sqrt();
    if y == 0.0 {
        y = 1.0;
    }
    delta * (y / alpha + ((y / alpha).powi(2) + 1.0).sqrt()).ln()
}

fn kurtosis_z(kurtosis: f64, n: f64) -> f64 {
    let expected = 3.0 * (n - 1.0) / (n + 1.0);
    let variance = 24.0 * n * (n - 2.0) * (n - 3.0)
        / ((n + 1.0).powi(2) * (n + 3.0) * (n + 5.0));
    let x = (kurtosis - expected) / variance.sqrt();
    let sqrt_beta1 = 6.0 * (n * n - 5.0 * n + 2.0) / ((n + 7.0) * (n + 9.0))
        * (6.0 * (n + 3.0) * (n + 5.0) / (n * (n - 2.0) * (n - 3.0))).sqrt();
    let a = 6.0
        + 8.0 / sqrt_beta1 * (2.0 / sqrt_beta1 + (1.0 + 4.0 / sqrt_beta1.powi(2)).sqrt());
    let term1 = 1.0 - 2.0 / (9.0 * a);
    let denom = 1.0 + x * (2.0 / (a - 4.0)).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    let term2 = denom.signum() * ((1.0 - 2.0 / a) / denom.abs()).cbrt();
    (term1 - term2) / (2.0 / (9.0 * a)).sqrt()
}

fn durbin_watson(resid: &Array1<f64>) -> f64 {
    let diff_ss: f64 = resid
        .windows(2)
        .into_iter()
        .map(|w| (w[1] - w[0]).powi(2))
        .sum();
    diff_ss / resid.dot(resid)
}
