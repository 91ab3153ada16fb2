//! # Outlier Filter
//!
//! Single-pass rejection of observations whose effect size lies strictly outside
//! `[mean - k·std, mean + k·std]`. The band is computed once, from every observation
//! handed to the filter, and is never recomputed after removal. Calling the filter
//! again on its own output therefore computes a band from the reduced set, which can
//! reject further observations; the filter is not idempotent.
//!
//! `std` is the sample standard deviation (n - 1 denominator).

use crate::diagnostics::Diagnostic;
use crate::ingest::ObservationTable;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Band width used by the analysis.
pub const DEFAULT_N_STD: f64 = 3.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutlierError {
    #[error("The table has {rows} observations but {effect_sizes} effect sizes were supplied.")]
    LengthMismatch { rows: usize, effect_sizes: usize },
    #[error("Effect size of observation {index} is not finite ({value}).")]
    NonFiniteEffectSize { index: usize, value: f64 },
    #[error("The band width must be a positive finite number of standard deviations, found {0}.")]
    InvalidWidth(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceBand {
    pub mean: f64,
    pub std: f64,
    pub lower: f64,
    pub upper: f64,
}

impl AcceptanceBand {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedObservation {
    /// Position in the table handed to the filter.
    pub index: usize,
    pub study: String,
    pub score_name: String,
    pub effect_size: f64,
}

/// Surviving observations with their effect sizes, filtered together.
#[derive(Debug, Clone)]
pub struct FilteredObservations {
    pub table: ObservationTable,
    pub effect_size: Array1<f64>,
    /// `None` when the band could not be formed (see `reject_outliers`).
    pub band: Option<AcceptanceBand>,
    pub rejected: Vec<RejectedObservation>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Removes every observation whose effect size falls strictly outside the band.
///
/// Degenerate input: with fewer than two observations, or when every effect size is
/// identical (std = 0), no band can discriminate anything. The filter then keeps every
/// observation and reports a warning instead of rejecting rows.
pub fn reject_outliers(
    table: &ObservationTable,
    effect_size: &Array1<f64>,
    n_std: f64,
) -> Result<FilteredObservations, OutlierError> {
    if table.len() != effect_size.len() {
        return Err(OutlierError::LengthMismatch {
            rows: table.len(),
            effect_sizes: effect_size.len(),
        });
    }
    if !n_std.is_finite() || n_std <= 0.0 {
        return Err(OutlierError::InvalidWidth(n_std));
    }
    if let Some((index, &value)) = effect_size.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(OutlierError::NonFiniteEffectSize { index, value });
    }

    let n = effect_size.len();
    let std = if n >= 2 { effect_size.std(1.0) } else { 0.0 };
    if std == 0.0 {
        let message = format!(
            "Effect sizes have zero spread over {n} observations; outlier rejection skipped."
        );
        return Ok(FilteredObservations {
            table: table.clone(),
            effect_size: effect_size.clone(),
            band: None,
            rejected: Vec::new(),
            diagnostics: vec![Diagnostic::warning("outliers", message)],
        });
    }

    let mean = effect_size.sum() / n as f64;
    let band = AcceptanceBand {
        mean,
        std,
        lower: mean - n_std * std,
        upper: mean + n_std * std,
    };

    let mut kept = Vec::with_capacity(n);
    let mut rejected = Vec::new();
    for (index, &value) in effect_size.iter().enumerate() {
        if band.contains(value) {
            kept.push(index);
        } else {
            let obs = &table.observations()[index];
            rejected.push(RejectedObservation {
                index,
                study: obs.study.clone(),
                score_name: obs.score_name.clone(),
                effect_size: value,
            });
        }
    }

    let mut diagnostics = Vec::new();
    for r in &rejected {
        diagnostics.push(Diagnostic::info(
            "outliers",
            format!(
                "Rejected {} ({}) with effect size {:.3} outside [{:.3}, {:.3}].",
                r.study, r.score_name, r.effect_size, band.lower, band.upper
            ),
        ));
    }
    log::info!(
        "Outlier band [{:.3}, {:.3}] rejected {} of {} observations.",
        band.lower,
        band.upper,
        rejected.len(),
        n
    );

    let survivors = Array1::from_iter(kept.iter().map(|&i| effect_size[i]));
    Ok(FilteredObservations {
        table: table.select_rows(&kept),
        effect_size: survivors,
        band: Some(band),
        rejected,
        diagnostics,
    })
}
