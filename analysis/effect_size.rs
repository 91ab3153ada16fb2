//! # Effect Size Engine
//!
//! Within-subject standardized effect sizes (Cohen, 1988) and normalized baseline
//! severity, computed independently for every observation.
//!
//! Sign convention: clinical scales here score pathology, so a treatment that helps
//! lowers the post-test mean and yields a negative effect size.

use crate::diagnostics::Diagnostic;
use crate::ingest::schema::SEVERITY_AT_BASELINE;
use crate::ingest::{DataError, FactorColumn, FactorValues, ObservationTable};
use ndarray::Array1;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectSizeError {
    #[error(
        "Observation {index} ({study}, line {line}): pre and post standard deviations are both zero, so the effect size is undefined."
    )]
    ZeroPooledVariance {
        index: usize,
        study: String,
        line: usize,
    },
    #[error(
        "Observation {index} ({study}, line {line}): standard deviations must be finite and non-negative, found pre={std_pre} post={std_post}."
    )]
    InvalidStd {
        index: usize,
        study: String,
        line: usize,
        std_pre: f64,
        std_post: f64,
    },
    #[error(
        "Observation {index} ({study}, line {line}): the scale maximum must be positive, found {max_scale}."
    )]
    NonPositiveScaleMaximum {
        index: usize,
        study: String,
        line: usize,
        max_scale: f64,
    },
    #[error("Observation {index} ({study}, line {line}): the pre/post means must be finite.")]
    NonFiniteMean {
        index: usize,
        study: String,
        line: usize,
    },
}

/// `(mean_post - mean_pre) / sqrt((std_pre² + std_post²) / 2)`.
///
/// Returns `None` when the pooled variance is zero or any input is not finite.
/// A negative value favours the treatment.
pub fn within_subject_effect_size(
    mean_pre: f64,
    mean_post: f64,
    std_pre: f64,
    std_post: f64,
) -> Option<f64> {
    let pooled_variance = (std_pre.powi(2) + std_post.powi(2)) / 2.0;
    if !pooled_variance.is_finite() || pooled_variance <= 0.0 {
        return None;
    }
    let effect = (mean_post - mean_pre) / pooled_variance.sqrt();
    effect.is_finite().then_some(effect)
}

/// `mean_pre / max_scale`, or `None` when the maximum is not a positive finite number.
pub fn normalized_baseline_severity(mean_pre: f64, max_scale: f64) -> Option<f64> {
    if !max_scale.is_finite() || max_scale <= 0.0 || !mean_pre.is_finite() {
        return None;
    }
    Some(mean_pre / max_scale)
}

/// Derived columns for every observation of a table, row-aligned with it.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectSizes {
    pub effect_size: Array1<f64>,
    pub severity_at_baseline: Array1<f64>,
    /// Plausibility notes, e.g. a mean outside `[0, max_scale]`.
    pub diagnostics: Vec<Diagnostic>,
}

/// Computes both derived quantities for every observation. The first invalid
/// observation aborts the computation; no undefined value is ever returned.
pub fn compute_effect_sizes(table: &ObservationTable) -> Result<EffectSizes, EffectSizeError> {
    let n = table.len();
    let mut effect_size = Array1::zeros(n);
    let mut severity = Array1::zeros(n);
    let mut diagnostics = Vec::new();

    for (index, obs) in table.observations().iter().enumerate() {
        if !obs.mean_pre.is_finite() || !obs.mean_post.is_finite() {
            return Err(EffectSizeError::NonFiniteMean {
                index,
                study: obs.study.clone(),
                line: obs.source_line,
            });
        }
        let valid_std = |s: f64| s.is_finite() && s >= 0.0;
        if !valid_std(obs.std_pre) || !valid_std(obs.std_post) {
            return Err(EffectSizeError::InvalidStd {
                index,
                study: obs.study.clone(),
                line: obs.source_line,
                std_pre: obs.std_pre,
                std_post: obs.std_post,
            });
        }

        // Negative means the pathology score fell, i.e. in favour of the treatment.
        effect_size[index] =
            within_subject_effect_size(obs.mean_pre, obs.mean_post, obs.std_pre, obs.std_post)
                .ok_or_else(|| EffectSizeError::ZeroPooledVariance {
                    index,
                    study: obs.study.clone(),
                    line: obs.source_line,
                })?;

        severity[index] = normalized_baseline_severity(obs.mean_pre, obs.max_scale).ok_or_else(
            || EffectSizeError::NonPositiveScaleMaximum {
                index,
                study: obs.study.clone(),
                line: obs.source_line,
                max_scale: obs.max_scale,
            },
        )?;

        // Scales score from 0 up to their maximum; anything else is likely a typo.
        let in_scale = |mean: f64| (0.0..=obs.max_scale).contains(&mean);
        if !in_scale(obs.mean_pre) || !in_scale(obs.mean_post) {
            diagnostics.push(Diagnostic::warning(
                "effect_size",
                format!(
                    "Observation {index} ({}, line {}): means pre={} post={} lie outside the scale range [0, {}].",
                    obs.study, obs.source_line, obs.mean_pre, obs.mean_post, obs.max_scale
                ),
            ));
        }
    }

    log::debug!("Computed {n} within-subject effect sizes.");
    Ok(EffectSizes {
        effect_size,
        severity_at_baseline: severity,
        diagnostics,
    })
}

/// Adds `severity_at_baseline` to the table as a numeric factor.
pub fn attach_baseline_severity(
    table: &mut ObservationTable,
    sizes: &EffectSizes,
) -> Result<(), DataError> {
    table.push_factor(FactorColumn {
        name: SEVERITY_AT_BASELINE.to_string(),
        values: FactorValues::Numeric(sizes.severity_at_baseline.iter().map(|&v| Some(v)).collect()),
    })
}
