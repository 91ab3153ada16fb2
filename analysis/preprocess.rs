//! # Factor Preprocessing
//!
//! Turns the configured factor columns into a numeric design matrix, in a fixed order:
//!
//! 1. Select exactly the configured factors; everything else in the table (identifiers,
//!    raw scores, effect sizes) never reaches the matrix.
//! 2. Drop factors with more than `round(n * missing_ratio) + 1` missing values.
//! 3. One-hot encode categorical factors, dropping the first (sorted) level.
//! 4. Drop binary columns where the count of zeros or of ones exceeds
//!    `round(n * homogeneity_ratio) + 1`.
//! 5. Fill the remaining missing values with a fixed sentinel.
//! 6. Z-score every column (sample standard deviation) for the standardized variant.
//!
//! The sentinel in step 5 is not an imputation: a missing value becomes
//! indistinguishable from a genuinely low value of the factor, and the models read it
//! that way. Every filled column is reported as a warning.
//!
//! A column left constant after step 5 cannot be z-scored; it is removed from both
//! variants and reported, so the two variants always share rows and columns.

use crate::diagnostics::Diagnostic;
use crate::ingest::schema::RESERVED_NAMES;
use crate::ingest::{FactorKind, FactorSpec, FactorValues, ObservationTable};
use itertools::Itertools;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("Factor '{0}' is configured but the table has no such column.")]
    UnknownColumn(String),
    #[error("Factor '{0}' is configured more than once.")]
    DuplicateFactor(String),
    #[error("'{0}' is an identifier or outcome column and cannot be used as a factor.")]
    ReservedColumn(String),
    #[error("Factor '{name}' is configured as {expected} but the table holds {found} values.")]
    KindMismatch {
        name: String,
        expected: FactorKind,
        found: FactorKind,
    },
    #[error("The table has no observations to preprocess.")]
    EmptyTable,
    #[error("No factor survived preprocessing; there is nothing to model.")]
    NoFactorsRemain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessSettings {
    pub missing_ratio: f64,
    pub homogeneity_ratio: f64,
    pub fill_value: f64,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            missing_ratio: 0.20,
            homogeneity_ratio: 0.80,
            fill_value: -1.0,
        }
    }
}

/// Named numeric matrix, one row per observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorMatrix {
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

impl FactorMatrix {
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DropReason {
    TooManyMissing { missing: usize, limit: usize },
    SingleLevel,
    TooHomogeneous { zeros: usize, ones: usize, limit: usize },
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedFactor {
    pub name: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone)]
pub struct PreparedFactors {
    /// Z-scored columns.
    pub standardized: FactorMatrix,
    /// Same rows and columns before z-scoring (dummies as 0/1, sentinel in place).
    pub raw: FactorMatrix,
    pub means: Array1<f64>,
    pub stds: Array1<f64>,
    pub dropped: Vec<DroppedFactor>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Tolerance-free `round(n * ratio) + 1`, the largest count a factor may have of a
/// single kind of value (missing, zero or one) before it is dropped.
pub fn count_limit(n_rows: usize, ratio: f64) -> usize {
    (n_rows as f64 * ratio).round() as usize + 1
}

struct WorkingColumn {
    name: String,
    values: Vec<Option<f64>>,
}

pub fn preprocess_factors(
    table: &ObservationTable,
    specs: &[FactorSpec],
    settings: &PreprocessSettings,
) -> Result<PreparedFactors, PreprocessError> {
    let n = table.len();
    if n == 0 {
        return Err(PreprocessError::EmptyTable);
    }

    let mut seen = HashSet::new();
    for spec in specs {
        if RESERVED_NAMES.contains(&spec.name.as_str()) {
            return Err(PreprocessError::ReservedColumn(spec.name.clone()));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(PreprocessError::DuplicateFactor(spec.name.clone()));
        }
    }

    let mut dropped = Vec::new();
    let mut diagnostics = Vec::new();

    // --- Steps 1-2: select configured factors and prune sparse ones ---
    let missing_limit = count_limit(n, settings.missing_ratio);
    let mut numeric = Vec::new();
    let mut categorical = Vec::new();
    for spec in specs {
        let column = table
            .factor(&spec.name)
            .ok_or_else(|| PreprocessError::UnknownColumn(spec.name.clone()))?;
        if column.values.kind() != spec.kind {
            return Err(PreprocessError::KindMismatch {
                name: spec.name.clone(),
                expected: spec.kind,
                found: column.values.kind(),
            });
        }

        let missing = column.values.missing_count();
        if missing > missing_limit {
            log::debug!("Dropping '{}': {missing} missing values.", spec.name);
            dropped.push(DroppedFactor {
                name: spec.name.clone(),
                reason: DropReason::TooManyMissing {
                    missing,
                    limit: missing_limit,
                },
            });
            continue;
        }

        match &column.values {
            FactorValues::Numeric(values) => numeric.push(WorkingColumn {
                name: spec.name.clone(),
                values: values.clone(),
            }),
            FactorValues::Categorical(values) => categorical.push((spec.name.clone(), values)),
        }
    }

    // --- Step 3: k-1 dummy coding, appended after the numeric factors ---
    let mut columns = numeric;
    for (name, values) in categorical {
        let levels: Vec<&String> = values.iter().flatten().sorted().dedup().collect();
        if levels.len() < 2 {
            dropped.push(DroppedFactor {
                name: name.clone(),
                reason: DropReason::SingleLevel,
            });
            continue;
        }
        for level in levels.into_iter().skip(1) {
            let dummy = values
                .iter()
                .map(|v| Some(if v.as_ref() == Some(level) { 1.0 } else { 0.0 }))
                .collect();
            columns.push(WorkingColumn {
                name: format!("{name}_{level}"),
                values: dummy,
            });
        }
    }

    // --- Step 4: homogeneous binary columns ---
    let homogeneity_limit = count_limit(n, settings.homogeneity_ratio);
    columns.retain(|column| {
        let present: Vec<f64> = column.values.iter().flatten().copied().collect();
        if !present.iter().all(|&v| v == 0.0 || v == 1.0) {
            return true;
        }
        let ones = present.iter().filter(|&&v| v == 1.0).count();
        let zeros = present.len() - ones;
        if zeros > homogeneity_limit || ones > homogeneity_limit {
            log::debug!("Dropping '{}': {zeros} zeros, {ones} ones.", column.name);
            dropped.push(DroppedFactor {
                name: column.name.clone(),
                reason: DropReason::TooHomogeneous {
                    zeros,
                    ones,
                    limit: homogeneity_limit,
                },
            });
            return false;
        }
        true
    });

    // --- Step 5: sentinel fill ---
    for column in &columns {
        let missing = column.values.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            diagnostics.push(Diagnostic::warning(
                "preprocess",
                format!(
                    "{missing} missing value(s) of '{}' replaced by {}; the models cannot tell them from a low value.",
                    column.name, settings.fill_value
                ),
            ));
        }
    }
    let mut raw = Array2::zeros((n, columns.len()));
    for (j, column) in columns.iter().enumerate() {
        for (i, value) in column.values.iter().enumerate() {
            raw[[i, j]] = value.unwrap_or(settings.fill_value);
        }
    }
    let mut names: Vec<String> = columns.into_iter().map(|c| c.name).collect();

    // --- Step 6: standardization ---
    let stds = if n >= 2 {
        raw.std_axis(Axis(0), 1.0)
    } else {
        Array1::zeros(names.len())
    };
    let constant: Vec<usize> = (0..names.len()).filter(|&j| stds[j] <= 0.0).collect();
    if !constant.is_empty() {
        let keep: Vec<usize> = (0..names.len()).filter(|j| !constant.contains(j)).collect();
        for &j in &constant {
            diagnostics.push(Diagnostic::warning(
                "preprocess",
                format!("'{}' is constant over the surviving observations and was removed.", names[j]),
            ));
            dropped.push(DroppedFactor {
                name: names[j].clone(),
                reason: DropReason::Constant,
            });
        }
        raw = raw.select(Axis(1), &keep);
        names = keep.iter().map(|&j| names[j].clone()).collect();
    }
    if names.is_empty() {
        return Err(PreprocessError::NoFactorsRemain);
    }

    let means = raw.mean_axis(Axis(0)).ok_or(PreprocessError::EmptyTable)?;
    let stds = raw.std_axis(Axis(0), 1.0);
    let standardized = (&raw - &means) / &stds;

    log::info!(
        "Preprocessing kept {} columns over {n} observations ({} factors dropped).",
        names.len(),
        dropped.len()
    );
    Ok(PreparedFactors {
        standardized: FactorMatrix {
            names: names.clone(),
            values: standardized,
        },
        raw: FactorMatrix { names, values: raw },
        means,
        stds,
        dropped,
        diagnostics,
    })
}
