//! # Spreadsheet Loading
//!
//! Reads the trial spreadsheet (CSV) and reshapes it into one `ObservationTable` per
//! rater. The file holds two lines per (study, scale, rater): a `pre` line followed by
//! a `post` line. Pairs are matched positionally within a rater, then checked to belong
//! to the same study and scale.
//!
//! Factor values are taken from the `pre` line of each pair.

use super::schema::{
    AUTHOR, FactorKind, FactorSpec, MAXIMUM_ON_SCALE, MEAN, NUMBER_OF_PATIENTS, RATERS,
    REQUIRED_COLUMNS, Rater, SCORE_NAME, STD, TIME,
};
use super::table::{FactorColumn, FactorValues, Observation, ObservationTable};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to numbers. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        found_type: String,
    },
    #[error("Line {line}: the required value '{column}' is missing.")]
    MissingValue { column: String, line: usize },
    #[error("Line {line}: '{column}' must be a positive whole number, found {value}.")]
    InvalidPatientCount {
        column: String,
        line: usize,
        value: f64,
    },
    #[error(
        "{rater} ratings have {pre} 'pre' lines but {post} 'post' lines; every 'pre' line needs a matching 'post' line."
    )]
    UnpairedRows {
        rater: Rater,
        pre: usize,
        post: usize,
    },
    #[error(
        "The 'pre' line {pre_line} ({pre_study}, {pre_scale}) is paired with the 'post' line {post_line} ({post_study}, {post_scale}); pairs must share study and scale."
    )]
    MismatchedPair {
        pre_line: usize,
        post_line: usize,
        pre_study: String,
        post_study: String,
        pre_scale: String,
        post_scale: String,
    },
    #[error("Factor '{factor}' has {found} values but the table has {expected} observations.")]
    FactorLengthMismatch {
        factor: String,
        found: usize,
        expected: usize,
    },
    #[error("Factor '{0}' appears more than once.")]
    DuplicateFactor(String),
}

/// Loads the observations rated by `rater`. The table is empty if the file has no
/// lines for that rater.
pub fn load_observations(
    path: &Path,
    factors: &[FactorSpec],
    rater: Rater,
) -> Result<ObservationTable, DataError> {
    let df = internal::read_frame(path)?;
    internal::extract_rater(&df, factors, rater)
}

/// Loads one table per rater present in the file, parents first.
pub fn load_all_raters(
    path: &Path,
    factors: &[FactorSpec],
) -> Result<Vec<ObservationTable>, DataError> {
    let df = internal::read_frame(path)?;
    let mut tables = Vec::with_capacity(Rater::ALL.len());
    for rater in Rater::ALL {
        let table = internal::extract_rater(&df, factors, rater)?;
        if table.is_empty() {
            log::info!("No {rater} ratings in '{}'; skipping.", path.display());
            continue;
        }
        tables.push(table);
    }
    Ok(tables)
}

mod internal {
    use super::*;

    /// Line number of a data row in the source file; the header is line 1.
    fn line_of(row: usize) -> usize {
        row + 2
    }

    pub(super) fn read_frame(path: &Path) -> Result<DataFrame, DataError> {
        log::info!("Loading data from '{}'", path.display());
        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(None),
            )
            .finish()?;

        let present: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        for required in REQUIRED_COLUMNS {
            if !present.iter().any(|name| name == required) {
                return Err(DataError::ColumnNotFound(required.to_string()));
            }
        }
        log::debug!("Read {} lines and {} columns.", df.height(), df.width());
        Ok(df)
    }

    fn series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series, DataError> {
        let column = df
            .column(name)
            .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
        Ok(column.as_materialized_series())
    }

    /// Reads a column as trimmed text. Empty cells count as missing.
    pub(super) fn text_column(
        df: &DataFrame,
        name: &str,
    ) -> Result<Vec<Option<String>>, DataError> {
        let casted = series(df, name)?.cast(&DataType::String)?;
        let values = casted
            .str()?
            .into_iter()
            .map(|value| {
                value
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty())
            })
            .collect();
        Ok(values)
    }

    /// Reads a column as floats. A cell that is present but not a number is an error.
    pub(super) fn numeric_column(
        df: &DataFrame,
        name: &str,
    ) -> Result<Vec<Option<f64>>, DataError> {
        let original = series(df, name)?;
        let wrong_type = || DataError::ColumnWrongType {
            column_name: name.to_string(),
            found_type: format!("{:?}", original.dtype()),
        };
        let casted = original.cast(&DataType::Float64).map_err(|_| wrong_type())?;
        if casted.null_count() > original.null_count() {
            return Err(wrong_type());
        }
        let values = casted.f64()?.into_iter().collect();
        Ok(values)
    }

    fn required(
        values: &[Option<f64>],
        row: usize,
        column: &str,
    ) -> Result<f64, DataError> {
        values[row]
            .filter(|v| v.is_finite())
            .ok_or_else(|| DataError::MissingValue {
                column: column.to_string(),
                line: line_of(row),
            })
    }

    fn required_text(
        values: &[Option<String>],
        row: usize,
        column: &str,
    ) -> Result<String, DataError> {
        values[row].clone().ok_or_else(|| DataError::MissingValue {
            column: column.to_string(),
            line: line_of(row),
        })
    }

    fn patient_count(values: &[Option<f64>], row: usize) -> Result<u32, DataError> {
        let value = required(values, row, NUMBER_OF_PATIENTS)?;
        if value < 1.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
            return Err(DataError::InvalidPatientCount {
                column: NUMBER_OF_PATIENTS.to_string(),
                line: line_of(row),
                value,
            });
        }
        Ok(value as u32)
    }

    pub(super) fn extract_rater(
        df: &DataFrame,
        factors: &[FactorSpec],
        rater: Rater,
    ) -> Result<ObservationTable, DataError> {
        let raters = text_column(df, RATERS)?;
        let times = text_column(df, TIME)?;

        let rows_at = |time: &str| -> Vec<usize> {
            (0..df.height())
                .filter(|&i| {
                    let matches = |cell: &Option<String>, want: &str| {
                        cell.as_deref().is_some_and(|v| v.eq_ignore_ascii_case(want))
                    };
                    matches(&raters[i], rater.label()) && matches(&times[i], time)
                })
                .collect()
        };
        let pre_rows = rows_at("pre");
        let post_rows = rows_at("post");
        if pre_rows.len() != post_rows.len() {
            return Err(DataError::UnpairedRows {
                rater,
                pre: pre_rows.len(),
                post: post_rows.len(),
            });
        }

        let authors = text_column(df, AUTHOR)?;
        let scales = text_column(df, SCORE_NAME)?;
        let patients = numeric_column(df, NUMBER_OF_PATIENTS)?;
        let means = numeric_column(df, MEAN)?;
        let stds = numeric_column(df, STD)?;
        let maxima = numeric_column(df, MAXIMUM_ON_SCALE)?;

        let mut observations = Vec::with_capacity(pre_rows.len());
        for (&pre, &post) in pre_rows.iter().zip(&post_rows) {
            let study = required_text(&authors, pre, AUTHOR)?;
            let score_name = required_text(&scales, pre, SCORE_NAME)?;
            let post_study = required_text(&authors, post, AUTHOR)?;
            let post_scale = required_text(&scales, post, SCORE_NAME)?;
            if study != post_study || score_name != post_scale {
                return Err(DataError::MismatchedPair {
                    pre_line: line_of(pre),
                    post_line: line_of(post),
                    pre_study: study,
                    post_study,
                    pre_scale: score_name,
                    post_scale,
                });
            }

            observations.push(Observation {
                study,
                score_name,
                rater,
                n_treatment: patient_count(&patients, pre)?,
                mean_pre: required(&means, pre, MEAN)?,
                mean_post: required(&means, post, MEAN)?,
                std_pre: required(&stds, pre, STD)?,
                std_post: required(&stds, post, STD)?,
                max_scale: required(&maxima, pre, MAXIMUM_ON_SCALE)?,
                source_line: line_of(pre),
            });
        }

        let mut columns = Vec::with_capacity(factors.len());
        for spec in factors {
            let values = match spec.kind {
                FactorKind::Numeric => {
                    let all = numeric_column(df, &spec.column)?;
                    FactorValues::Numeric(pre_rows.iter().map(|&i| all[i]).collect())
                }
                FactorKind::Categorical => {
                    let all = text_column(df, &spec.column)?;
                    FactorValues::Categorical(pre_rows.iter().map(|&i| all[i].clone()).collect())
                }
            };
            columns.push(FactorColumn {
                name: spec.name.clone(),
                values,
            });
        }

        log::info!(
            "Extracted {} {} observations with {} factors.",
            observations.len(),
            rater,
            columns.len()
        );
        ObservationTable::new(observations, columns)
    }
}
