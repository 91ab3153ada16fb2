use super::data::DataError;
use super::schema::{FactorKind, Rater};

/// Values of one factor column, one entry per observation. `None` marks a missing cell.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorValues {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl FactorValues {
    pub fn len(&self) -> usize {
        match self {
            FactorValues::Numeric(values) => values.len(),
            FactorValues::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> FactorKind {
        match self {
            FactorValues::Numeric(_) => FactorKind::Numeric,
            FactorValues::Categorical(_) => FactorKind::Categorical,
        }
    }

    pub fn missing_count(&self) -> usize {
        match self {
            FactorValues::Numeric(values) => values.iter().filter(|v| v.is_none()).count(),
            FactorValues::Categorical(values) => values.iter().filter(|v| v.is_none()).count(),
        }
    }

    fn select(&self, rows: &[usize]) -> Self {
        match self {
            FactorValues::Numeric(values) => {
                FactorValues::Numeric(rows.iter().map(|&i| values[i]).collect())
            }
            FactorValues::Categorical(values) => {
                FactorValues::Categorical(rows.iter().map(|&i| values[i].clone()).collect())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactorColumn {
    pub name: String,
    pub values: FactorValues,
}

/// One (study, clinical scale, rater) result with its pre/post summary statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Study label. Shared by every scale a study reports.
    pub study: String,
    pub score_name: String,
    pub rater: Rater,
    pub n_treatment: u32,
    pub mean_pre: f64,
    pub mean_post: f64,
    pub std_pre: f64,
    pub std_post: f64,
    pub max_scale: f64,
    /// Line of the `pre` row in the source file, for error messages.
    pub source_line: usize,
}

/// Observations plus their factor columns, kept row-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    observations: Vec<Observation>,
    factors: Vec<FactorColumn>,
}

impl ObservationTable {
    pub fn new(
        observations: Vec<Observation>,
        factors: Vec<FactorColumn>,
    ) -> Result<Self, DataError> {
        let mut table = Self {
            observations,
            factors: Vec::with_capacity(factors.len()),
        };
        for column in factors {
            table.push_factor(column)?;
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn factors(&self) -> &[FactorColumn] {
        &self.factors
    }

    pub fn factor(&self, name: &str) -> Option<&FactorColumn> {
        self.factors.iter().find(|c| c.name == name)
    }

    /// Appends a factor column. Its length must match the number of observations.
    pub fn push_factor(&mut self, column: FactorColumn) -> Result<(), DataError> {
        if column.values.len() != self.observations.len() {
            return Err(DataError::FactorLengthMismatch {
                factor: column.name,
                found: column.values.len(),
                expected: self.observations.len(),
            });
        }
        if self.factor(&column.name).is_some() {
            return Err(DataError::DuplicateFactor(column.name));
        }
        self.factors.push(column);
        Ok(())
    }

    /// Returns a table holding only `rows`, in the given order, for observations and
    /// factors alike.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            observations: rows.iter().map(|&i| self.observations[i].clone()).collect(),
            factors: self
                .factors
                .iter()
                .map(|c| FactorColumn {
                    name: c.name.clone(),
                    values: c.values.select(rows),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(study: &str) -> Observation {
        Observation {
            study: study.to_string(),
            score_name: "ADHD-RS".to_string(),
            rater: Rater::Parents,
            n_treatment: 10,
            mean_pre: 30.0,
            mean_post: 25.0,
            std_pre: 5.0,
            std_post: 5.0,
            max_scale: 54.0,
            source_line: 2,
        }
    }

    #[test]
    fn select_rows_keeps_factors_aligned() {
        let table = ObservationTable::new(
            vec![observation("a"), observation("b"), observation("c")],
            vec![
                FactorColumn {
                    name: "sessions".to_string(),
                    values: FactorValues::Numeric(vec![Some(1.0), None, Some(3.0)]),
                },
                FactorColumn {
                    name: "blind".to_string(),
                    values: FactorValues::Categorical(vec![
                        Some("Yes".to_string()),
                        Some("No".to_string()),
                        None,
                    ]),
                },
            ],
        )
        .unwrap();

        let subset = table.select_rows(&[2, 0]);
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.observations()[0].study, "c");
        assert_eq!(
            subset.factor("sessions").unwrap().values,
            FactorValues::Numeric(vec![Some(3.0), Some(1.0)])
        );
        assert_eq!(
            subset.factor("blind").unwrap().values,
            FactorValues::Categorical(vec![None, Some("Yes".to_string())])
        );
    }

    #[test]
    fn rejects_misaligned_and_duplicate_factors() {
        let mut table = ObservationTable::new(vec![observation("a")], Vec::new()).unwrap();
        let short = FactorColumn {
            name: "x".to_string(),
            values: FactorValues::Numeric(Vec::new()),
        };
        assert!(matches!(
            table.push_factor(short),
            Err(DataError::FactorLengthMismatch { .. })
        ));

        let column = FactorColumn {
            name: "x".to_string(),
            values: FactorValues::Numeric(vec![Some(1.0)]),
        };
        table.push_factor(column.clone()).unwrap();
        assert!(matches!(
            table.push_factor(column),
            Err(DataError::DuplicateFactor(_))
        ));
        assert_eq!(table.factor("x").unwrap().values.missing_count(), 0);
    }
}
