//! Results of a run and their on-disk forms: a TOML report holding everything, and
//! one tab-separated coefficient table per strategy.

use crate::diagnostics::{Diagnostic, format_cond};
use crate::ingest::Rater;
use crate::lars::LassoAicResult;
use crate::lasso::{LassoCvResult, NamedCoefficient};
use crate::outliers::{AcceptanceBand, RejectedObservation};
use crate::preprocess::DroppedFactor;
use crate::regression::RegressionSummary;
use crate::tree::TreeResult;
use csv::WriterBuilder;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to write coefficient table: {0}")]
    CsvError(#[from] csv::Error),
}

/// Everything one rater's analysis produced.
#[derive(Debug, Clone, Serialize)]
pub struct RaterReport {
    pub rater: Option<Rater>,
    /// Observations before outlier rejection.
    pub n_observations: usize,
    /// Observations that reached the models.
    pub n_modeled: usize,
    /// Model columns after preprocessing, in design-matrix order.
    pub factor_names: Vec<String>,
    pub band: Option<AcceptanceBand>,
    pub wls: Option<RegressionSummary>,
    pub ols: Option<RegressionSummary>,
    pub lasso_cv: Option<LassoCvResult>,
    pub lasso_aic: Option<LassoAicResult>,
    pub decision_tree: Option<TreeResult>,
    pub rejected: Vec<RejectedObservation>,
    pub dropped: Vec<DroppedFactor>,
    /// Notes from effect sizes, outlier rejection and preprocessing.
    pub diagnostics: Vec<Diagnostic>,
}

impl RaterReport {
    /// Preparation notes followed by every strategy's notes.
    pub fn all_diagnostics(&self) -> Vec<&Diagnostic> {
        let mut all: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        let strategy_notes = [
            self.wls.as_ref().map(|r| &r.diagnostics),
            self.ols.as_ref().map(|r| &r.diagnostics),
            self.lasso_cv.as_ref().map(|r| &r.diagnostics),
            self.lasso_aic.as_ref().map(|r| &r.diagnostics),
            self.decision_tree.as_ref().map(|r| &r.diagnostics),
        ];
        for notes in strategy_notes.into_iter().flatten() {
            all.extend(notes.iter());
        }
        all
    }

    fn label(&self) -> String {
        self.rater
            .map(|r| r.label().to_lowercase())
            .unwrap_or_else(|| "all".to_string())
    }
}

fn write_lasso_block(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    alpha: f64,
    coefficients: &[NamedCoefficient],
) -> fmt::Result {
    writeln!(f, "{title} (alpha = {alpha:.4e})")?;
    let mut kept = 0;
    for c in coefficients.iter().filter(|c| c.coef != 0.0) {
        writeln!(f, "  {:<36} {:>10.4}", c.name, c.coef)?;
        kept += 1;
    }
    writeln!(f, "  {kept} of {} factors kept", coefficients.len())
}

impl fmt::Display for RaterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rater = self
            .rater
            .map(|r| r.to_string())
            .unwrap_or_else(|| "All raters".to_string());
        writeln!(f, "===== {rater} =====")?;
        writeln!(
            f,
            "{} observations, {} rejected as outliers, {} modeled with {} factor columns",
            self.n_observations,
            self.rejected.len(),
            self.n_modeled,
            self.factor_names.len()
        )?;
        if let Some(band) = &self.band {
            writeln!(
                f,
                "Outlier band: [{:.3}, {:.3}] (mean {:.3}, std {:.3})",
                band.lower, band.upper, band.mean, band.std
            )?;
        }
        for summary in [&self.wls, &self.ols].into_iter().flatten() {
            writeln!(f)?;
            write!(f, "{summary}")?;
            writeln!(
                f,
                "Moment matrix: rank {} of {}, condition number {}",
                summary.moment.rank,
                summary.moment.dimension,
                format_cond(summary.moment.condition_number)
            )?;
        }
        if let Some(cv) = &self.lasso_cv {
            writeln!(f)?;
            write_lasso_block(f, "Lasso, leave-one-out CV", cv.alpha, &cv.coefficients)?;
        }
        if let Some(aic) = &self.lasso_aic {
            writeln!(f)?;
            write_lasso_block(f, "Lasso, AIC", aic.alpha, &aic.coefficients)?;
        }
        if let Some(tree) = &self.decision_tree {
            writeln!(f)?;
            writeln!(
                f,
                "Decision tree: {} leaves, depth {}, R² = {:.3}",
                tree.tree.n_leaves(),
                tree.tree.depth(),
                tree.r_squared
            )?;
            let mut ranked: Vec<_> = tree.importances.iter().filter(|i| i.importance > 0.0).collect();
            ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
            for item in ranked {
                writeln!(f, "  {:<36} {:>8.3}", item.name, item.importance)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub raters: Vec<RaterReport>,
}

impl AnalysisReport {
    /// Writes the full report in TOML.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<fs::File>, ReportError> {
    Ok(WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?)
}

fn write_regression_table(path: &Path, summary: &RegressionSummary) -> Result<(), ReportError> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["factor", "coef", "std_err", "t", "p_value", "conf_low", "conf_high"])?;
    for row in &summary.coefficients {
        wtr.write_record([
            row.name.clone(),
            format!("{:.12}", row.coef),
            format!("{:.12}", row.std_err),
            format!("{:.12}", row.t_value),
            format!("{:.12}", row.p_value),
            format!("{:.12}", row.conf_low),
            format!("{:.12}", row.conf_high),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_lasso_table(
    path: &Path,
    intercept: f64,
    coefficients: &[NamedCoefficient],
) -> Result<(), ReportError> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["factor", "coef"])?;
    wtr.write_record(["intercept".to_string(), format!("{intercept:.12}")])?;
    for c in coefficients {
        wtr.write_record([c.name.clone(), format!("{:.12}", c.coef)])?;
    }
    wtr.flush()?;
    Ok(())
}

/// One TSV per strategy that ran, named `<rater>_<strategy>.tsv`. Returns the paths
/// written, in strategy order.
pub fn write_coefficient_tables(
    report: &RaterReport,
    dir: &Path,
) -> Result<Vec<PathBuf>, ReportError> {
    fs::create_dir_all(dir)?;
    let label = report.label();
    let path_for = |strategy: &str| dir.join(format!("{label}_{strategy}.tsv"));
    let mut written = Vec::new();

    for (key, summary) in [("wls", &report.wls), ("ols", &report.ols)] {
        if let Some(summary) = summary {
            let path = path_for(key);
            write_regression_table(&path, summary)?;
            written.push(path);
        }
    }
    if let Some(cv) = &report.lasso_cv {
        let path = path_for("lasso_cv");
        write_lasso_table(&path, cv.intercept, &cv.coefficients)?;
        written.push(path);
    }
    if let Some(aic) = &report.lasso_aic {
        let path = path_for("lasso_aic");
        write_lasso_table(&path, aic.intercept, &aic.coefficients)?;
        written.push(path);
    }
    if let Some(tree) = &report.decision_tree {
        let path = path_for("decision_tree");
        let mut wtr = tsv_writer(&path)?;
        wtr.write_record(["factor", "importance"])?;
        for item in &tree.importances {
            wtr.write_record([item.name.clone(), format!("{:.12}", item.importance)])?;
        }
        wtr.flush()?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn report_with_lasso() -> RaterReport {
        RaterReport {
            rater: Some(Rater::Teachers),
            n_observations: 5,
            n_modeled: 4,
            factor_names: vec!["a".into(), "b".into()],
            band: None,
            wls: None,
            ols: None,
            lasso_cv: Some(LassoCvResult {
                alpha: 0.1,
                alphas: Array1::from_vec(vec![1.0, 0.1]),
                mse_path: Array2::zeros((2, 4)),
                coefficients: vec![
                    NamedCoefficient {
                        name: "a".into(),
                        coef: 0.5,
                    },
                    NamedCoefficient {
                        name: "b".into(),
                        coef: 0.0,
                    },
                ],
                intercept: -1.0,
                diagnostics: vec![Diagnostic::info("lasso_cv", "edge")],
            }),
            lasso_aic: None,
            decision_tree: None,
            rejected: Vec::new(),
            dropped: Vec::new(),
            diagnostics: vec![Diagnostic::warning("preprocess", "filled")],
        }
    }

    #[test]
    fn tables_are_written_per_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_coefficient_tables(&report_with_lasso(), dir.path()).unwrap();
        assert_eq!(written, vec![dir.path().join("teachers_lasso_cv.tsv")]);
        let text = std::fs::read_to_string(&written[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "factor\tcoef");
        assert!(lines[1].starts_with("intercept\t-1.0"));
        assert!(lines[2].starts_with("a\t0.5"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn report_serializes_to_toml() {
        let report = AnalysisReport {
            raters: vec![report_with_lasso()],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.toml");
        report.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[[raters]]"));
        assert!(text.contains("rater = \"Teachers\""));
        assert!(text.contains("lasso_cv"));
    }

    #[test]
    fn diagnostics_are_collected_across_stages() {
        let report = report_with_lasso();
        let all = report.all_diagnostics();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].stage, "lasso_cv");
        let shown = report.to_string();
        assert!(shown.contains("Teachers"));
        assert!(shown.contains("1 of 2 factors kept"));
    }
}
