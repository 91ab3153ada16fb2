//! # Analysis Pipeline
//!
//! Runs the stages in their fixed order for one rater's table:
//! effect sizes, outlier rejection, factor preprocessing, then every enabled modeling
//! strategy. The regression and Lasso strategies see the z-scored factors; the tree
//! sees the same columns before z-scoring.

use crate::config::{AnalysisConfig, ConfigError, Strategy};
use crate::diagnostics::Diagnostic;
use crate::effect_size::{EffectSizeError, attach_baseline_severity, compute_effect_sizes};
use crate::ingest::{DataError, ObservationTable};
use crate::lars::{LarsError, lasso_aic};
use crate::lasso::{LassoError, lasso_cv};
use crate::outliers::{FilteredObservations, OutlierError, reject_outliers};
use crate::preprocess::{PreparedFactors, PreprocessError, preprocess_factors};
use crate::regression::{
    RegressionError, ordinary_least_squares, study_weights, weighted_least_squares,
};
use crate::render::{RenderError, TreeRenderer};
use crate::report::RaterReport;
use crate::tree::{TreeError, decision_tree};
use ndarray::Array1;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Effect size computation failed: {0}")]
    EffectSize(#[from] EffectSizeError),
    #[error("Outlier rejection failed: {0}")]
    Outlier(#[from] OutlierError),
    #[error("Factor preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Regression failed: {0}")]
    Regression(#[from] RegressionError),
    #[error("Lasso with cross-validation failed: {0}")]
    Lasso(#[from] LassoError),
    #[error("Lasso with AIC selection failed: {0}")]
    Lars(#[from] LarsError),
    #[error("Decision tree failed: {0}")]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Observations and factor matrices ready for modeling, row-aligned.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub filtered: FilteredObservations,
    pub factors: PreparedFactors,
    /// Study weights of the surviving observations.
    pub weights: Array1<f64>,
    /// Notes raised while computing effect sizes, over the unfiltered table.
    pub input_diagnostics: Vec<Diagnostic>,
}

impl PreparedData {
    pub fn effect_size(&self) -> &Array1<f64> {
        &self.filtered.effect_size
    }
}

/// Effect sizes, outlier rejection and preprocessing.
pub fn prepare(
    table: &ObservationTable,
    config: &AnalysisConfig,
) -> Result<PreparedData, AnalysisError> {
    // --- Effect sizes ---
    let sizes = compute_effect_sizes(table)?;
    let mut table = table.clone();
    if config.include_baseline_severity {
        attach_baseline_severity(&mut table, &sizes)?;
    }

    // --- Outliers ---
    let filtered = reject_outliers(&table, &sizes.effect_size, config.outlier_n_std)?;

    // --- Factors ---
    let factors = preprocess_factors(&filtered.table, &config.model_factors(), &config.preprocess)?;
    let weights = study_weights(&filtered.table);
    log::info!(
        "Prepared {} observations with {} factor columns ({} factors dropped).",
        factors.standardized.nrows(),
        factors.standardized.ncols(),
        factors.dropped.len()
    );

    Ok(PreparedData {
        filtered,
        factors,
        weights,
        input_diagnostics: sizes.diagnostics,
    })
}

pub fn run_analysis(
    table: &ObservationTable,
    config: &AnalysisConfig,
) -> Result<RaterReport, AnalysisError> {
    run_analysis_with_renderer(table, config, None)
}

/// Same as `run_analysis`; a fitted tree is also handed to `renderer`.
pub fn run_analysis_with_renderer(
    table: &ObservationTable,
    config: &AnalysisConfig,
    renderer: Option<&dyn TreeRenderer>,
) -> Result<RaterReport, AnalysisError> {
    config.validate()?;
    let rater = table.observations().first().map(|obs| obs.rater);
    if let Some(rater) = rater {
        log::info!("Analysing {} {rater} observations.", table.len());
    }

    let prepared = prepare(table, config)?;
    let x = &prepared.factors.standardized;
    let y = prepared.effect_size();

    let mut report = RaterReport {
        rater,
        n_observations: table.len(),
        n_modeled: y.len(),
        factor_names: x.names.clone(),
        band: prepared.filtered.band.clone(),
        wls: None,
        ols: None,
        lasso_cv: None,
        lasso_aic: None,
        decision_tree: None,
        rejected: prepared.filtered.rejected.clone(),
        dropped: prepared.factors.dropped.clone(),
        diagnostics: prepared.input_diagnostics.clone(),
    };
    report.diagnostics.extend(prepared.filtered.diagnostics.iter().cloned());
    report.diagnostics.extend(prepared.factors.diagnostics.iter().cloned());

    if config.runs(Strategy::Wls) {
        log::info!("Fitting weighted least squares.");
        report.wls = Some(weighted_least_squares(x, y, &prepared.weights)?);
    }
    if config.runs(Strategy::Ols) {
        log::info!("Fitting ordinary least squares.");
        report.ols = Some(ordinary_least_squares(x, y)?);
    }
    if config.runs(Strategy::LassoCv) {
        log::info!("Fitting Lasso with leave-one-out cross-validation.");
        report.lasso_cv = Some(lasso_cv(x, y, &config.lasso)?);
    }
    if config.runs(Strategy::LassoAic) {
        log::info!("Fitting Lasso with AIC selection.");
        report.lasso_aic = Some(lasso_aic(x, y)?);
    }
    if config.runs(Strategy::DecisionTree) {
        log::info!("Fitting decision tree.");
        let result = decision_tree(&prepared.factors.raw, y, &config.tree)?;
        if let Some(renderer) = renderer {
            renderer.render(&result.tree, &result.feature_names)?;
        }
        report.decision_tree = Some(result);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FactorColumn, FactorKind, FactorSpec, FactorValues, Observation, Rater};
    use std::cell::RefCell;

    fn table(n: usize) -> ObservationTable {
        let observations = (0..n)
            .map(|i| Observation {
                study: format!("study{}", i / 2),
                score_name: format!("scale{}", i % 2),
                rater: Rater::Parents,
                n_treatment: 10 + i as u32,
                mean_pre: 30.0 + (i % 5) as f64,
                mean_post: 30.0 - (i % 7) as f64,
                std_pre: 5.0,
                std_post: 6.0,
                max_scale: 60.0,
                source_line: 2 + 2 * i,
            })
            .collect();
        let sessions = FactorColumn {
            name: "sessions".to_string(),
            values: FactorValues::Numeric((0..n).map(|i| Some((i % 7) as f64)).collect()),
        };
        ObservationTable::new(observations, vec![sessions]).unwrap()
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            factors: vec![FactorSpec::new("Sessions", "sessions", FactorKind::Numeric)],
            ..AnalysisConfig::default()
        }
    }

    struct Recording {
        seen: RefCell<Vec<String>>,
    }

    impl TreeRenderer for Recording {
        fn render(
            &self,
            tree: &crate::tree::RegressionTree,
            feature_names: &[String],
        ) -> Result<(), RenderError> {
            assert_eq!(tree.n_features(), feature_names.len());
            self.seen.borrow_mut().extend(feature_names.iter().cloned());
            Ok(())
        }
    }

    #[test]
    fn every_enabled_strategy_reports() {
        let report = run_analysis(&table(24), &config()).unwrap();
        assert_eq!(report.rater, Some(Rater::Parents));
        assert_eq!(report.n_observations, 24);
        assert_eq!(report.factor_names, vec!["sessions", "severity_at_baseline"]);
        assert!(report.wls.is_some());
        assert!(report.ols.is_some());
        assert!(report.lasso_cv.is_some());
        assert!(report.lasso_aic.is_some());
        assert!(report.decision_tree.is_some());
    }

    #[test]
    fn disabled_strategies_are_skipped_and_renderer_sees_raw_names() {
        let config = AnalysisConfig {
            strategies: vec![Strategy::DecisionTree],
            include_baseline_severity: false,
            ..config()
        };
        let recorder = Recording {
            seen: RefCell::new(Vec::new()),
        };
        let report = run_analysis_with_renderer(&table(24), &config, Some(&recorder)).unwrap();
        assert!(report.wls.is_none());
        assert!(report.lasso_cv.is_none());
        assert!(report.decision_tree.is_some());
        assert_eq!(*recorder.seen.borrow(), vec!["sessions".to_string()]);
    }

    #[test]
    fn effect_size_stage_errors_abort_the_run() {
        let mut observations = table(4).observations().to_vec();
        observations[2].std_pre = 0.0;
        observations[2].std_post = 0.0;
        let broken = ObservationTable::new(observations, Vec::new()).unwrap();
        let config = AnalysisConfig {
            include_baseline_severity: true,
            ..config()
        };
        assert!(matches!(
            run_analysis(&broken, &config),
            Err(AnalysisError::EffectSize(EffectSizeError::ZeroPooledVariance { index: 2, .. }))
        ));
    }

    #[test]
    fn out_of_scale_means_reach_the_report_as_warnings() {
        let mut observations = table(24).observations().to_vec();
        observations[5].mean_post = -4.0;
        let sessions = table(24).factor("sessions").unwrap().clone();
        let suspicious = ObservationTable::new(observations, vec![sessions]).unwrap();
        let report = run_analysis(&suspicious, &config()).unwrap();
        let notes: Vec<_> = report
            .diagnostics
            .iter()
            .filter(|d| d.stage == "effect_size")
            .collect();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].is_warning());
        assert!(notes[0].message.contains("(study2, line 12)"));
    }

    #[test]
    fn prepared_rows_stay_aligned_with_weights() {
        let prepared = prepare(&table(12), &config()).unwrap();
        let n = prepared.effect_size().len();
        assert_eq!(prepared.weights.len(), n);
        assert_eq!(prepared.factors.standardized.nrows(), n);
        assert_eq!(prepared.factors.raw.nrows(), n);
        // Two scales per study split the patient count.
        assert_eq!(prepared.weights[0], 5.0);
    }
}
