use saob::config::{AnalysisConfig, Strategy};
use saob::ingest::{FactorKind, FactorSpec, Rater, load_all_raters, load_observations};
use saob::pipeline::{run_analysis, run_analysis_with_renderer};
use saob::render::DotRenderer;
use saob::report::{AnalysisReport, write_coefficient_tables};
use std::io::Write;
use tempfile::NamedTempFile;

const HEADER: &str = "Author,Year,Score Name,Number of patients,Raters,Time,Mean,Std,Maximum on clinical scale,Number of sessions,Randomization";

/// Twenty parent-rated and twelve teacher-rated studies whose effect size shrinks
/// linearly with the number of sessions.
fn write_trials() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for (rater, count) in [("Parents", 20), ("Teachers", 12)] {
        for i in 0..count {
            let sessions = 10 + 2 * i;
            let mean_pre = 30.0 + (i % 4) as f64;
            let noise = (((i * 37) % 11) as f64 - 5.0) * 0.05;
            let mean_post = mean_pre - 0.5 * sessions as f64 + noise;
            let randomized = if i % 2 == 0 { "Yes" } else { "No" };
            let patients = 12 + i;
            let author = format!("{rater}Study{i}");
            for (time, mean) in [("pre", mean_pre), ("post", mean_post)] {
                writeln!(
                    file,
                    "{author},2010,ADHD-RS,{patients},{rater},{time},{mean:.3},5.0,54,{sessions},{randomized}"
                )
                .unwrap();
            }
        }
    }
    file.flush().unwrap();
    file
}

fn config() -> AnalysisConfig {
    AnalysisConfig {
        factors: vec![
            FactorSpec::new("Number of sessions", "number_of_sessions", FactorKind::Numeric),
            FactorSpec::new("Randomization", "randomization", FactorKind::Categorical),
        ],
        ..AnalysisConfig::default()
    }
}

#[test]
fn spreadsheet_is_split_by_rater() {
    let file = write_trials();
    let config = config();
    let tables = load_all_raters(file.path(), &config.factors).unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].len(), 20);
    assert_eq!(tables[1].len(), 12);
    assert!(tables[1].observations().iter().all(|o| o.rater == Rater::Teachers));
}

#[test]
fn end_to_end_analysis_finds_the_session_effect() {
    let file = write_trials();
    let config = config();
    let table = load_observations(file.path(), &config.factors, Rater::Parents).unwrap();
    let report = run_analysis(&table, &config).unwrap();

    assert_eq!(report.n_observations, 20);
    assert!(report.rejected.is_empty());
    assert_eq!(
        report.factor_names,
        vec!["number_of_sessions", "severity_at_baseline", "randomization_Yes"]
    );

    let ols = report.ols.as_ref().unwrap();
    let sessions = ols.coefficient("number_of_sessions").unwrap();
    assert!(sessions.coef < 0.0);
    assert!(sessions.p_value < 1e-6);
    assert!(ols.r_squared > 0.95);

    let wls = report.wls.as_ref().unwrap();
    assert!(wls.coefficient("number_of_sessions").unwrap().coef < 0.0);

    let cv = report.lasso_cv.as_ref().unwrap();
    assert!(cv.coefficient("number_of_sessions").unwrap() < 0.0);

    let aic = report.lasso_aic.as_ref().unwrap();
    assert!(aic.coefficient("number_of_sessions").unwrap() < 0.0);

    let tree = report.decision_tree.as_ref().unwrap();
    let root = tree.tree.nodes()[0].split.unwrap();
    assert_eq!(tree.feature_names[root.feature], "number_of_sessions");
    for node in tree.tree.nodes().iter().filter(|n| n.split.is_none()) {
        assert!(node.samples >= config.tree.min_samples_leaf);
    }
}

#[test]
fn report_and_tables_land_in_the_output_directory() {
    let file = write_trials();
    let config = AnalysisConfig {
        strategies: vec![Strategy::Ols, Strategy::LassoCv, Strategy::DecisionTree],
        ..config()
    };
    let out = tempfile::tempdir().unwrap();
    let tables = load_all_raters(file.path(), &config.factors).unwrap();

    let mut report = AnalysisReport::default();
    let mut written = Vec::new();
    for table in &tables {
        let renderer = DotRenderer::new(out.path().join("tree.dot"));
        let rater_report = run_analysis_with_renderer(table, &config, Some(&renderer)).unwrap();
        written.extend(write_coefficient_tables(&rater_report, out.path()).unwrap());
        report.raters.push(rater_report);
    }
    report.save(&out.path().join("report.toml")).unwrap();

    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "parents_ols.tsv",
            "parents_lasso_cv.tsv",
            "parents_decision_tree.tsv",
            "teachers_ols.tsv",
            "teachers_lasso_cv.tsv",
            "teachers_decision_tree.tsv",
        ]
    );
    let ols = std::fs::read_to_string(out.path().join("parents_ols.tsv")).unwrap();
    assert!(ols.starts_with("factor\tcoef\tstd_err"));
    assert!(ols.lines().nth(1).unwrap().starts_with("const\t"));

    let dot = std::fs::read_to_string(out.path().join("tree.dot")).unwrap();
    assert!(dot.starts_with("digraph Tree {"));

    let toml_text = std::fs::read_to_string(out.path().join("report.toml")).unwrap();
    assert_eq!(toml_text.matches("[[raters]]").count(), 2);
}
