//! Column layout of the trial spreadsheet and the factor schema.
//!
//! The leading columns of the spreadsheet are fixed. Everything that is analysed as a
//! factor is described by a `FactorSpec`, so no part of the analysis core needs to know
//! the concrete factor names of a given dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const AUTHOR: &str = "Author";
pub const YEAR: &str = "Year";
pub const SCORE_NAME: &str = "Score Name";
pub const NUMBER_OF_PATIENTS: &str = "Number of patients";
pub const RATERS: &str = "Raters";
pub const TIME: &str = "Time";
pub const MEAN: &str = "Mean";
pub const STD: &str = "Std";
pub const MAXIMUM_ON_SCALE: &str = "Maximum on clinical scale";

/// Columns every input file must carry, in their canonical order.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    AUTHOR,
    YEAR,
    SCORE_NAME,
    NUMBER_OF_PATIENTS,
    RATERS,
    TIME,
    MEAN,
    STD,
    MAXIMUM_ON_SCALE,
];

/// Name of the derived factor holding `mean_pre / max_scale`.
pub const SEVERITY_AT_BASELINE: &str = "severity_at_baseline";

/// Identifier and outcome names. A factor may never be named after one of these.
pub const RESERVED_NAMES: [&str; 10] = [
    "study",
    "score_name",
    "raters",
    "n_treatment",
    "mean_pre_test_treatment",
    "mean_post_test_treatment",
    "std_pre_test_treatment",
    "std_post_test_treatment",
    "maximum_on_clinical_scale",
    "effect_size_treatment",
];

/// Person who rated the symptoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rater {
    Parents,
    Teachers,
}

impl Rater {
    pub const ALL: [Rater; 2] = [Rater::Parents, Rater::Teachers];

    /// The value used in the `Raters` column.
    pub fn label(self) -> &'static str {
        match self {
            Rater::Parents => "Parents",
            Rater::Teachers => "Teachers",
        }
    }
}

impl FromStr for Rater {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rater::ALL
            .into_iter()
            .find(|rater| rater.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown rater '{s}', expected Parents or Teachers"))
    }
}

impl fmt::Display for Rater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorKind {
    Numeric,
    Categorical,
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorKind::Numeric => f.write_str("numeric"),
            FactorKind::Categorical => f.write_str("categorical"),
        }
    }
}

/// One factor column: where to read it and how to treat it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSpec {
    /// Header of the column in the input file.
    pub column: String,
    /// Name the factor carries through the analysis and in reports.
    pub name: String,
    pub kind: FactorKind,
}

impl FactorSpec {
    pub fn new(column: &str, name: &str, kind: FactorKind) -> Self {
        Self {
            column: column.to_string(),
            name: name.to_string(),
            kind,
        }
    }
}

/// Factors of the neurofeedback trial spreadsheet the tool was first written for.
pub fn neurofeedback_factors() -> Vec<FactorSpec> {
    use FactorKind::{Categorical, Numeric};
    [
        ("Probably Blind", "pblind", Categorical),
        ("Number of sessions", "number_of_sessions", Numeric),
        ("SMR", "SMR", Categorical),
        ("Theta up", "theta_up", Categorical),
        ("Beta up central", "beta_up_central", Categorical),
        ("Theta down", "theta_down", Categorical),
        ("Beta up frontal", "beta_up_frontal", Categorical),
        ("SCP", "SCP", Categorical),
        ("On drugs during treatment assessments", "on_drugs", Categorical),
        ("Age min", "age_min", Numeric),
        ("Age max", "age_max", Numeric),
        ("Randomization", "randomization", Categorical),
        ("Institutional Review Board", "IRB", Categorical),
        ("Transfer phase", "transfer_phase", Categorical),
        ("Transfer card", "transfer_card", Categorical),
        (
            "EOG correction or rejection",
            "EOG_correction_or_rejection",
            Categorical,
        ),
        (
            "Amplitude based artifact rejection",
            "amplitude_based_artifact_rejection",
            Categorical,
        ),
        ("Thresholding", "thresholding", Categorical),
        ("Session pace (per week)", "session_pace", Numeric),
        ("Session length (min)", "session_length", Numeric),
        ("Treatment length (weeks)", "treatment_length", Numeric),
        (
            ">1 active electrode",
            "more_than_one_active_electrode",
            Categorical,
        ),
        ("EEG quality", "EEG_quality", Numeric),
        ("Control group", "control_group", Categorical),
        ("Indivualisation (iAPF)", "individualisation_iapf", Categorical),
        ("EMG biofeedback", "EMG_biofeedback", Categorical),
        (
            "Engagement with treatment",
            "engagement_with_treatment",
            Categorical,
        ),
    ]
    .into_iter()
    .map(|(column, name, kind)| FactorSpec::new(column, name, kind))
    .collect()
}
