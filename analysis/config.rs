//! # Analysis Configuration
//!
//! Everything a run needs besides the data: the factor schema, the outlier band width,
//! the preprocessing thresholds, the per-strategy settings and the list of strategies
//! to run. Stored as TOML; every field has a default, so a file only needs to name
//! what it changes.

use crate::ingest::schema::{RESERVED_NAMES, SEVERITY_AT_BASELINE, neurofeedback_factors};
use crate::ingest::{FactorKind, FactorSpec};
use crate::lasso::{LassoError, LassoSettings};
use crate::outliers::DEFAULT_N_STD;
use crate::preprocess::PreprocessSettings;
use crate::tree::TreeSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The configuration lists no factors; there would be nothing to model.")]
    NoFactors,
    #[error("Factor name '{0}' appears more than once in the configuration.")]
    DuplicateFactor(String),
    #[error("Column '{0}' is mapped to more than one factor.")]
    DuplicateColumn(String),
    #[error("Factor name '{0}' is reserved for identifier, outcome or derived columns.")]
    ReservedName(String),
    #[error("'{name}' must lie in (0, 1], found {value}.")]
    InvalidRatio { name: &'static str, value: f64 },
    #[error("The fill value must be finite, found {0}.")]
    InvalidFillValue(f64),
    #[error("The outlier band width must be a positive number of standard deviations, found {0}.")]
    InvalidBandWidth(f64),
    #[error("The decision tree needs min_samples_leaf >= 1.")]
    InvalidMinSamplesLeaf,
    #[error("No modeling strategy is enabled.")]
    NoStrategies,
    #[error(transparent)]
    Lasso(#[from] LassoError),
}

/// One of the five modeling strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Wls,
    Ols,
    LassoCv,
    LassoAic,
    DecisionTree,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Wls,
        Strategy::Ols,
        Strategy::LassoCv,
        Strategy::LassoAic,
        Strategy::DecisionTree,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Strategy::Wls => "wls",
            Strategy::Ols => "ols",
            Strategy::LassoCv => "lasso_cv",
            Strategy::LassoAic => "lasso_aic",
            Strategy::DecisionTree => "decision_tree",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.key() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Strategy::ALL.iter().map(|st| st.key()).collect();
                format!("unknown strategy '{s}', expected one of: {}", known.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Half-width of the outlier acceptance band, in standard deviations.
    pub outlier_n_std: f64,
    /// Add `mean_pre / max_scale` to the factors.
    pub include_baseline_severity: bool,
    pub strategies: Vec<Strategy>,
    pub preprocess: PreprocessSettings,
    pub lasso: LassoSettings,
    pub tree: TreeSettings,
    pub factors: Vec<FactorSpec>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            outlier_n_std: DEFAULT_N_STD,
            include_baseline_severity: true,
            strategies: Strategy::ALL.to_vec(),
            preprocess: PreprocessSettings::default(),
            lasso: LassoSettings::default(),
            tree: TreeSettings::default(),
            factors: neurofeedback_factors(),
        }
    }
}

impl AnalysisConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.factors.is_empty() {
            return Err(ConfigError::NoFactors);
        }
        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for spec in &self.factors {
            if RESERVED_NAMES.contains(&spec.name.as_str())
                || (self.include_baseline_severity && spec.name == SEVERITY_AT_BASELINE)
            {
                return Err(ConfigError::ReservedName(spec.name.clone()));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateFactor(spec.name.clone()));
            }
            if !columns.insert(spec.column.as_str()) {
                return Err(ConfigError::DuplicateColumn(spec.column.clone()));
            }
        }

        let ratios = [
            ("missing_ratio", self.preprocess.missing_ratio),
            ("homogeneity_ratio", self.preprocess.homogeneity_ratio),
        ];
        for (name, value) in ratios {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidRatio { name, value });
            }
        }
        if !self.preprocess.fill_value.is_finite() {
            return Err(ConfigError::InvalidFillValue(self.preprocess.fill_value));
        }
        if !(self.outlier_n_std.is_finite() && self.outlier_n_std > 0.0) {
            return Err(ConfigError::InvalidBandWidth(self.outlier_n_std));
        }
        self.lasso.validate()?;
        if self.tree.min_samples_leaf == 0 {
            return Err(ConfigError::InvalidMinSamplesLeaf);
        }
        if self.strategies.is_empty() {
            return Err(ConfigError::NoStrategies);
        }
        Ok(())
    }

    /// Factor specs handed to the preprocessor, with the derived severity column
    /// appended when enabled.
    pub fn model_factors(&self) -> Vec<FactorSpec> {
        let mut specs = self.factors.clone();
        if self.include_baseline_severity {
            specs.push(FactorSpec::new(
                SEVERITY_AT_BASELINE,
                SEVERITY_AT_BASELINE,
                FactorKind::Numeric,
            ));
        }
        specs
    }

    pub fn runs(&self, strategy: Strategy) -> bool {
        self.strategies.contains(&strategy)
    }
}
