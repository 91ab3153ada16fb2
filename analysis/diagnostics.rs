//! Structured diagnostics returned next to each analysis result.
//!
//! Nothing in the library prints or raises process-wide warnings. Each stage returns
//! the notes it produced and the caller decides how to surface them; `emit` forwards
//! them to the `log` facade.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stage that produced the note, e.g. `outliers` or `wls`.
    pub stage: String,
    pub message: String,
}

impl Diagnostic {
    pub fn info(stage: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    pub fn warning(stage: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// Forwards diagnostics to the logger at a level matching their severity.
pub fn emit(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic.severity {
            Severity::Info => log::info!("{diagnostic}"),
            Severity::Warning => log::warn!("{diagnostic}"),
        }
    }
}

/// Format a condition number for display.
pub fn format_cond(cond: f64) -> String {
    if cond.is_finite() {
        format!("{:.2e}", cond)
    } else {
        "inf".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stage() {
        let note = Diagnostic::warning("wls", "moment matrix is rank deficient");
        assert!(note.is_warning());
        assert_eq!(note.to_string(), "[wls] moment matrix is rank deficient");
        assert!(!Diagnostic::info("ols", "ok").is_warning());
    }

    #[test]
    fn condition_numbers_format_compactly() {
        assert_eq!(format_cond(12345.0), "1.23e4");
        assert_eq!(format_cond(f64::INFINITY), "inf");
    }
}
