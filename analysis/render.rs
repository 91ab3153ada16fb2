//! Export of a fitted tree for external visualization.
//!
//! The analysis never draws anything itself. A `TreeRenderer` receives the tree and
//! the feature names and decides what to do with them; `DotRenderer` writes Graphviz
//! DOT text that `dot -Tpng` turns into an image.

use crate::tree::RegressionTree;
use std::fmt::{self, Write};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("The tree uses {expected} features but {found} names were supplied.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Failed to format the tree export: {0}")]
    Format(#[from] fmt::Error),
    #[error("Failed to write the tree export to '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait TreeRenderer {
    fn render(&self, tree: &RegressionTree, feature_names: &[String]) -> Result<(), RenderError>;
}

/// Writes the tree as a DOT file.
#[derive(Debug, Clone)]
pub struct DotRenderer {
    path: PathBuf,
}

impl DotRenderer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TreeRenderer for DotRenderer {
    fn render(&self, tree: &RegressionTree, feature_names: &[String]) -> Result<(), RenderError> {
        let dot = to_dot(tree, feature_names)?;
        fs::write(&self.path, dot).map_err(|source| RenderError::Io {
            path: self.path.clone(),
            source,
        })?;
        log::info!("Decision tree written to {}", self.path.display());
        Ok(())
    }
}

/// Three decimals, trailing zeros trimmed.
fn short(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded == 0.0 {
        // Avoid "-0".
        return "0.0".to_string();
    }
    format!("{rounded:?}")
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// DOT source with rounded boxes; each node shows its split rule, mse, sample count
/// and mean response. Edges out of the root carry True/False labels.
pub fn to_dot(tree: &RegressionTree, feature_names: &[String]) -> Result<String, RenderError> {
    if feature_names.len() != tree.n_features() {
        return Err(RenderError::FeatureCountMismatch {
            expected: tree.n_features(),
            found: feature_names.len(),
        });
    }

    let mut out = String::new();
    writeln!(out, "digraph Tree {{")?;
    writeln!(
        out,
        "node [shape=box, style=\"rounded\", fontname=\"helvetica\"] ;"
    )?;
    writeln!(out, "edge [fontname=\"helvetica\"] ;")?;

    for (id, node) in tree.nodes().iter().enumerate() {
        let mut label = String::new();
        if let Some(split) = node.split {
            label.push_str(&format!(
                "{} <= {}\\n",
                escape(&feature_names[split.feature]),
                short(split.threshold)
            ));
        }
        label.push_str(&format!(
            "mse = {}\\nsamples = {}\\nvalue = {}",
            short(node.impurity),
            node.samples,
            short(node.value)
        ));
        writeln!(out, "{id} [label=\"{label}\"] ;")?;

        if let Some(split) = node.split {
            if id == 0 {
                writeln!(
                    out,
                    "0 -> {} [labeldistance=2.5, labelangle=45, headlabel=\"True\"] ;",
                    split.left
                )?;
                writeln!(
                    out,
                    "0 -> {} [labeldistance=2.5, labelangle=-45, headlabel=\"False\"] ;",
                    split.right
                )?;
            } else {
                writeln!(out, "{id} -> {} ;", split.left)?;
                writeln!(out, "{id} -> {} ;", split.right)?;
            }
        }
    }
    writeln!(out, "}}")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeSettings;
    use ndarray::{Array1, Array2};

    fn two_leaf_tree() -> RegressionTree {
        let x = Array2::from_shape_fn((16, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(16, |i| if i < 8 { 0.0 } else { 1.0 });
        RegressionTree::fit(x.view(), y.view(), &TreeSettings::default()).unwrap()
    }

    #[test]
    fn dot_contains_rule_and_edges() {
        let dot = to_dot(&two_leaf_tree(), &["sessions".to_string()]).unwrap();
        assert!(dot.starts_with("digraph Tree {"));
        assert!(dot.contains("0 [label=\"sessions <= 7.5\\nmse = 0.25\\nsamples = 16\\nvalue = 0.5\"] ;"));
        assert!(dot.contains("1 [label=\"mse = 0.0\\nsamples = 8\\nvalue = 0.0\"] ;"));
        assert!(dot.contains("0 -> 1 [labeldistance=2.5, labelangle=45, headlabel=\"True\"] ;"));
        assert!(dot.contains("0 -> 2 [labeldistance=2.5, labelangle=-45, headlabel=\"False\"] ;"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn renderer_writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = DotRenderer::new(dir.path().join("tree.dot"));
        renderer
            .render(&two_leaf_tree(), &["sessions".to_string()])
            .unwrap();
        let written = std::fs::read_to_string(renderer.path()).unwrap();
        assert!(written.contains("sessions <= 7.5"));
    }

    #[test]
    fn names_must_match_the_tree() {
        assert!(matches!(
            to_dot(&two_leaf_tree(), &[]),
            Err(RenderError::FeatureCountMismatch { expected: 1, found: 0 })
        ));
    }
}
