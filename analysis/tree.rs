//! # Decision Tree
//!
//! CART regression tree grown greedily on the mean-squared-error criterion. Every
//! split leaves at least `min_samples_leaf` observations on each side; there is no
//! depth limit. Nodes live in a flat arena numbered in depth-first pre-order, the
//! order in which a renderer walks them.

use crate::diagnostics::Diagnostic;
use crate::preprocess::FactorMatrix;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("Cannot grow a tree without observations.")]
    NoObservations,
    #[error("The factor matrix has {rows} rows but the response has {response} values.")]
    LengthMismatch { rows: usize, response: usize },
    #[error("The tree was grown on {expected} features but the input has {found}.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Non-finite value in the {0}; tree input must be finite.")]
    NonFiniteInput(&'static str),
    #[error("min_samples_leaf must be at least 1.")]
    InvalidMinSamplesLeaf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSettings {
    pub min_samples_leaf: usize,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self { min_samples_leaf: 8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    /// Observations with `x[feature] <= threshold` go left.
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Mean response of the node's observations.
    pub value: f64,
    /// Mean squared error around `value`.
    pub impurity: f64,
    pub samples: usize,
    pub split: Option<Split>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
    n_features: usize,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    /// Position in the feature-sorted order where the right child starts.
    cut: usize,
    child_sse: f64,
}

struct Pending {
    indices: Vec<usize>,
    parent: Option<(usize, bool)>,
}

fn node_stats(y: ArrayView1<f64>, indices: &[usize]) -> (f64, f64) {
    let n = indices.len() as f64;
    let mean = indices.iter().map(|&i| y[i]).sum::<f64>() / n;
    let sse: f64 = indices.iter().map(|&i| (y[i] - mean).powi(2)).sum();
    (mean, sse)
}

/// Best MSE split of `indices`, or `None` when no split respects the leaf size or
/// lowers the impurity.
fn best_split(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    indices: &[usize],
    node_sse: f64,
    min_leaf: usize,
) -> Option<(Candidate, Vec<usize>)> {
    let n = indices.len();
    let mut best: Option<(Candidate, Vec<usize>)> = None;
    let mut best_sse = node_sse - 1e-12 * node_sse.max(1.0);

    for feature in 0..x.ncols() {
        let mut order = indices.to_vec();
        order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let total_sum: f64 = order.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = order.iter().map(|&i| y[i] * y[i]).sum();
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for cut in 1..n {
            let yi = y[order[cut - 1]];
            left_sum += yi;
            left_sq += yi * yi;
            if cut < min_leaf || n - cut < min_leaf {
                continue;
            }
            let lo = x[[order[cut - 1], feature]];
            let hi = x[[order[cut], feature]];
            if lo >= hi {
                continue;
            }
            let (nl, nr) = (cut as f64, (n - cut) as f64);
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let child_sse =
                (left_sq - left_sum * left_sum / nl) + (right_sq - right_sum * right_sum / nr);
            if child_sse < best_sse {
                best_sse = child_sse;
                let mut threshold = lo + (hi - lo) / 2.0;
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some((
                    Candidate {
                        feature,
                        threshold,
                        cut,
                        child_sse,
                    },
                    order.clone(),
                ));
            }
        }
    }
    best
}

impl RegressionTree {
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        settings: &TreeSettings,
    ) -> Result<Self, TreeError> {
        let n = x.nrows();
        if settings.min_samples_leaf == 0 {
            return Err(TreeError::InvalidMinSamplesLeaf);
        }
        if n == 0 {
            return Err(TreeError::NoObservations);
        }
        if y.len() != n {
            return Err(TreeError::LengthMismatch {
                rows: n,
                response: y.len(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(TreeError::NonFiniteInput("factor matrix"));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(TreeError::NonFiniteInput("response"));
        }

        let min_leaf = settings.min_samples_leaf;
        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut stack = vec![Pending {
            indices: (0..n).collect(),
            parent: None,
        }];

        while let Some(pending) = stack.pop() {
            let id = nodes.len();
            if let Some((parent, is_left)) = pending.parent {
                if let Some(split) = nodes[parent].split.as_mut() {
                    if is_left {
                        split.left = id;
                    } else {
                        split.right = id;
                    }
                }
            }

            let samples = pending.indices.len();
            let (value, sse) = node_stats(y, &pending.indices);
            let splittable = samples >= 2 * min_leaf && sse > 0.0;
            let found = if splittable {
                best_split(x, y, &pending.indices, sse, min_leaf)
            } else {
                None
            };

            let split = found.map(|(candidate, order)| {
                log::debug!(
                    "Tree node {id}: split feature {} at {:.4} ({} | {}), sse {:.4} -> {:.4}",
                    candidate.feature,
                    candidate.threshold,
                    candidate.cut,
                    samples - candidate.cut,
                    sse,
                    candidate.child_sse
                );
                // Right is pushed first so that the left subtree is numbered next.
                stack.push(Pending {
                    indices: order[candidate.cut..].to_vec(),
                    parent: Some((id, false)),
                });
                stack.push(Pending {
                    indices: order[..candidate.cut].to_vec(),
                    parent: Some((id, true)),
                });
                Split {
                    feature: candidate.feature,
                    threshold: candidate.threshold,
                    left: 0,
                    right: 0,
                }
            });

            nodes.push(TreeNode {
                value,
                impurity: sse / samples as f64,
                samples,
                split,
            });
        }

        Ok(Self {
            nodes,
            n_features: x.ncols(),
        })
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|node| node.split.is_none()).count()
    }

    /// Edges on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut depth = vec![0usize; self.nodes.len()];
        let mut max_depth = 0;
        // Pre-order numbering puts every parent before its children.
        for (id, node) in self.nodes.iter().enumerate() {
            if let Some(split) = node.split {
                depth[split.left] = depth[id] + 1;
                depth[split.right] = depth[id] + 1;
                max_depth = max_depth.max(depth[id] + 1);
            }
        }
        max_depth
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        while let Some(split) = self.nodes[id].split {
            id = if row[split.feature] <= split.threshold {
                split.left
            } else {
                split.right
            };
        }
        self.nodes[id].value
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, TreeError> {
        if x.ncols() != self.n_features {
            return Err(TreeError::FeatureCountMismatch {
                expected: self.n_features,
                found: x.ncols(),
            });
        }
        Ok(x.outer_iter().map(|row| self.predict_row(row)).collect())
    }

    /// Total impurity decrease contributed by each feature, normalized to sum to one.
    pub fn feature_importances(&self) -> Array1<f64> {
        let mut importances = Array1::<f64>::zeros(self.n_features);
        for node in &self.nodes {
            if let Some(split) = node.split {
                let left = &self.nodes[split.left];
                let right = &self.nodes[split.right];
                importances[split.feature] += node.samples as f64 * node.impurity
                    - left.samples as f64 * left.impurity
                    - right.samples as f64 * right.impurity;
            }
        }
        let total = importances.sum();
        if total > 0.0 {
            importances /= total;
        }
        importances
    }
}

/// Coefficient of determination; a constant response scores 1 when predicted exactly
/// and 0 otherwise.
pub fn r_squared(y: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    let n = y.len() as f64;
    let mean = y.sum() / n;
    let ss_res: f64 = y
        .iter()
        .zip(predicted.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum();
    let ss_tot: f64 = y.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeResult {
    pub tree: RegressionTree,
    pub feature_names: Vec<String>,
    /// In-sample coefficient of determination.
    pub r_squared: f64,
    pub importances: Vec<FeatureImportance>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn decision_tree(
    x: &FactorMatrix,
    y: &Array1<f64>,
    settings: &TreeSettings,
) -> Result<TreeResult, TreeError> {
    let tree = RegressionTree::fit(x.values.view(), y.view(), settings)?;
    let predicted = tree.predict(x.values.view())?;
    let r_squared = r_squared(y.view(), predicted.view());

    let mut diagnostics = Vec::new();
    if tree.n_leaves() == 1 {
        diagnostics.push(Diagnostic::info(
            "decision_tree",
            format!(
                "No split leaves {} observations on both sides of {} samples; the tree is a single leaf.",
                settings.min_samples_leaf,
                y.len()
            ),
        ));
    }
    log::info!(
        "Decision tree: {} leaves, depth {}, in-sample R² {:.3}",
        tree.n_leaves(),
        tree.depth(),
        r_squared
    );

    let importances = x
        .names
        .iter()
        .zip(tree.feature_importances())
        .map(|(name, importance)| FeatureImportance {
            name: name.clone(),
            importance,
        })
        .collect();

    Ok(TreeResult {
        tree,
        feature_names: x.names.clone(),
        r_squared,
        importances,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn step_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y = x.column(0).mapv(|v| if v < (n / 2) as f64 { -1.0 } else { 2.0 });
        (x, y)
    }

    #[test]
    fn recovers_a_step_function() {
        let (x, y) = step_data(20);
        let tree = RegressionTree::fit(x.view(), y.view(), &TreeSettings::default()).unwrap();
        let root = &tree.nodes()[0];
        let split = root.split.unwrap();
        assert_eq!(split.feature, 0);
        assert_abs_diff_eq!(split.threshold, 9.5, epsilon = 1e-12);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.depth(), 1);
        let predicted = tree.predict(x.view()).unwrap();
        assert_abs_diff_eq!(r_squared(y.view(), predicted.view()), 1.0, epsilon = 1e-12);
        assert_eq!(tree.feature_importances().to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn every_leaf_respects_the_minimum_size() {
        let mut rng = StdRng::seed_from_u64(17);
        let n = 90;
        let x = Array2::from_shape_fn((n, 3), |_| rng.gen_range(-2.0..2.0));
        let y = x.map_axis(ndarray::Axis(1), |row| row[0] * row[0] - row[1]);
        let settings = TreeSettings::default();
        let tree = RegressionTree::fit(x.view(), y.view(), &settings).unwrap();
        assert!(tree.n_leaves() > 2);
        for node in tree.nodes() {
            assert!(node.samples >= settings.min_samples_leaf);
            if let Some(split) = node.split {
                let children = tree.nodes()[split.left].samples + tree.nodes()[split.right].samples;
                assert_eq!(children, node.samples);
                assert!(split.left > 0 && split.right > split.left);
            }
        }
        let leaf_total: usize = tree
            .nodes()
            .iter()
            .filter(|node| node.split.is_none())
            .map(|node| node.samples)
            .sum();
        assert_eq!(leaf_total, n);
        let importances = tree.feature_importances();
        assert_abs_diff_eq!(importances.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn small_samples_stay_a_single_leaf() {
        let x = FactorMatrix {
            names: vec!["a".into()],
            values: array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0], [9.0], [10.0]],
        };
        let y = array![1.0, 1.0, 1.0, 1.0, 1.0, 5.0, 5.0, 5.0, 5.0, 5.0];
        let result = decision_tree(&x, &y, &TreeSettings::default()).unwrap();
        assert_eq!(result.tree.n_leaves(), 1);
        assert_abs_diff_eq!(result.r_squared, 0.0, epsilon = 1e-12);
        assert_eq!(result.diagnostics.len(), 1);

        let loose = decision_tree(&x, &y, &TreeSettings { min_samples_leaf: 1 }).unwrap();
        assert_abs_diff_eq!(loose.r_squared, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(loose.importances[0].importance, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_response_scores_perfectly() {
        let (x, _) = step_data(20);
        let y = Array1::from_elem(20, 3.0);
        let tree = RegressionTree::fit(x.view(), y.view(), &TreeSettings::default()).unwrap();
        assert_eq!(tree.n_leaves(), 1);
        let predicted = tree.predict(x.view()).unwrap();
        assert_eq!(r_squared(y.view(), predicted.view()), 1.0);
        assert!(matches!(
            tree.predict(Array2::<f64>::zeros((1, 3)).view()),
            Err(TreeError::FeatureCountMismatch { expected: 2, found: 3 })
        ));
    }
}
