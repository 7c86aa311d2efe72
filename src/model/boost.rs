//! Gradient-boosted regression trees (squared loss)
//!
//! Two tree growers share one boosting loop:
//!
//! - [`TreeKind::Depthwise`]: each node picks its own best split
//!   (XGBoost-style exact greedy search).
//! - [`TreeKind::Oblivious`]: every node on a level shares one split,
//!   giving a symmetric tree with `2^depth` leaves (CatBoost-style).
//!
//! With squared loss the gradient of a row is `pred - y` and the hessian
//! is `1`, so a leaf weight is `-G / (H + λ)` and a split gain is
//!
//! ```text
//! ½ [ G_L²/(H_L+λ) + G_R²/(H_R+λ) − G²/(H+λ) ] − γ
//! ```

use super::linalg::mean;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tree growing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    /// Per-node splits
    Depthwise,
    /// One split per level
    Oblivious,
}

/// Boosting hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostConfig {
    /// Tree growing policy
    pub kind: TreeKind,
    /// Number of boosting rounds
    pub n_estimators: usize,
    /// Shrinkage applied to each tree
    pub learning_rate: f64,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum hessian sum per child (depthwise only)
    pub min_child_weight: f64,
    /// L2 penalty on leaf weights
    pub reg_lambda: f64,
    /// Minimum gain to keep a split
    pub gamma: f64,
    /// Initial prediction; the target mean when unset
    pub base_score: Option<f64>,
}

impl BoostConfig {
    /// XGBoost regressor defaults.
    #[must_use]
    pub const fn depthwise() -> Self {
        Self {
            kind: TreeKind::Depthwise,
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            gamma: 0.0,
            base_score: None,
        }
    }

    /// CatBoost regressor defaults.
    #[must_use]
    pub const fn oblivious() -> Self {
        Self {
            kind: TreeKind::Oblivious,
            n_estimators: 1000,
            learning_rate: 0.03,
            max_depth: 6,
            min_child_weight: 0.0,
            reg_lambda: 3.0,
            gamma: 0.0,
            base_score: None,
        }
    }

    /// Range checks.
    ///
    /// # Errors
    ///
    /// Returns `Config` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(Error::Config("number of trees must be at least 1".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.max_depth == 0 || self.max_depth > 16 {
            return Err(Error::Config(format!(
                "depth must be in 1..=16, got {}",
                self.max_depth
            )));
        }
        if self.reg_lambda < 0.0 || self.gamma < 0.0 || self.min_child_weight < 0.0 {
            return Err(Error::Config(
                "reg_lambda, gamma and min_child_weight must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Tree {
    Depthwise(Vec<Node>),
    Oblivious {
        splits: Vec<(usize, f64)>,
        leaves: Vec<f64>,
    },
}

impl Tree {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            Self::Depthwise(nodes) => {
                let mut idx = 0;
                loop {
                    match &nodes[idx] {
                        Node::Leaf(value) => return *value,
                        Node::Split {
                            feature,
                            threshold,
                            left,
                            right,
                        } => {
                            idx = if row[*feature] < *threshold { *left } else { *right };
                        }
                    }
                }
            }
            Self::Oblivious { splits, leaves } => leaves[leaf_index(splits, row)],
        }
    }
}

fn leaf_index(splits: &[(usize, f64)], row: &[f64]) -> usize {
    splits.iter().fold(0, |acc, &(feature, threshold)| {
        (acc << 1) | usize::from(row[feature] >= threshold)
    })
}

/// A fitted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    config: BoostConfig,
    base_score: f64,
    n_features: usize,
    trees: Vec<Tree>,
}

impl BoostedTrees {
    /// Fit on row-major features `x` and targets `y`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid hyperparameters, `InsufficientData` for
    /// an empty training set, and `InvalidInput` for ragged or non-finite
    /// data.
    pub fn fit(config: BoostConfig, x: &[Vec<f64>], y: &[f64]) -> Result<Self> {
        config.validate()?;
        if x.is_empty() {
            return Err(Error::InsufficientData {
                required: 1,
                actual: 0,
            });
        }
        if x.len() != y.len() {
            return Err(Error::InvalidInput(format!(
                "{} feature rows for {} targets",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if n_features == 0 || x.iter().any(|row| row.len() != n_features) {
            return Err(Error::InvalidInput(
                "feature rows must share a non-zero width".into(),
            ));
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput("training data contains non-finite values".into()));
        }

        let base_score = config.base_score.unwrap_or_else(|| mean(y));
        let mut pred = vec![base_score; y.len()];
        let mut trees = Vec::with_capacity(config.n_estimators);
        let grower = Grower {
            config: &config,
            x,
            candidates: candidate_thresholds(x, n_features),
        };

        for _ in 0..config.n_estimators {
            let grad: Vec<f64> = pred.iter().zip(y).map(|(p, t)| p - t).collect();
            let tree = match config.kind {
                TreeKind::Depthwise => grower.depthwise(&grad),
                TreeKind::Oblivious => grower.oblivious(&grad),
            };
            for (p, row) in pred.iter_mut().zip(x) {
                *p += tree.predict(row);
            }
            trees.push(tree);
        }

        debug!(
            kind = ?config.kind,
            trees = trees.len(),
            base_score,
            "boosted trees fitted"
        );
        Ok(Self {
            config,
            base_score,
            n_features,
            trees,
        })
    }

    /// Predict one value per feature row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a row has the wrong width.
    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        x.iter()
            .map(|row| {
                if row.len() != self.n_features {
                    return Err(Error::InvalidInput(format!(
                        "expected {} features, got {}",
                        self.n_features,
                        row.len()
                    )));
                }
                Ok(self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>())
            })
            .collect()
    }

    /// Hyperparameters used for the fit.
    #[must_use]
    pub const fn config(&self) -> &BoostConfig {
        &self.config
    }

    /// Number of trees in the ensemble.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

/// Midpoints between consecutive distinct values, per feature.
fn candidate_thresholds(x: &[Vec<f64>], n_features: usize) -> Vec<Vec<f64>> {
    (0..n_features)
        .map(|f| {
            let mut values: Vec<f64> = x.iter().map(|row| row[f]).collect();
            values.sort_by(f64::total_cmp);
            values.dedup();
            values.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
        })
        .collect()
}

struct Grower<'a> {
    config: &'a BoostConfig,
    x: &'a [Vec<f64>],
    candidates: Vec<Vec<f64>>,
}

impl Grower<'_> {
    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.config.reg_lambda)
    }

    fn leaf(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.config.reg_lambda;
        if denom > 0.0 {
            -g / denom * self.config.learning_rate
        } else {
            0.0
        }
    }

    fn depthwise(&self, grad: &[f64]) -> Tree {
        let mut nodes = Vec::new();
        let rows: Vec<usize> = (0..grad.len()).collect();
        self.grow_node(&mut nodes, grad, rows, 0);
        Tree::Depthwise(nodes)
    }

    #[allow(clippy::cast_precision_loss)]
    fn grow_node(&self, nodes: &mut Vec<Node>, grad: &[f64], rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&i| grad[i]).sum();
        let h = rows.len() as f64;
        let idx = nodes.len();
        nodes.push(Node::Leaf(self.leaf(g, h)));

        if depth >= self.config.max_depth || h < 2.0 * self.config.min_child_weight.max(0.5) {
            return idx;
        }

        let parent = self.score(g, h);
        let mut best: Option<(f64, usize, f64)> = None;
        for (feature, thresholds) in self.candidates.iter().enumerate() {
            let mut sorted = rows.clone();
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));
            let mut cursor = 0;
            let (mut gl, mut hl) = (0.0, 0.0);
            for &threshold in thresholds {
                while cursor < sorted.len() && self.x[sorted[cursor]][feature] < threshold {
                    gl += grad[sorted[cursor]];
                    hl += 1.0;
                    cursor += 1;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.config.min_child_weight.max(1.0)
                    || hr < self.config.min_child_weight.max(1.0)
                {
                    continue;
                }
                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent)
                    - self.config.gamma;
                if gain > 0.0 && best.map_or(true, |(b, _, _)| gain > b) {
                    best = Some((gain, feature, threshold));
                }
            }
        }

        let Some((_, feature, threshold)) = best else {
            return idx;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&i| self.x[i][feature] < threshold);
        let left = self.grow_node(nodes, grad, left_rows, depth + 1);
        let right = self.grow_node(nodes, grad, right_rows, depth + 1);
        nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn oblivious(&self, grad: &[f64]) -> Tree {
        let mut splits: Vec<(usize, f64)> = Vec::new();
        let mut assignment = vec![0_usize; grad.len()];

        for _ in 0..self.config.max_depth {
            let n_parts = 1 << splits.len();
            let mut parent_g = vec![0.0; n_parts];
            let mut parent_h = vec![0.0; n_parts];
            for (&part, &g) in assignment.iter().zip(grad) {
                parent_g[part] += g;
                parent_h[part] += 1.0;
            }
            let parent: f64 = parent_g
                .iter()
                .zip(&parent_h)
                .map(|(&g, &h)| self.score(g, h))
                .sum();

            let mut best: Option<(f64, usize, f64)> = None;
            for (feature, thresholds) in self.candidates.iter().enumerate() {
                for &threshold in thresholds {
                    let mut left_g = vec![0.0; n_parts];
                    let mut left_h = vec![0.0; n_parts];
                    for (row, (&part, &g)) in assignment.iter().zip(grad).enumerate() {
                        if self.x[row][feature] < threshold {
                            left_g[part] += g;
                            left_h[part] += 1.0;
                        }
                    }
                    let children: f64 = (0..n_parts)
                        .map(|p| {
                            let (gl, hl) = (left_g[p], left_h[p]);
                            let (gr, hr) = (parent_g[p] - gl, parent_h[p] - hl);
                            self.score(gl, hl) + self.score(gr, hr)
                        })
                        .sum();
                    let gain = 0.5 * (children - parent) - self.config.gamma;
                    if gain > 1e-12 && best.map_or(true, |(b, _, _)| gain > b) {
                        best = Some((gain, feature, threshold));
                    }
                }
            }

            let Some((_, feature, threshold)) = best else {
                break;
            };
            for (row, part) in assignment.iter_mut().enumerate() {
                *part = (*part << 1) | usize::from(self.x[row][feature] >= threshold);
            }
            splits.push((feature, threshold));
        }

        let n_leaves = 1 << splits.len();
        let mut leaf_g = vec![0.0; n_leaves];
        let mut leaf_h = vec![0.0; n_leaves];
        for (&part, &g) in assignment.iter().zip(grad) {
            leaf_g[part] += g;
            leaf_h[part] += 1.0;
        }
        let leaves = leaf_g
            .iter()
            .zip(&leaf_h)
            .map(|(&g, &h)| self.leaf(g, h))
            .collect();
        Tree::Oblivious { splits, leaves }
    }
}
