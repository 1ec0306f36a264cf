//! Binary CART classifier with Gini impurity.

use ndarray::ArrayView2;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::ProbabilityModel;
use crate::config::TreeParams;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeSettings {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` considers all of them.
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl TreeSettings {
    pub fn from_params(params: &TreeParams, seed: u64) -> Self {
        Self {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
            seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        /// Fraction of high-risk rows that reached this leaf.
        probability: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    root: TreeNode,
    importances: Vec<f64>,
}

impl DecisionTree {
    pub fn fit(x: ArrayView2<f64>, y: &[bool], settings: &TreeSettings) -> Self {
        let rows: Vec<usize> = (0..x.nrows()).collect();
        Self::fit_rows(x, y, &rows, settings)
    }

    /// Fits on a subset of rows; repeated indices act as sample weights.
    pub fn fit_rows(x: ArrayView2<f64>, y: &[bool], rows: &[usize], settings: &TreeSettings) -> Self {
        let mut builder = Builder {
            x,
            y,
            settings,
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            importances: vec![0.0; x.ncols()],
        };
        let root = builder.build(rows, 0);

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|imp| *imp /= total);
        }

        Self { root, importances }
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }
}

impl ProbabilityModel for DecisionTree {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { probability, .. } => return *probability,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features.get(*feature).copied().unwrap_or(0.0);
                    node = if value <= *threshold { left } else { right };
                }
            }
        }
    }

    fn feature_importances(&self) -> Vec<f64> {
        self.importances.clone()
    }
}

struct Builder<'a, 'x> {
    x: ArrayView2<'x, f64>,
    y: &'a [bool],
    settings: &'a TreeSettings,
    rng: ChaCha8Rng,
    importances: Vec<f64>,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

impl Builder<'_, '_> {
    fn build(&mut self, rows: &[usize], depth: usize) -> TreeNode {
        let positives = rows.iter().filter(|&&r| self.y[r]).count();
        let impurity = gini(positives, rows.len());

        if depth >= self.settings.max_depth
            || rows.len() < self.settings.min_samples_split
            || impurity < 1e-12
        {
            return self.leaf(positives, rows.len());
        }

        let Some(split) = self.best_split(rows, positives, impurity) else {
            return self.leaf(positives, rows.len());
        };

        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| self.x[[r, split.feature]] <= split.threshold);
        if left.is_empty() || right.is_empty() {
            return self.leaf(positives, rows.len());
        }

        self.importances[split.feature] += split.gain * rows.len() as f64;

        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.build(&left, depth + 1)),
            right: Box::new(self.build(&right, depth + 1)),
        }
    }

    fn leaf(&self, positives: usize, samples: usize) -> TreeNode {
        let probability = if samples == 0 {
            0.5
        } else {
            positives as f64 / samples as f64
        };
        TreeNode::Leaf { probability, samples }
    }

    fn best_split(&mut self, rows: &[usize], positives: usize, impurity: f64) -> Option<Split> {
        let n = rows.len();
        let min_leaf = self.settings.min_samples_leaf.max(1);

        let mut candidates: Vec<usize> = (0..self.x.ncols()).collect();
        candidates.shuffle(&mut self.rng);
        if let Some(max_features) = self.settings.max_features {
            candidates.truncate(max_features.max(1));
        }

        let mut best: Option<Split> = None;
        let mut column: Vec<(f64, bool)> = Vec::with_capacity(n);

        for feature in candidates {
            column.clear();
            column.extend(rows.iter().map(|&r| (self.x[[r, feature]], self.y[r])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_positives = 0;
            for i in 0..n - 1 {
                if column[i].1 {
                    left_positives += 1;
                }
                if column[i].0 == column[i + 1].0 {
                    continue;
                }
                let left_n = i + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let weighted = (left_n as f64 * gini(left_positives, left_n)
                    + right_n as f64 * gini(positives - left_positives, right_n))
                    / n as f64;
                let gain = impurity - weighted;

                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Split {
                        feature,
                        threshold: (column[i].0 + column[i + 1].0) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }
}
