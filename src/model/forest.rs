//! Bagged forest of CART trees.

use ndarray::ArrayView2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, TreeSettings};
use super::ProbabilityModel;
use crate::config::ForestParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    importances: Vec<f64>,
}

impl RandomForest {
    /// Trees are fitted in parallel; tree `i` uses seed `seed + i` for both
    /// its bootstrap sample and its feature sampling.
    pub fn fit(x: ArrayView2<f64>, y: &[bool], params: &ForestParams, seed: u64) -> Self {
        let n_rows = x.nrows();
        let n_features = x.ncols();
        if n_rows == 0 || params.n_trees == 0 {
            return Self {
                trees: Vec::new(),
                importances: vec![0.0; n_features],
            };
        }

        let max_features = params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize);

        let trees: Vec<DecisionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|i| {
                let tree_seed = seed.wrapping_add(i as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(tree_seed);
                let bootstrap: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                let settings = TreeSettings {
                    max_depth: params.max_depth,
                    min_samples_split: params.min_samples_split,
                    min_samples_leaf: params.min_samples_leaf,
                    max_features: Some(max_features),
                    seed: tree_seed,
                };
                DecisionTree::fit_rows(x, y, &bootstrap, &settings)
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        for tree in &trees {
            for (total, imp) in importances.iter_mut().zip(tree.feature_importances()) {
                *total += imp;
            }
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|imp| *imp /= sum);
        }

        Self { trees, importances }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl ProbabilityModel for RandomForest {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        self.trees
            .iter()
            .map(|tree| tree.predict_probability(features))
            .sum::<f64>()
            / self.trees.len() as f64
    }

    fn feature_importances(&self) -> Vec<f64> {
        self.importances.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn dataset() -> (Array2<f64>, Vec<bool>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let attendance = 40.0 + i as f64;
            let backlogs = (i % 4) as f64;
            rows.extend_from_slice(&[attendance, backlogs, (i % 3) as f64]);
            labels.push(attendance < 65.0 || backlogs >= 3.0);
        }
        (Array2::from_shape_vec((60, 3), rows).unwrap(), labels)
    }

    fn params() -> ForestParams {
        ForestParams {
            n_trees: 25,
            ..ForestParams::default()
        }
    }

    #[test]
    fn separates_obvious_cases() {
        let (x, y) = dataset();
        let forest = RandomForest::fit(x.view(), &y, &params(), 42);

        assert_eq!(forest.n_trees(), 25);
        assert!(forest.predict_probability(&[42.0, 0.0, 0.0]) > 0.5);
        assert!(forest.predict_probability(&[95.0, 0.0, 1.0]) < 0.5);
    }

    #[test]
    fn fitting_is_deterministic_for_a_seed() {
        let (x, y) = dataset();
        let a = RandomForest::fit(x.view(), &y, &params(), 7);
        let b = RandomForest::fit(x.view(), &y, &params(), 7);
        assert_eq!(a, b);
    }

    #[test]
    fn importances_are_normalized() {
        let (x, y) = dataset();
        let forest = RandomForest::fit(x.view(), &y, &params(), 42);
        let importances = forest.feature_importances();
        assert_eq!(importances.len(), 3);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[2]);
    }

    #[test]
    fn empty_forest_is_undecided() {
        let x = Array2::<f64>::zeros((0, 2));
        let forest = RandomForest::fit(x.view(), &[], &params(), 1);
        assert_eq!(forest.predict_probability(&[1.0, 2.0]), 0.5);
    }
}
