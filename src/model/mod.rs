//! Classifiers and the fitted-model record the ensemble holds.
//!
//! Every classifier answers one question: the probability that a feature
//! vector belongs to the high-risk class. [`Classifier`] is the closed set
//! of implementations so a whole model set can be persisted and reloaded.

mod forest;
mod logistic;
mod tree;
mod voting;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use forest::RandomForest;
pub use logistic::{LogisticModel, StandardScaler};
pub use tree::{DecisionTree, TreeNode, TreeSettings};
pub use voting::SoftVoting;

use crate::error::{Result, RiskError};
use crate::features::FeatureVector;
use crate::metrics::PerformanceMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    LogisticRegression,
    DecisionTree,
    RandomForest,
    SoftVoting,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "logistic_regression",
            ModelKind::DecisionTree => "decision_tree",
            ModelKind::RandomForest => "random_forest",
            ModelKind::SoftVoting => "soft_voting",
        }
    }

    /// Base kinds are fitted directly on data; the rest combine base kinds.
    pub fn is_base(&self) -> bool {
        !matches!(self, ModelKind::SoftVoting)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logistic_regression" => Ok(ModelKind::LogisticRegression),
            "decision_tree" => Ok(ModelKind::DecisionTree),
            "random_forest" => Ok(ModelKind::RandomForest),
            "soft_voting" => Ok(ModelKind::SoftVoting),
            other => Err(RiskError::Config(format!("unknown model kind `{other}`"))),
        }
    }
}

pub trait ProbabilityModel {
    /// Probability of the high-risk class, in [0, 1].
    fn predict_probability(&self, features: &[f64]) -> f64;

    /// One non-negative weight per feature column, summing to 1 when any are non-zero.
    fn feature_importances(&self) -> Vec<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    LogisticRegression(LogisticModel),
    DecisionTree(DecisionTree),
    RandomForest(RandomForest),
    SoftVoting(SoftVoting),
}

impl Classifier {
    pub fn kind(&self) -> ModelKind {
        match self {
            Classifier::LogisticRegression(_) => ModelKind::LogisticRegression,
            Classifier::DecisionTree(_) => ModelKind::DecisionTree,
            Classifier::RandomForest(_) => ModelKind::RandomForest,
            Classifier::SoftVoting(_) => ModelKind::SoftVoting,
        }
    }

    fn inner(&self) -> &dyn ProbabilityModel {
        match self {
            Classifier::LogisticRegression(m) => m,
            Classifier::DecisionTree(m) => m,
            Classifier::RandomForest(m) => m,
            Classifier::SoftVoting(m) => m,
        }
    }
}

impl ProbabilityModel for Classifier {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        self.inner().predict_probability(features)
    }

    fn feature_importances(&self) -> Vec<f64> {
        self.inner().feature_importances()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// A fitted classifier with the schema it expects and its held-out scores.
///
/// Never mutated after construction; retraining builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model_id: String,
    pub feature_schema: Vec<String>,
    pub performance_metrics: PerformanceMetrics,
    pub trained_at: DateTime<Utc>,
    classifier: Classifier,
}

impl TrainedModel {
    pub fn new(
        classifier: Classifier,
        feature_schema: Vec<String>,
        performance_metrics: PerformanceMetrics,
        trained_at: DateTime<Utc>,
    ) -> Self {
        Self {
            model_id: classifier.kind().as_str().to_string(),
            feature_schema,
            performance_metrics,
            trained_at,
            classifier,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.classifier.kind()
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn predict_probability(&self, features: &FeatureVector) -> Result<f64> {
        if features.len() != self.feature_schema.len() {
            return Err(RiskError::Schema {
                field: "features",
                reason: format!(
                    "{} expects {} features, got {}",
                    self.model_id,
                    self.feature_schema.len(),
                    features.len()
                ),
            });
        }
        Ok(self
            .classifier
            .predict_probability(features.as_slice())
            .clamp(0.0, 1.0))
    }

    /// Importances paired with feature names, largest first.
    pub fn feature_importances(&self) -> Vec<FeatureImportance> {
        let mut ranked: Vec<FeatureImportance> = self
            .feature_schema
            .iter()
            .zip(self.classifier.feature_importances())
            .map(|(feature, importance)| FeatureImportance {
                feature: feature.clone(),
                importance,
            })
            .collect();
        ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn stump() -> Classifier {
        let x = Array2::from_shape_vec((4, 2), vec![0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0, 1.0]).unwrap();
        let settings = TreeSettings {
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 1,
        };
        Classifier::DecisionTree(DecisionTree::fit(x.view(), &[true, true, false, false], &settings))
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            ModelKind::LogisticRegression,
            ModelKind::DecisionTree,
            ModelKind::RandomForest,
            ModelKind::SoftVoting,
        ] {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
        }
        assert!("svm".parse::<ModelKind>().is_err());
    }

    #[test]
    fn soft_voting_averages_members() {
        let voting = SoftVoting::new(vec![stump(), stump()]);
        assert_eq!(voting.predict_probability(&[0.0, 1.0]), 1.0);
        assert_eq!(voting.predict_probability(&[3.0, 1.0]), 0.0);
        assert_eq!(voting.feature_importances(), vec![1.0, 0.0]);
    }

    #[test]
    fn trained_model_ranks_importances() {
        let model = TrainedModel::new(
            stump(),
            vec!["attendance_norm".into(), "cgpa_norm".into()],
            PerformanceMetrics::default(),
            Utc::now(),
        );
        assert_eq!(model.model_id, "decision_tree");
        let ranked = model.feature_importances();
        assert_eq!(ranked[0].feature, "attendance_norm");
        assert_eq!(ranked[0].importance, 1.0);
    }

    #[test]
    fn classifier_survives_json() {
        let classifier = stump();
        let json = serde_json::to_string(&classifier).unwrap();
        let back: Classifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, classifier);
    }
}
