//! Offline training: labeled history in, a complete model set out.

use chrono::Utc;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TrainingConfig;
use crate::data::{into_labeled, stratified_split, LabeledRecord, LabeledSnapshot, RowRejection};
use crate::ensemble::{ClassifierEnsemble, ModelSet};
use crate::error::{Result, RiskError};
use crate::features::FeatureExtractor;
use crate::metrics::PerformanceMetrics;
use crate::model::{
    Classifier, DecisionTree, LogisticModel, ModelKind, ProbabilityModel, RandomForest, SoftVoting,
    TrainedModel, TreeSettings,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model_id: String,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub version: u64,
    pub default_model: String,
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub models: Vec<ModelReport>,
    #[serde(default)]
    pub rejected: Vec<RowRejection>,
}

impl TrainingReport {
    pub fn new(set: &ModelSet, rejected: Vec<RowRejection>) -> Self {
        Self {
            version: set.version,
            default_model: set.default_model.clone(),
            training_rows: set.training_rows,
            holdout_rows: set.holdout_rows,
            models: set
                .models
                .values()
                .map(|m| ModelReport {
                    model_id: m.model_id.clone(),
                    metrics: m.performance_metrics.clone(),
                })
                .collect(),
            rejected,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainingPipeline {
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Fits every configured model and scores it on the held-out partition.
    ///
    /// Nothing is installed; see [`TrainingPipeline::retrain`].
    pub fn train(&self, dataset: &[LabeledSnapshot]) -> Result<ModelSet> {
        let config = &self.config;
        if dataset.len() < config.min_samples {
            return Err(RiskError::InsufficientData {
                got: dataset.len(),
                required: config.min_samples,
            });
        }

        let labels: Vec<bool> = dataset.iter().map(|row| row.high_risk).collect();
        let high_risk = labels.iter().filter(|&&l| l).count();
        if high_risk == 0 || high_risk == labels.len() {
            return Err(RiskError::Training {
                model: "dataset".to_string(),
                reason: "labeled data holds a single class".to_string(),
            });
        }

        let (train_idx, test_idx) = stratified_split(&labels, config.test_ratio, config.seed);
        info!(
            rows = dataset.len(),
            high_risk,
            train = train_idx.len(),
            holdout = test_idx.len(),
            "training started"
        );

        let extractor = FeatureExtractor::fit(train_idx.iter().map(|&i| &dataset[i].snapshot));
        let x_train = extractor.extract_matrix(train_idx.iter().map(|&i| &dataset[i].snapshot))?;
        let x_test = extractor.extract_matrix(test_idx.iter().map(|&i| &dataset[i].snapshot))?;
        let y_train: Vec<bool> = train_idx.iter().map(|&i| labels[i]).collect();
        let y_test: Vec<bool> = test_idx.iter().map(|&i| labels[i]).collect();

        let mut kinds = config.models.clone();
        kinds.sort();
        kinds.dedup();

        let mut base = Vec::new();
        for kind in kinds.iter().filter(|k| k.is_base()) {
            base.push(self.fit_base(*kind, &x_train, &y_train)?);
        }

        let mut classifiers = base.clone();
        if kinds.contains(&ModelKind::SoftVoting) {
            if base.is_empty() {
                return Err(RiskError::Training {
                    model: ModelKind::SoftVoting.to_string(),
                    reason: "needs at least one base model".to_string(),
                });
            }
            classifiers.push(Classifier::SoftVoting(SoftVoting::new(base)));
        }

        let trained_at = Utc::now();
        let schema = extractor.feature_names();
        let models: Vec<TrainedModel> = classifiers
            .into_iter()
            .map(|classifier| {
                let probabilities = holdout_probabilities(&classifier, &x_test);
                let metrics = PerformanceMetrics::evaluate(&probabilities, &y_test);
                info!(
                    model = %classifier.kind(),
                    accuracy = metrics.accuracy,
                    f1 = metrics.f1,
                    roc_auc = ?metrics.roc_auc,
                    "model evaluated"
                );
                TrainedModel::new(classifier, schema.clone(), metrics, trained_at)
            })
            .collect();

        ModelSet::new(extractor, models, train_idx.len(), test_idx.len())
    }

    /// Trains and, only if every step succeeded, installs the result.
    pub fn retrain(&self, ensemble: &ClassifierEnsemble, dataset: &[LabeledSnapshot]) -> Result<TrainingReport> {
        let set = self
            .train(dataset)
            .map_err(|e| keeping_active(ensemble, e))?;
        let mut report = TrainingReport::new(&set, Vec::new());
        report.version = ensemble.install(set);
        Ok(report)
    }

    /// Validates raw labeled rows, skipping the malformed ones, and trains on the rest.
    pub fn train_records(&self, records: Vec<LabeledRecord>) -> Result<(ModelSet, Vec<RowRejection>)> {
        let (rows, rejected) = into_labeled(records);
        for rejection in &rejected {
            warn!(row = rejection.row, error = %rejection.error, "skipping labeled row");
        }
        let set = self.train(&rows)?;
        Ok((set, rejected))
    }

    pub fn retrain_records(
        &self,
        ensemble: &ClassifierEnsemble,
        records: Vec<LabeledRecord>,
    ) -> Result<TrainingReport> {
        let (set, rejected) = self
            .train_records(records)
            .map_err(|e| keeping_active(ensemble, e))?;
        let mut report = TrainingReport::new(&set, rejected);
        report.version = ensemble.install(set);
        Ok(report)
    }

    fn fit_base(&self, kind: ModelKind, x: &Array2<f64>, y: &[bool]) -> Result<Classifier> {
        let config = &self.config;
        let classifier = match kind {
            ModelKind::LogisticRegression => {
                Classifier::LogisticRegression(LogisticModel::fit(x.view(), y, &config.logistic)?)
            }
            ModelKind::DecisionTree => {
                let settings = TreeSettings::from_params(&config.tree, config.seed);
                Classifier::DecisionTree(DecisionTree::fit(x.view(), y, &settings))
            }
            ModelKind::RandomForest => {
                Classifier::RandomForest(RandomForest::fit(x.view(), y, &config.forest, config.seed))
            }
            ModelKind::SoftVoting => {
                return Err(RiskError::Training {
                    model: kind.to_string(),
                    reason: "not a base model".to_string(),
                })
            }
        };
        info!(model = %kind, rows = x.nrows(), "model fitted");
        Ok(classifier)
    }
}

fn keeping_active(ensemble: &ClassifierEnsemble, error: RiskError) -> RiskError {
    warn!(error = %error, active = ?ensemble.version(), "training failed, keeping active models");
    error
}

fn holdout_probabilities(classifier: &Classifier, x: &Array2<f64>) -> Vec<f64> {
    x.rows()
        .into_iter()
        .map(|row| classifier.predict_probability(&row.to_vec()).clamp(0.0, 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForestParams;
    use crate::data::generate_sample_cohort;

    fn pipeline() -> TrainingPipeline {
        TrainingPipeline::new(TrainingConfig {
            forest: ForestParams {
                n_trees: 15,
                ..ForestParams::default()
            },
            ..TrainingConfig::default()
        })
    }

    #[test]
    fn fits_every_configured_model() {
        let cohort = generate_sample_cohort(300, 11);
        let set = pipeline().train(&cohort).unwrap();

        assert_eq!(
            set.model_names(),
            vec!["decision_tree", "logistic_regression", "random_forest", "soft_voting"]
        );
        assert_eq!(set.training_rows + set.holdout_rows, 300);
        assert!((59..=61).contains(&set.holdout_rows));

        let best = set
            .models
            .values()
            .map(|m| m.performance_metrics.f1)
            .fold(f64::MIN, f64::max);
        assert_eq!(set.models[&set.default_model].performance_metrics.f1, best);
        assert!(set.models[&set.default_model].performance_metrics.accuracy > 0.6);
    }

    #[test]
    fn too_few_rows_is_insufficient() {
        let cohort = generate_sample_cohort(50, 3);
        let err = pipeline().train(&cohort).unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData { got: 50, required: 100 }));
    }

    #[test]
    fn single_class_is_rejected() {
        let mut cohort = generate_sample_cohort(120, 3);
        cohort.iter_mut().for_each(|row| row.high_risk = false);
        assert!(matches!(pipeline().train(&cohort), Err(RiskError::Training { .. })));
    }

    #[test]
    fn training_is_deterministic_for_a_seed() {
        let cohort = generate_sample_cohort(200, 5);
        let a = pipeline().train(&cohort).unwrap();
        let b = pipeline().train(&cohort).unwrap();
        for (name, model) in &a.models {
            assert_eq!(model.performance_metrics, b.models[name].performance_metrics);
            assert_eq!(model.classifier(), b.models[name].classifier());
        }
    }

    #[test]
    fn failed_retrain_keeps_previous_models() {
        let ensemble = ClassifierEnsemble::new();
        let report = pipeline().retrain(&ensemble, &generate_sample_cohort(150, 9)).unwrap();
        assert_eq!(report.version, 1);

        let err = pipeline().retrain(&ensemble, &generate_sample_cohort(50, 9));
        assert!(err.is_err());
        assert_eq!(ensemble.version(), Some(1));
    }

    #[test]
    fn subset_of_models_without_voting() {
        let pipeline = TrainingPipeline::new(TrainingConfig {
            models: vec![ModelKind::DecisionTree],
            ..TrainingConfig::default()
        });
        let set = pipeline.train(&generate_sample_cohort(120, 2)).unwrap();
        assert_eq!(set.model_names(), vec!["decision_tree"]);
        assert_eq!(set.default_model, "decision_tree");
    }

    #[test]
    fn voting_alone_is_a_training_error() {
        let pipeline = TrainingPipeline::new(TrainingConfig {
            models: vec![ModelKind::SoftVoting],
            ..TrainingConfig::default()
        });
        assert!(matches!(
            pipeline.train(&generate_sample_cohort(120, 2)),
            Err(RiskError::Training { .. })
        ));
    }

    #[test]
    fn bad_rows_are_reported_not_fatal() {
        let mut records: Vec<LabeledRecord> = generate_sample_cohort(130, 4).iter().map(LabeledRecord::from).collect();
        records[0].label = "maybe".to_string();
        records[1].cgpa = None;

        let ensemble = ClassifierEnsemble::new();
        let report = pipeline().retrain_records(&ensemble, records).unwrap();
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.training_rows + report.holdout_rows, 128);
    }
}
