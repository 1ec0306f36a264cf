//! The active model set and its versioned, copy-on-write swap.
//!
//! Readers clone an `Arc<ModelSet>` under a short read lock and predict
//! against that generation; `install` replaces the whole set under the write
//! lock. An in-flight prediction therefore never sees a half-updated set.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::StudentSnapshot;
use crate::error::{Result, RiskError};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::metrics::{PerformanceMetrics, DECISION_THRESHOLD};
use crate::model::{FeatureImportance, TrainedModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub probability_high_risk: f64,
    /// Binary decision at the 0.5 boundary.
    pub high_risk: bool,
    pub model_used: String,
    /// What every model in the set answered for the same features.
    pub individual_probabilities: BTreeMap<String, f64>,
}

/// Every model fitted by one training run, plus the encoder they share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSet {
    pub version: u64,
    pub extractor: FeatureExtractor,
    pub models: BTreeMap<String, TrainedModel>,
    pub default_model: String,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub holdout_rows: usize,
}

impl ModelSet {
    pub fn new(
        extractor: FeatureExtractor,
        models: Vec<TrainedModel>,
        training_rows: usize,
        holdout_rows: usize,
    ) -> Result<Self> {
        let models: BTreeMap<String, TrainedModel> =
            models.into_iter().map(|m| (m.model_id.clone(), m)).collect();
        let default_model = Self::select_default(&models).ok_or_else(|| RiskError::Training {
            model: "ensemble".to_string(),
            reason: "no model was fitted".to_string(),
        })?;
        let trained_at = models
            .values()
            .map(|m| m.trained_at)
            .max()
            .unwrap_or_else(Utc::now);

        Ok(Self {
            version: 0,
            extractor,
            models,
            default_model,
            trained_at,
            training_rows,
            holdout_rows,
        })
    }

    /// Name of the model with the highest held-out F1; ties keep the first name in order.
    pub fn select_default(models: &BTreeMap<String, TrainedModel>) -> Option<String> {
        let mut best: Option<(&String, f64)> = None;
        for (name, model) in models {
            let f1 = model.performance_metrics.f1;
            if best.map_or(true, |(_, top)| f1 > top) {
                best = Some((name, f1));
            }
        }
        best.map(|(name, _)| name.clone())
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// The named model if present, otherwise the default one.
    pub fn resolve(&self, model_name: Option<&str>) -> Result<&TrainedModel> {
        if let Some(name) = model_name {
            if let Some(model) = self.models.get(name) {
                return Ok(model);
            }
            warn!(requested = name, default = %self.default_model, "unknown model, using default");
        }
        self.models
            .get(&self.default_model)
            .ok_or(RiskError::ModelNotTrained)
    }

    pub fn predict(&self, features: &FeatureVector, model_name: Option<&str>) -> Result<Prediction> {
        let model = self.resolve(model_name)?;
        let individual_probabilities = self
            .models
            .iter()
            .map(|(name, m)| Ok((name.clone(), m.predict_probability(features)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let probability_high_risk = individual_probabilities
            .get(&model.model_id)
            .copied()
            .ok_or(RiskError::ModelNotTrained)?;
        Ok(Prediction {
            probability_high_risk,
            high_risk: probability_high_risk > DECISION_THRESHOLD,
            model_used: model.model_id.clone(),
            individual_probabilities,
        })
    }

    pub fn predict_snapshot(&self, snapshot: &StudentSnapshot, model_name: Option<&str>) -> Result<Prediction> {
        let features = self.extractor.extract(snapshot)?;
        self.predict(&features, model_name)
    }

    pub fn info(&self) -> ModelSetInfo {
        ModelSetInfo {
            version: self.version,
            default_model: self.default_model.clone(),
            trained_at: self.trained_at,
            training_rows: self.training_rows,
            holdout_rows: self.holdout_rows,
            feature_schema: self.extractor.feature_names(),
            models: self
                .models
                .values()
                .map(|m| ModelSummary {
                    model_id: m.model_id.clone(),
                    performance_metrics: m.performance_metrics.clone(),
                    trained_at: m.trained_at,
                    feature_importances: m.feature_importances(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model_id: String,
    pub performance_metrics: PerformanceMetrics,
    pub trained_at: DateTime<Utc>,
    pub feature_importances: Vec<FeatureImportance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSetInfo {
    pub version: u64,
    pub default_model: String,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub feature_schema: Vec<String>,
    pub models: Vec<ModelSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub trained: bool,
    #[serde(flatten)]
    pub details: Option<ModelSetInfo>,
}

#[derive(Debug, Default)]
pub struct ClassifierEnsemble {
    active: RwLock<Option<Arc<ModelSet>>>,
}

impl ClassifierEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(set: ModelSet) -> Self {
        let ensemble = Self::new();
        ensemble.install(set);
        ensemble
    }

    /// The generation every prediction of one request should use.
    pub fn current(&self) -> Result<Arc<ModelSet>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RiskError::ModelNotTrained)
    }

    pub fn is_trained(&self) -> bool {
        self.current().is_ok()
    }

    pub fn version(&self) -> Option<u64> {
        self.current().ok().map(|set| set.version)
    }

    /// The version [`ClassifierEnsemble::install`] would assign next.
    pub fn next_version(&self) -> u64 {
        self.version().map_or(1, |v| v + 1)
    }

    pub fn predict(&self, features: &FeatureVector, model_name: Option<&str>) -> Result<Prediction> {
        let prediction = self.current()?.predict(features, model_name)?;
        debug!(model = %prediction.model_used, p = prediction.probability_high_risk, "model prediction");
        Ok(prediction)
    }

    /// Swaps in a new model set and returns its version.
    ///
    /// The version is one past the replaced set's, or the set's own version if
    /// that is higher (a set reloaded from disk keeps its number).
    pub fn install(&self, mut set: ModelSet) -> u64 {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let next = active.as_ref().map_or(1, |prev| prev.version + 1);
        set.version = set.version.max(next);
        let version = set.version;
        info!(
            version,
            default_model = %set.default_model,
            models = set.models.len(),
            "installed model set"
        );
        *active = Some(Arc::new(set));
        version
    }

    pub fn info(&self) -> ModelInfo {
        match self.current() {
            Ok(set) => ModelInfo {
                trained: true,
                details: Some(set.info()),
            },
            Err(_) => ModelInfo {
                trained: false,
                details: None,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Classifier, DecisionTree, TreeSettings};
    use ndarray::Array2;

    /// A model that answers `positives / 20` for every input.
    pub(crate) fn constant_model(positives: usize, width: usize, f1: f64, names: Vec<String>) -> TrainedModel {
        let x = Array2::<f64>::zeros((20, width));
        let y: Vec<bool> = (0..20).map(|i| i < positives).collect();
        let settings = TreeSettings {
            max_depth: 0,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 0,
        };
        let metrics = PerformanceMetrics {
            f1,
            ..PerformanceMetrics::default()
        };
        TrainedModel::new(
            Classifier::DecisionTree(DecisionTree::fit(x.view(), &y, &settings)),
            names,
            metrics,
            Utc::now(),
        )
    }

    fn extractor() -> FeatureExtractor {
        let cse = StudentSnapshot::new(80.0, 7.0, 0, 0).with_department("CSE");
        FeatureExtractor::fit([&cse])
    }

    fn model_set(positives: usize) -> ModelSet {
        let extractor = extractor();
        let model = constant_model(positives, extractor.width(), 0.8, extractor.feature_names());
        ModelSet::new(extractor, vec![model], 20, 5).unwrap()
    }

    #[test]
    fn untrained_ensemble_reports_not_trained() {
        let ensemble = ClassifierEnsemble::new();
        assert!(!ensemble.is_trained());
        assert!(matches!(ensemble.current(), Err(RiskError::ModelNotTrained)));
        let info = ensemble.info();
        assert!(!info.trained);
        assert_eq!(serde_json::to_value(&info).unwrap(), serde_json::json!({ "trained": false }));
    }

    #[test]
    fn default_is_highest_f1() {
        let extractor = extractor();
        let names = extractor.feature_names();
        let mut weak = constant_model(1, extractor.width(), 0.6, names.clone());
        weak.model_id = "weak".to_string();
        let mut strong = constant_model(19, extractor.width(), 0.9, names);
        strong.model_id = "strong".to_string();

        let set = ModelSet::new(extractor, vec![weak, strong], 40, 10).unwrap();
        assert_eq!(set.default_model, "strong");

        let features = set.extractor.extract(&StudentSnapshot::new(70.0, 6.0, 1, 0)).unwrap();
        let named = set.predict(&features, Some("weak")).unwrap();
        assert_eq!(named.model_used, "weak");
        assert!((named.probability_high_risk - 0.05).abs() < 1e-12);
        assert!(!named.high_risk);
        assert_eq!(named.individual_probabilities.len(), 2);
        assert!((named.individual_probabilities["strong"] - 0.95).abs() < 1e-12);

        let fallback = set.predict(&features, Some("svm")).unwrap();
        assert_eq!(fallback.model_used, "strong");
        assert!(fallback.high_risk);
    }

    #[test]
    fn install_bumps_version_and_old_readers_keep_their_generation() {
        let ensemble = ClassifierEnsemble::with_models(model_set(1));
        let first = ensemble.current().unwrap();
        assert_eq!(first.version, 1);

        let version = ensemble.install(model_set(19));
        assert_eq!(version, 2);

        let snapshot = StudentSnapshot::new(70.0, 6.0, 1, 0);
        let old = first.predict_snapshot(&snapshot, None).unwrap();
        let new = ensemble.current().unwrap().predict_snapshot(&snapshot, None).unwrap();
        assert!((old.probability_high_risk - 0.05).abs() < 1e-12);
        assert!((new.probability_high_risk - 0.95).abs() < 1e-12);
    }

    #[test]
    fn reloaded_set_keeps_higher_version() {
        let ensemble = ClassifierEnsemble::new();
        let mut set = model_set(5);
        set.version = 7;
        assert_eq!(ensemble.install(set), 7);
        assert_eq!(ensemble.install(model_set(5)), 8);
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let set = model_set(5);
        let wider = FeatureExtractor::fit([
            &StudentSnapshot::new(80.0, 7.0, 0, 0).with_department("CSE"),
            &StudentSnapshot::new(80.0, 7.0, 0, 0).with_department("ME"),
        ]);
        let features = wider.extract(&StudentSnapshot::new(80.0, 7.0, 0, 0)).unwrap();
        let err = set.predict(&features, None).unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn info_lists_models_and_schema() {
        let info = ClassifierEnsemble::with_models(model_set(5)).info();
        assert!(info.trained);
        let details = info.details.unwrap();
        assert_eq!(details.version, 1);
        assert_eq!(details.default_model, "decision_tree");
        assert_eq!(details.models.len(), 1);
        assert_eq!(details.feature_schema.last().unwrap(), "department=unknown");
    }
}
