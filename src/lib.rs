//! Student dropout risk scoring.
//!
//! A rule engine and a set of trained classifiers each look at a student
//! snapshot; [`RiskAssessor`] merges their views into one [`RiskAssessment`].
//! [`TrainingPipeline`] builds the classifiers from labeled history and
//! [`ClassifierEnsemble`] swaps them in atomically.

pub mod analytics;
pub mod api;
pub mod config;
pub mod data;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod risk;
pub mod rules;
pub mod store;
pub mod training;

pub use config::{AppConfig, ScoringConfig};
pub use data::{LabeledRecord, LabeledSnapshot, StudentRecord, StudentSnapshot};
pub use ensemble::{ClassifierEnsemble, ModelInfo, ModelSet, Prediction};
pub use error::{Result, RiskError};
pub use features::{FeatureExtractor, FeatureVector};
pub use risk::{BatchAssessment, BatchEntry, RiskAssessment, RiskAssessor, RiskCategory, RULE_ONLY};
pub use rules::{RuleEngine, RuleFlag, RuleId};
pub use store::ModelStore;
pub use training::{TrainingPipeline, TrainingReport};
