//! Tunable parameters for scoring and training.
//!
//! Every threshold and weight the scoring core uses lives here so that a
//! deployment can override them from a TOML file without touching code.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};
use crate::model::ModelKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind: String,
    /// Directory holding the persisted model set. `None` keeps models in memory only.
    pub model_dir: Option<PathBuf>,
    pub scoring: ScoringConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            model_dir: None,
            scoring: ScoringConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(raw).map_err(|e| RiskError::Config(e.to_string()))?;
        config.scoring.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScoringConfig {
    pub thresholds: RiskThresholds,
    pub blend: BlendWeights,
    pub rules: RuleConfig,
    pub training: TrainingConfig,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let in_unit = |v: f64| v > 0.0 && v < 1.0;
        if !in_unit(t.medium) || !in_unit(t.high) {
            return Err(RiskError::Config(format!(
                "thresholds must lie in (0, 1), got medium={} high={}",
                t.medium, t.high
            )));
        }
        if t.high <= t.medium {
            return Err(RiskError::Config(format!(
                "high threshold {} must exceed medium threshold {}",
                t.high, t.medium
            )));
        }
        let b = &self.blend;
        if !(b.rule.is_finite() && b.model.is_finite()) || b.rule < 0.0 || b.model < 0.0 {
            return Err(RiskError::Config(format!(
                "blend weights must be finite and non-negative, got rule={} model={}",
                b.rule, b.model
            )));
        }
        self.rules.validate()?;
        if !in_unit(self.training.test_ratio) {
            return Err(RiskError::Config(format!(
                "test_ratio must lie in (0, 1), got {}",
                self.training.test_ratio
            )));
        }
        if self.training.models.is_empty() {
            return Err(RiskError::Config("at least one model kind must be configured".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self { medium: 0.3, high: 0.7 }
    }
}

/// Weights of the rule score and the model probability in the final blend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendWeights {
    pub rule: f64,
    pub model: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self { rule: 0.4, model: 0.6 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Attendance strictly below this percentage fires the attendance rule.
    pub attendance_below: f64,
    pub attendance_weight: f64,
    pub score_drop_weight: f64,
    /// Backlog count at or above this fires the backlog rule.
    pub backlogs_at_least: u32,
    pub backlog_weight: f64,
    /// Overdue days strictly above this fire the fee rule.
    pub fee_overdue_days_over: u32,
    pub fee_weight: f64,
}

impl RuleConfig {
    /// Severity weights feed the risk score directly, so each must lie in [0, 1].
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("attendance_weight", self.attendance_weight),
            ("score_drop_weight", self.score_drop_weight),
            ("backlog_weight", self.backlog_weight),
            ("fee_weight", self.fee_weight),
        ];
        for (name, weight) in weights {
            if !(0.0..=1.0).contains(&weight) {
                return Err(RiskError::Config(format!("{name} must lie in [0, 1], got {weight}")));
            }
        }
        if !self.attendance_below.is_finite() {
            return Err(RiskError::Config("attendance_below must be finite".into()));
        }
        Ok(())
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            attendance_below: 60.0,
            attendance_weight: 0.9,
            score_drop_weight: 0.6,
            backlogs_at_least: 2,
            backlog_weight: 0.8,
            fee_overdue_days_over: 30,
            fee_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub min_samples: usize,
    pub test_ratio: f64,
    pub seed: u64,
    pub models: Vec<ModelKind>,
    pub logistic: LogisticParams,
    pub tree: TreeParams,
    pub forest: ForestParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            test_ratio: 0.2,
            seed: 42,
            models: vec![
                ModelKind::LogisticRegression,
                ModelKind::DecisionTree,
                ModelKind::RandomForest,
                ModelKind::SoftVoting,
            ],
            logistic: LogisticParams::default(),
            tree: TreeParams::default(),
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub max_iterations: u64,
    /// L2 penalty strength.
    pub alpha: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            alpha: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` means the square root of the feature count.
    pub max_features: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: None,
        }
    }
}
