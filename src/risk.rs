//! Risk aggregation: rule flags and model probability merged into one assessment.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analytics::CohortSummary;
use crate::config::{RiskThresholds, ScoringConfig};
use crate::data::{StudentRecord, StudentSnapshot};
use crate::ensemble::{ClassifierEnsemble, ModelSet, Prediction};
use crate::error::{Result, RiskError};
use crate::rules::{RuleEngine, RuleId};

/// `model_used` when no trained model contributed.
pub const RULE_ONLY: &str = "rule_only";

const CONFIDENCE_BASE: f64 = 0.5;
const CONFIDENCE_STEP: f64 = 0.25;
const CONFIDENCE_CAP: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    pub fn from_score(score: f64, thresholds: &RiskThresholds) -> Self {
        if score >= thresholds.high {
            RiskCategory::High
        } else if score >= thresholds.medium {
            RiskCategory::Medium
        } else {
            RiskCategory::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "LOW",
            RiskCategory::Medium => "MEDIUM",
            RiskCategory::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub risk_score: f64,
    pub risk_category: RiskCategory,
    pub confidence: f64,
    /// Rule reasons in rule order, then the model reason if any.
    pub contributing_reasons: Vec<String>,
    pub model_used: String,
    pub rule_score: f64,
    pub model_probability: Option<f64>,
    pub fired_rules: Vec<RuleId>,
    /// Per-model answers behind `model_probability`; empty when scored by rules only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_probabilities: BTreeMap<String, f64>,
}

impl RiskAssessment {
    pub fn is_rule_only(&self) -> bool {
        self.model_used == RULE_ONLY
    }
}

/// One row of a batch: scored, or rejected without affecting the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntry {
    Assessed {
        row: usize,
        assessment: RiskAssessment,
    },
    Rejected {
        row: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        student_id: Option<String>,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAssessment {
    pub entries: Vec<BatchEntry>,
    pub summary: CohortSummary,
}

pub struct RiskAssessor {
    config: ScoringConfig,
    rules: RuleEngine,
    ensemble: Arc<ClassifierEnsemble>,
}

impl RiskAssessor {
    pub fn new(config: ScoringConfig, ensemble: Arc<ClassifierEnsemble>) -> Self {
        Self {
            rules: RuleEngine::new(config.rules),
            config,
            ensemble,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn ensemble(&self) -> &Arc<ClassifierEnsemble> {
        &self.ensemble
    }

    pub fn assess(&self, snapshot: &StudentSnapshot) -> Result<RiskAssessment> {
        self.assess_with_model(snapshot, None)
    }

    /// Scores one snapshot, preferring `model_name` when it names a trained model.
    ///
    /// Only a malformed snapshot is an error; a missing or failing model
    /// degrades to rule-only scoring.
    pub fn assess_with_model(&self, snapshot: &StudentSnapshot, model_name: Option<&str>) -> Result<RiskAssessment> {
        let active = self.active_models();
        self.assess_against(snapshot, active.as_deref(), model_name)
    }

    pub fn assess_record(&self, record: StudentRecord, model_name: Option<&str>) -> Result<RiskAssessment> {
        let snapshot = StudentSnapshot::try_from(record)?;
        self.assess_with_model(&snapshot, model_name)
    }

    /// Scores every record against the same model generation.
    pub fn assess_batch(&self, records: Vec<StudentRecord>, model_name: Option<&str>) -> BatchAssessment {
        let active = self.active_models();
        let entries: Vec<BatchEntry> = records
            .into_par_iter()
            .enumerate()
            .map(|(row, record)| {
                let student_id = record.student_id.clone();
                let outcome = StudentSnapshot::try_from(record)
                    .and_then(|snapshot| self.assess_against(&snapshot, active.as_deref(), model_name));
                match outcome {
                    Ok(assessment) => BatchEntry::Assessed { row, assessment },
                    Err(e) => {
                        warn!(row, student_id = ?student_id, error = %e, "rejected batch row");
                        BatchEntry::Rejected {
                            row,
                            student_id,
                            error: e.to_string(),
                        }
                    }
                }
            })
            .collect();

        let summary = CohortSummary::from_entries(&entries);
        BatchAssessment { entries, summary }
    }

    fn active_models(&self) -> Option<Arc<ModelSet>> {
        match self.ensemble.current() {
            Ok(set) => Some(set),
            Err(RiskError::ModelNotTrained) => None,
            Err(e) => {
                warn!(error = %e, "model set unavailable, scoring with rules only");
                None
            }
        }
    }

    fn assess_against(
        &self,
        snapshot: &StudentSnapshot,
        models: Option<&ModelSet>,
        model_name: Option<&str>,
    ) -> Result<RiskAssessment> {
        snapshot.validate()?;

        let outcome = self.rules.evaluate(snapshot);
        let rule_score = outcome.score();
        let prediction = models.and_then(|set| self.model_prediction(set, snapshot, model_name));

        let thresholds = &self.config.thresholds;
        let blend = &self.config.blend;
        let (risk_score, model_used, model_probability) = match &prediction {
            Some(p) => (
                (blend.rule * rule_score + blend.model * p.probability_high_risk).clamp(0.0, 1.0),
                p.model_used.clone(),
                Some(p.probability_high_risk),
            ),
            None => (rule_score.clamp(0.0, 1.0), RULE_ONLY.to_string(), None),
        };
        let risk_category = RiskCategory::from_score(risk_score, thresholds);

        let mut confidence = CONFIDENCE_BASE;
        if let Some(p) = model_probability {
            if (rule_score >= thresholds.high) == (p >= thresholds.high) {
                confidence += CONFIDENCE_STEP;
            }
        }
        if outcome.len() >= 2 {
            confidence += CONFIDENCE_STEP;
        }
        let confidence = confidence.min(CONFIDENCE_CAP);

        let mut contributing_reasons = outcome.reasons();
        if let Some(p) = model_probability {
            if p >= thresholds.high {
                contributing_reasons.push(format!("elevated probability from {model_used}"));
            }
        }

        debug!(
            student_id = ?snapshot.student_id,
            risk_score,
            category = %risk_category,
            model = %model_used,
            "assessed"
        );

        Ok(RiskAssessment {
            student_id: snapshot.student_id.clone(),
            risk_score,
            risk_category,
            confidence,
            contributing_reasons,
            model_used,
            rule_score,
            model_probability,
            fired_rules: outcome.fired(),
            model_probabilities: prediction
                .map(|p| p.individual_probabilities)
                .unwrap_or_default(),
        })
    }

    fn model_prediction(
        &self,
        set: &ModelSet,
        snapshot: &StudentSnapshot,
        model_name: Option<&str>,
    ) -> Option<Prediction> {
        match set.predict_snapshot(snapshot, model_name) {
            Ok(prediction) => Some(prediction),
            Err(e) => {
                warn!(error = %e, "model prediction failed, scoring with rules only");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::tests::constant_model;
    use crate::features::FeatureExtractor;

    fn assessor_with(positives: Option<usize>) -> RiskAssessor {
        let ensemble = match positives {
            Some(positives) => {
                let cse = StudentSnapshot::new(80.0, 7.0, 0, 0).with_department("CSE");
                let extractor = FeatureExtractor::fit([&cse]);
                let model = constant_model(positives, extractor.width(), 0.8, extractor.feature_names());
                ClassifierEnsemble::with_models(ModelSet::new(extractor, vec![model], 20, 5).unwrap())
            }
            None => ClassifierEnsemble::new(),
        };
        RiskAssessor::new(ScoringConfig::default(), Arc::new(ensemble))
    }

    #[test]
    fn category_follows_thresholds() {
        let t = RiskThresholds::default();
        assert_eq!(RiskCategory::from_score(0.0, &t), RiskCategory::Low);
        assert_eq!(RiskCategory::from_score(0.29, &t), RiskCategory::Low);
        assert_eq!(RiskCategory::from_score(0.3, &t), RiskCategory::Medium);
        assert_eq!(RiskCategory::from_score(0.69, &t), RiskCategory::Medium);
        assert_eq!(RiskCategory::from_score(0.7, &t), RiskCategory::High);
        assert_eq!(serde_json::to_string(&RiskCategory::Medium).unwrap(), "\"MEDIUM\"");
    }

    #[test]
    fn rule_only_when_untrained() {
        let assessment = assessor_with(None)
            .assess(&StudentSnapshot::new(55.0, 7.2, 0, 0))
            .unwrap();
        assert_eq!(assessment.model_used, RULE_ONLY);
        assert_eq!(assessment.risk_score, 0.9);
        assert_eq!(assessment.risk_category, RiskCategory::High);
        assert_eq!(assessment.contributing_reasons, vec!["attendance below 60%"]);
        assert_eq!(assessment.confidence, 0.5);
        assert_eq!(assessment.model_probability, None);
        assert!(assessment.model_probabilities.is_empty());
    }

    #[test]
    fn rule_only_score_stays_in_unit_interval() {
        let mut config = ScoringConfig::default();
        config.rules.attendance_weight = 1.5;
        let assessor = RiskAssessor::new(config, Arc::new(ClassifierEnsemble::new()));
        let assessment = assessor.assess(&StudentSnapshot::new(55.0, 7.2, 0, 0)).unwrap();
        assert_eq!(assessment.risk_score, 1.0);
        assert_eq!(assessment.risk_category, RiskCategory::High);
    }

    #[test]
    fn blends_rule_and_model() {
        // model answers 0.05 everywhere
        let assessment = assessor_with(Some(1))
            .assess(&StudentSnapshot::new(90.0, 8.5, 0, 0))
            .unwrap();
        assert_eq!(assessment.model_used, "decision_tree");
        assert!((assessment.risk_score - 0.03).abs() < 1e-12);
        assert_eq!(assessment.risk_category, RiskCategory::Low);
        assert!(assessment.contributing_reasons.is_empty());
        assert_eq!(assessment.model_probabilities.len(), 1);
        assert!((assessment.model_probabilities["decision_tree"] - 0.05).abs() < 1e-12);
        // rules and model both below the high threshold
        assert_eq!(assessment.confidence, 0.75);
    }

    #[test]
    fn model_reason_follows_rule_reasons() {
        // model answers 0.95 everywhere
        let snapshot = StudentSnapshot::new(50.0, 5.0, 3, 45).with_cgpa_trend(-0.2, Some(-0.1));
        let assessment = assessor_with(Some(19)).assess(&snapshot).unwrap();
        assert_eq!(
            assessment.contributing_reasons,
            vec![
                "attendance below 60%",
                "continuous score drop",
                "multiple backlogs",
                "fee overdue",
                "elevated probability from decision_tree",
            ]
        );
        assert!((assessment.risk_score - (0.4 * 0.9 + 0.6 * 0.95)).abs() < 1e-12);
        assert_eq!(assessment.confidence, CONFIDENCE_CAP);
    }

    #[test]
    fn unknown_model_name_uses_default() {
        let assessment = assessor_with(Some(1))
            .assess_with_model(&StudentSnapshot::new(90.0, 8.5, 0, 0), Some("svm"))
            .unwrap();
        assert_eq!(assessment.model_used, "decision_tree");
    }

    #[test]
    fn unseen_department_is_scored() {
        let snapshot = StudentSnapshot::new(90.0, 8.5, 0, 0).with_department("BIOTECH");
        let assessment = assessor_with(Some(1)).assess(&snapshot).unwrap();
        assert_eq!(assessment.model_used, "decision_tree");
    }

    #[test]
    fn malformed_snapshot_is_rejected() {
        let err = assessor_with(None)
            .assess(&StudentSnapshot::new(120.0, 7.0, 0, 0))
            .unwrap_err();
        assert!(err.is_schema());
    }

    #[test]
    fn batch_isolates_bad_rows() {
        let good = StudentRecord::from(&StudentSnapshot::new(55.0, 7.2, 0, 0));
        let missing_cgpa = StudentRecord {
            cgpa: None,
            ..good.clone()
        };
        let out_of_range = StudentRecord {
            attendance_percentage: Some(140.0),
            ..good.clone()
        };

        let batch = assessor_with(None).assess_batch(vec![good, missing_cgpa, out_of_range], None);
        assert_eq!(batch.entries.len(), 3);
        assert!(matches!(batch.entries[0], BatchEntry::Assessed { row: 0, .. }));
        assert!(matches!(batch.entries[1], BatchEntry::Rejected { row: 1, .. }));
        assert!(matches!(batch.entries[2], BatchEntry::Rejected { row: 2, .. }));
        assert_eq!(batch.summary.assessed, 1);
        assert_eq!(batch.summary.rejected, 2);
    }
}
