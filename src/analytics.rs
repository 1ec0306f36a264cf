use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::risk::{BatchEntry, RiskCategory};

const TOP_REASONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: usize,
}

/// Roll-up of one batch of assessments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortSummary {
    pub total: usize,
    pub assessed: usize,
    pub rejected: usize,
    pub low_count: usize,
    pub medium_count: usize,
    pub high_count: usize,
    /// Assessments scored without a model.
    pub rule_only_count: usize,
    pub high_risk_rate: f64,
    pub avg_risk_score: f64,
    pub avg_confidence: f64,
    pub top_reasons: Vec<ReasonCount>,
}

impl CohortSummary {
    pub fn from_entries(entries: &[BatchEntry]) -> Self {
        let mut summary = CohortSummary {
            total: entries.len(),
            ..CohortSummary::default()
        };
        let mut total_score = 0.0;
        let mut total_confidence = 0.0;
        let mut reasons: HashMap<&str, usize> = HashMap::new();

        for entry in entries {
            let assessment = match entry {
                BatchEntry::Assessed { assessment, .. } => assessment,
                BatchEntry::Rejected { .. } => {
                    summary.rejected += 1;
                    continue;
                }
            };

            summary.assessed += 1;
            match assessment.risk_category {
                RiskCategory::Low => summary.low_count += 1,
                RiskCategory::Medium => summary.medium_count += 1,
                RiskCategory::High => summary.high_count += 1,
            }
            if assessment.is_rule_only() {
                summary.rule_only_count += 1;
            }
            total_score += assessment.risk_score;
            total_confidence += assessment.confidence;
            for reason in &assessment.contributing_reasons {
                *reasons.entry(reason.as_str()).or_insert(0) += 1;
            }
        }

        if summary.assessed > 0 {
            let n = summary.assessed as f64;
            summary.high_risk_rate = summary.high_count as f64 / n;
            summary.avg_risk_score = total_score / n;
            summary.avg_confidence = total_confidence / n;
        }

        let mut ranked: Vec<ReasonCount> = reasons
            .into_iter()
            .map(|(reason, count)| ReasonCount {
                reason: reason.to_string(),
                count,
            })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));
        ranked.truncate(TOP_REASONS);
        summary.top_reasons = ranked;

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskAssessment, RULE_ONLY};

    fn assessed(row: usize, score: f64, category: RiskCategory, reasons: &[&str]) -> BatchEntry {
        BatchEntry::Assessed {
            row,
            assessment: RiskAssessment {
                student_id: None,
                risk_score: score,
                risk_category: category,
                confidence: 0.5,
                contributing_reasons: reasons.iter().map(|r| r.to_string()).collect(),
                model_used: RULE_ONLY.to_string(),
                rule_score: score,
                model_probability: None,
                fired_rules: Vec::new(),
                model_probabilities: Default::default(),
            },
        }
    }

    #[test]
    fn counts_categories_and_reasons() {
        let entries = vec![
            assessed(0, 0.9, RiskCategory::High, &["attendance below 60%", "fee overdue"]),
            assessed(1, 0.5, RiskCategory::Medium, &["fee overdue"]),
            assessed(2, 0.0, RiskCategory::Low, &[]),
            BatchEntry::Rejected {
                row: 3,
                student_id: None,
                error: "invalid student snapshot: cgpa is required".to_string(),
            },
        ];
        let summary = CohortSummary::from_entries(&entries);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.assessed, 3);
        assert_eq!(summary.rejected, 1);
        assert_eq!((summary.low_count, summary.medium_count, summary.high_count), (1, 1, 1));
        assert_eq!(summary.rule_only_count, 3);
        assert!((summary.avg_risk_score - 1.4 / 3.0).abs() < 1e-12);
        assert_eq!(
            summary.top_reasons[0],
            ReasonCount {
                reason: "fee overdue".to_string(),
                count: 2
            }
        );
        assert_eq!(summary.top_reasons.len(), 2);
    }

    #[test]
    fn empty_batch_has_zero_averages() {
        let summary = CohortSummary::from_entries(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.avg_confidence, 0.0);
        assert!(summary.top_reasons.is_empty());
    }
}
