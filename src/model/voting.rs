use serde::{Deserialize, Serialize};

use super::{Classifier, ProbabilityModel};

/// Averages the high-risk probability of models fitted in the same run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftVoting {
    members: Vec<Classifier>,
}

impl SoftVoting {
    pub fn new(members: Vec<Classifier>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[Classifier] {
        &self.members
    }
}

impl ProbabilityModel for SoftVoting {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        if self.members.is_empty() {
            return 0.5;
        }
        self.members
            .iter()
            .map(|m| m.predict_probability(features))
            .sum::<f64>()
            / self.members.len() as f64
    }

    fn feature_importances(&self) -> Vec<f64> {
        let mut total: Vec<f64> = Vec::new();
        for member in &self.members {
            let importances = member.feature_importances();
            if total.is_empty() {
                total = vec![0.0; importances.len()];
            }
            for (t, imp) in total.iter_mut().zip(importances) {
                *t += imp;
            }
        }
        let n = self.members.len().max(1) as f64;
        total.iter_mut().for_each(|t| *t /= n);
        total
    }
}
