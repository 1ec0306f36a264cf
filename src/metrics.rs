//! Held-out performance metrics for a fitted classifier.

use serde::{Deserialize, Serialize};

/// Decision boundary on the high-risk probability.
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predicted: &[bool], actual: &[bool]) -> Self {
        let mut matrix = Self::default();
        for (&p, &a) in predicted.iter().zip(actual) {
            match (p, a) {
                (true, true) => matrix.true_positive += 1,
                (true, false) => matrix.false_positive += 1,
                (false, false) => matrix.true_negative += 1,
                (false, true) => matrix.false_negative += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    /// Precision, recall, f1 and support with `positive` as the class of interest.
    fn class_scores(&self, positive: bool) -> ClassMetrics {
        let (tp, fp, fn_) = if positive {
            (self.true_positive, self.false_positive, self.false_negative)
        } else {
            (self.true_negative, self.false_negative, self.false_positive)
        };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        ClassMetrics {
            precision,
            recall,
            f1: harmonic_mean(precision, recall),
            support: tp + fn_,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Scores on the held-out partition.
///
/// `precision`, `recall` and `f1` are averaged over both classes weighted by
/// support; `high_risk` keeps the per-class view of the positive class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// `None` when the held-out partition has a single class.
    pub roc_auc: Option<f64>,
    pub support: usize,
    pub confusion: ConfusionMatrix,
    pub high_risk: ClassMetrics,
}

impl PerformanceMetrics {
    pub fn evaluate(probabilities: &[f64], actual: &[bool]) -> Self {
        let predicted: Vec<bool> = probabilities.iter().map(|&p| p > DECISION_THRESHOLD).collect();
        let confusion = ConfusionMatrix::from_predictions(&predicted, actual);
        let high_risk = confusion.class_scores(true);
        let low_risk = confusion.class_scores(false);

        let support = confusion.total();
        let weighted = |f: fn(&ClassMetrics) -> f64| {
            if support == 0 {
                0.0
            } else {
                (f(&high_risk) * high_risk.support as f64 + f(&low_risk) * low_risk.support as f64)
                    / support as f64
            }
        };

        Self {
            accuracy: confusion.accuracy(),
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1: weighted(|m| m.f1),
            roc_auc: roc_auc(probabilities, actual),
            support,
            confusion,
            high_risk,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic_mean(a: f64, b: f64) -> f64 {
    if a + b == 0.0 {
        0.0
    } else {
        2.0 * a * b / (a + b)
    }
}

/// Area under the ROC curve via the rank statistic; tied scores share their average rank.
pub fn roc_auc(probabilities: &[f64], actual: &[bool]) -> Option<f64> {
    let positives = actual.iter().filter(|&&a| a).count();
    let negatives = actual.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| probabilities[a].total_cmp(&probabilities[b]));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probabilities[order[j + 1]] == probabilities[order[i]] {
            j += 1;
        }
        // ranks are 1-based
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if actual[idx] {
                positive_rank_sum += average_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}
