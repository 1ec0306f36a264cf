//! Logistic regression fitted with linfa on standardized features.

use linfa::prelude::*;
use linfa_logistic::LogisticRegression;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::ProbabilityModel;
use crate::config::LogisticParams;
use crate::error::{Result, RiskError};

/// Per-column z-score scaling learned from the training partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mean: Vec<f64> = x.sum_axis(Axis(0)).iter().map(|s| s / n).collect();
        let scale = x
            .axis_iter(Axis(1))
            .zip(&mean)
            .map(|(column, &m)| {
                let var = column.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                // constant columns (e.g. an unused one-hot slot) pass through centred
                if std < 1e-12 {
                    1.0
                } else {
                    std
                }
            })
            .collect();
        Self { mean, scale }
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for (mut column, (m, s)) in out.axis_iter_mut(Axis(1)).zip(self.mean.iter().zip(&self.scale)) {
            column.mapv_inplace(|v| (v - m) / s);
        }
        out
    }

    fn transform_value(&self, index: usize, value: f64) -> f64 {
        (value - self.mean[index]) / self.scale[index]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    scaler: StandardScaler,
    /// Oriented so that a positive log-odds means high risk.
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LogisticModel {
    pub fn fit(x: ArrayView2<f64>, y: &[bool], params: &LogisticParams) -> Result<Self> {
        let scaler = StandardScaler::fit(x);
        let scaled = scaler.transform(x);
        let targets = Array1::from_vec(y.to_vec());
        let dataset = Dataset::new(scaled.clone(), targets);

        let fitted = LogisticRegression::default()
            .max_iterations(params.max_iterations)
            .alpha(params.alpha)
            .fit(&dataset)
            .map_err(|e| RiskError::Training {
                model: "logistic_regression".to_string(),
                reason: e.to_string(),
            })?;

        let mut coefficients = fitted.params().to_vec();
        let mut intercept = fitted.intercept();

        // linfa reports the probability of whichever label it treats as positive;
        // flip the log-odds if that label turned out to be `false`.
        let probabilities = fitted.predict_probabilities(&scaled);
        let labels = fitted.predict(&scaled);
        let decisive = probabilities
            .iter()
            .zip(labels.iter())
            .max_by(|a, b| (a.0 - 0.5).abs().total_cmp(&(b.0 - 0.5).abs()));
        if let Some((&p, &label)) = decisive {
            if (p >= 0.5) != label {
                coefficients.iter_mut().for_each(|c| *c = -*c);
                intercept = -intercept;
            }
        }

        Ok(Self {
            scaler,
            coefficients,
            intercept,
        })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    fn log_odds(&self, features: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .zip(features)
            .enumerate()
            .map(|(i, (c, &v))| c * self.scaler.transform_value(i, v))
            .sum::<f64>()
            + self.intercept
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let exp_z = z.exp();
        exp_z / (1.0 + exp_z)
    }
}

impl ProbabilityModel for LogisticModel {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        sigmoid(self.log_odds(features))
    }

    fn feature_importances(&self) -> Vec<f64> {
        let total: f64 = self.coefficients.iter().map(|c| c.abs()).sum();
        if total == 0.0 {
            return vec![0.0; self.coefficients.len()];
        }
        self.coefficients.iter().map(|c| c.abs() / total).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Vec<bool>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let attendance = 40.0 + i as f64 * 1.5;
            rows.extend_from_slice(&[attendance, 5.0]);
            labels.push(attendance < 70.0);
        }
        (Array2::from_shape_vec((40, 2), rows).unwrap(), labels)
    }

    #[test]
    fn scaler_centres_and_scales() {
        let x = array![[1.0, 10.0], [3.0, 10.0]];
        let scaler = StandardScaler::fit(x.view());
        let scaled = scaler.transform(x.view());
        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn learns_direction_of_risk() {
        let (x, y) = separable();
        let model = LogisticModel::fit(x.view(), &y, &LogisticParams::default()).unwrap();

        let low_attendance = model.predict_probability(&[45.0, 5.0]);
        let high_attendance = model.predict_probability(&[95.0, 5.0]);
        assert!(low_attendance > 0.5, "p = {low_attendance}");
        assert!(high_attendance < 0.5, "p = {high_attendance}");
        assert!(model.coefficients()[0] < 0.0);
    }

    #[test]
    fn probabilities_stay_in_unit_interval() {
        let (x, y) = separable();
        let model = LogisticModel::fit(x.view(), &y, &LogisticParams::default()).unwrap();
        for attendance in [0.0, 50.0, 100.0, 1e6] {
            let p = model.predict_probability(&[attendance, 5.0]);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn importances_sum_to_one() {
        let (x, y) = separable();
        let model = LogisticModel::fit(x.view(), &y, &LogisticParams::default()).unwrap();
        let importances = model.feature_importances();
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn single_class_fails_to_fit() {
        let x = array![[1.0], [2.0], [3.0]];
        let err = LogisticModel::fit(x.view(), &[true, true, true], &LogisticParams::default());
        assert!(matches!(err, Err(RiskError::Training { .. })));
    }
}
