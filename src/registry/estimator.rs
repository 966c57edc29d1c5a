use serde::{Deserialize, Serialize};

use crate::error::{PricerError, Result};
use crate::pipeline::processing::features::FeatureVector;

/// The regression seam. The pipeline treats the estimator as an external,
/// swappable component: anything that can score a feature vector fits.
pub trait Estimator: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict(&self, features: &FeatureVector) -> f64;
}

/// Ridge regression solved in closed form via the normal equations.
/// Deterministic: the same rows and targets always produce the same weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub l2: f64,
}

impl RidgeRegressor {
    pub fn fit(rows: &[FeatureVector], targets: &[f64], l2: f64) -> Result<Self> {
        if rows.is_empty() || rows.len() != targets.len() {
            return Err(PricerError::Config(format!(
                "cannot fit estimator on {} rows with {} targets",
                rows.len(),
                targets.len()
            )));
        }
        let d = rows[0].values.len();
        if rows.iter().any(|r| r.values.len() != d) {
            return Err(PricerError::Config(
                "feature rows have inconsistent widths".to_string(),
            ));
        }

        // Augment with an intercept column; the intercept is not regularized.
        let width = d + 1;
        let mut xtx = vec![vec![0.0f64; width]; width];
        let mut xty = vec![0.0f64; width];
        for (row, &y) in rows.iter().zip(targets) {
            let mut x = Vec::with_capacity(width);
            x.push(1.0);
            x.extend_from_slice(&row.values);
            for i in 0..width {
                for j in 0..width {
                    xtx[i][j] += x[i] * x[j];
                }
                xty[i] += x[i] * y;
            }
        }
        for i in 1..width {
            xtx[i][i] += l2;
        }

        let solution = solve_linear_system(xtx, xty)?;
        Ok(Self {
            feature_names: rows[0].names.clone(),
            intercept: solution[0],
            weights: solution[1..].to_vec(),
            l2,
        })
    }
}

impl Estimator for RidgeRegressor {
    fn name(&self) -> &'static str {
        "ridge"
    }

    fn predict(&self, features: &FeatureVector) -> f64 {
        self.intercept
            + self
                .weights
                .iter()
                .zip(&features.values)
                .map(|(w, v)| w * v)
                .sum::<f64>()
    }
}

/// Serializable closed set of supported estimators. The trait is the seam;
/// this enum is what travels inside a model bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorModel {
    Ridge(RidgeRegressor),
}

impl Estimator for EstimatorModel {
    fn name(&self) -> &'static str {
        match self {
            EstimatorModel::Ridge(m) => m.name(),
        }
    }

    fn predict(&self, features: &FeatureVector) -> f64 {
        match self {
            EstimatorModel::Ridge(m) => m.predict(features),
        }
    }
}

/// Gaussian elimination with partial pivoting.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().partial_cmp(&a[j][col].abs()).unwrap())
            .unwrap();
        if a[pivot][col].abs() < 1e-12 {
            return Err(PricerError::Config(
                "normal matrix is singular; not enough training variation".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for k in i + 1..n {
            sum -= a[i][k] * x[k];
        }
        x[i] = sum / a[i][i];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: Vec<f64>) -> FeatureVector {
        FeatureVector {
            schema_version: "v-test".to_string(),
            names: (0..values.len()).map(|i| format!("f{i}")).collect(),
            values,
        }
    }

    #[test]
    fn test_fit_recovers_linear_relationship() {
        // y = 2x + 1, noiseless.
        let rows: Vec<FeatureVector> = (0..10).map(|i| vector(vec![i as f64])).collect();
        let targets: Vec<f64> = (0..10).map(|i| 2.0 * i as f64 + 1.0).collect();

        let model = RidgeRegressor::fit(&rows, &targets, 1e-9).unwrap();
        assert!((model.weights[0] - 2.0).abs() < 1e-6);
        assert!((model.intercept - 1.0).abs() < 1e-6);

        let prediction = model.predict(&vector(vec![20.0]));
        assert!((prediction - 41.0).abs() < 1e-5);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let rows: Vec<FeatureVector> = (0..20)
            .map(|i| vector(vec![i as f64, (i * i) as f64]))
            .collect();
        let targets: Vec<f64> = (0..20).map(|i| 3.0 * i as f64 + 7.0).collect();

        let a = RidgeRegressor::fit(&rows, &targets, 0.1).unwrap();
        let b = RidgeRegressor::fit(&rows, &targets, 0.1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fit_rejects_empty_or_mismatched_input() {
        assert!(RidgeRegressor::fit(&[], &[], 0.1).is_err());
        let rows = vec![vector(vec![1.0])];
        assert!(RidgeRegressor::fit(&rows, &[1.0, 2.0], 0.1).is_err());
    }

    #[test]
    fn test_estimator_model_round_trips_through_serde() {
        let rows: Vec<FeatureVector> = (0..5).map(|i| vector(vec![i as f64])).collect();
        let targets: Vec<f64> = (0..5).map(|i| i as f64 * 10.0).collect();
        let model = EstimatorModel::Ridge(RidgeRegressor::fit(&rows, &targets, 0.01).unwrap());

        let json = serde_json::to_string(&model).unwrap();
        let reloaded: EstimatorModel = serde_json::from_str(&json).unwrap();
        let probe = vector(vec![3.5]);
        assert_eq!(model.predict(&probe), reloaded.predict(&probe));
    }
}
