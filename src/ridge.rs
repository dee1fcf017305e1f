use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::gbm::check_shape;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    pub l2: f64,
    feature_means: Vec<f64>,
    feature_stds: Vec<f64>,
    coeffs: Vec<f64>,
    intercept: f64,
}

impl RidgeRegressor {
    pub fn new(l2: f64) -> Self {
        Self {
            l2: l2.max(0.0),
            feature_means: Vec::new(),
            feature_stds: Vec::new(),
            coeffs: Vec::new(),
            intercept: 0.0,
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.coeffs.is_empty()
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let p = check_shape(x, y)?;
        let n = x.len() as f64;

        let means = (0..p)
            .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n)
            .collect::<Vec<_>>();
        let stds = (0..p)
            .map(|j| {
                let var = x.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
                let sd = var.sqrt();
                if sd > 1e-12 { sd } else { 1.0 }
            })
            .collect::<Vec<_>>();
        let y_mean = y.iter().sum::<f64>() / n;

        let z = x
            .iter()
            .map(|r| {
                (0..p)
                    .map(|j| (r[j] - means[j]) / stds[j])
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        // (ZᵀZ + λI) w = Zᵀ(y - ȳ)
        let mut a = vec![vec![0.0; p]; p];
        let mut b = vec![0.0; p];
        for (row, target) in z.iter().zip(y) {
            let centered = target - y_mean;
            for i in 0..p {
                b[i] += row[i] * centered;
                for j in 0..p {
                    a[i][j] += row[i] * row[j];
                }
            }
        }
        for (i, a_row) in a.iter_mut().enumerate() {
            a_row[i] += self.l2.max(1e-9);
        }
        let coeffs = solve(a, b).ok_or(EngineError::InsufficientData {
            got: x.len(),
            need: p + 1,
        })?;

        self.feature_means = means;
        self.feature_stds = stds;
        self.coeffs = coeffs;
        self.intercept = y_mean;
        Ok(())
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if !self.is_trained() {
            return Err(EngineError::NotFitted("ridge regressor"));
        }
        if row.len() != self.coeffs.len() {
            return Err(EngineError::FeatureMismatch {
                expected: self.coeffs.len(),
                got: row.len(),
            });
        }
        Ok(self.intercept
            + row
                .iter()
                .enumerate()
                .map(|(j, v)| self.coeffs[j] * (v - self.feature_means[j]) / self.feature_stds[j])
                .sum::<f64>())
    }

    pub fn importances(&self) -> Vec<f64> {
        let total: f64 = self.coeffs.iter().map(|c| c.abs()).sum();
        if total <= 0.0 {
            return vec![0.0; self.coeffs.len()];
        }
        self.coeffs.iter().map(|c| c.abs() / total).collect()
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
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
    let mut w = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * w[k]).sum();
        w[row] = (b[row] - tail) / a[row][row];
    }
    Some(w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_linear_relationship() {
        let x = (0..30)
            .map(|i| vec![i as f64, (i % 7) as f64])
            .collect::<Vec<_>>();
        let y = x
            .iter()
            .map(|r| 5000.0 + 3.0 * r[0] - 2.0 * r[1])
            .collect::<Vec<_>>();
        let mut model = RidgeRegressor::new(1e-6);
        model.fit(&x, &y).unwrap();
        let pred = model.predict_row(&[10.0, 3.0]).unwrap();
        assert!((pred - (5000.0 + 30.0 - 6.0)).abs() < 1e-3);
        let imp = model.importances();
        assert!(imp[0] > imp[1]);
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
