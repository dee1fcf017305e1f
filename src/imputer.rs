use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Median fill for missing (`NaN`) cells, learned column by column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedianImputer {
    statistics: Option<Vec<f64>>,
}

impl MedianImputer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(EngineError::InsufficientData { got: 0, need: 1 });
        };
        let cols = first.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(EngineError::FeatureMismatch {
                expected: cols,
                got: bad.len(),
            });
        }

        let statistics = (0..cols)
            .map(|col| {
                let observed = rows
                    .iter()
                    .map(|r| r[col])
                    .filter(|v| !v.is_nan())
                    .collect::<Vec<_>>();
                // A column with nothing observed fills with zero.
                median(observed).unwrap_or(0.0)
            })
            .collect();
        Ok(Self {
            statistics: Some(statistics),
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.statistics.is_some()
    }

    pub fn statistics(&self) -> Option<&[f64]> {
        self.statistics.as_deref()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let stats = self
            .statistics
            .as_ref()
            .ok_or(EngineError::NotFitted("median imputer"))?;
        rows.iter()
            .map(|row| {
                if row.len() != stats.len() {
                    return Err(EngineError::FeatureMismatch {
                        expected: stats.len(),
                        got: row.len(),
                    });
                }
                Ok(row
                    .iter()
                    .zip(stats)
                    .map(|(v, fill)| if v.is_nan() { *fill } else { *v })
                    .collect())
            })
            .collect()
    }
}

pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Some(if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_with_column_median() {
        let rows = vec![
            vec![1.0, f64::NAN],
            vec![3.0, 10.0],
            vec![f64::NAN, 20.0],
            vec![2.0, 40.0],
        ];
        let imp = MedianImputer::fit(&rows).unwrap();
        assert_eq!(imp.statistics().unwrap(), &[2.0, 20.0]);
        let out = imp.transform(&rows).unwrap();
        assert_eq!(out[0], vec![1.0, 20.0]);
        assert_eq!(out[2], vec![2.0, 20.0]);
    }

    #[test]
    fn all_missing_column_fills_zero() {
        let rows = vec![vec![f64::NAN], vec![f64::NAN]];
        let imp = MedianImputer::fit(&rows).unwrap();
        assert_eq!(imp.transform(&rows).unwrap(), vec![vec![0.0], vec![0.0]]);
    }

    #[test]
    fn transform_before_fit_is_an_error() {
        let err = MedianImputer::new().transform(&[vec![1.0]]).unwrap_err();
        assert!(matches!(err, EngineError::NotFitted(_)));
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let imp = MedianImputer::fit(&[vec![1.0, 2.0]]).unwrap();
        let err = imp.transform(&[vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::FeatureMismatch { expected: 2, got: 1 }
        ));
    }
}
