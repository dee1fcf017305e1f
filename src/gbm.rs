use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// Splits must reduce squared error by more than this to be taken.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GbmParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.7,
            max_depth: 3,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeFitter<'a> {
    x: &'a [Vec<f64>],
    residuals: &'a [f64],
    params: GbmParams,
    n_features: usize,
    nodes: Vec<Node>,
    gains: Vec<f64>,
}

impl TreeFitter<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: mean_of(self.residuals, &rows),
        });

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf.max(1)
        {
            return slot;
        }
        let Some(best) = self.best_split(&rows) else {
            return slot;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[r][best.feature] <= best.threshold);
        self.gains[best.feature] += best.gain;

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[slot] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        slot
    }

    fn best_split(&self, rows: &[usize]) -> Option<SplitCandidate> {
        let per_feature = (0..self.n_features)
            .into_par_iter()
            .map(|f| self.best_split_on(rows, f))
            .collect::<Vec<_>>();
        // Sequential reduce keeps ties on the lowest feature index.
        per_feature
            .into_iter()
            .flatten()
            .fold(None, |best: Option<SplitCandidate>, cand| match best {
                Some(b) if b.gain >= cand.gain => Some(b),
                _ => Some(cand),
            })
    }

    fn best_split_on(&self, rows: &[usize], feature: usize) -> Option<SplitCandidate> {
        let mut sorted = rows
            .iter()
            .map(|&r| (self.x[r][feature], self.residuals[r]))
            .collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = sorted.len();
        let total: f64 = sorted.iter().map(|(_, r)| r).sum();
        let parent_score = total * total / n as f64;
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut best: Option<SplitCandidate> = None;
        let mut left_sum = 0.0;
        for i in 0..n - 1 {
            left_sum += sorted[i].1;
            let n_left = i + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let (lo, hi) = (sorted[i].0, sorted[i + 1].0);
            if lo >= hi {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64
                - parent_score;
            if gain > MIN_GAIN && best.is_none_or(|b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: lo + (hi - lo) / 2.0,
                    gain,
                });
            }
        }
        best
    }
}

fn mean_of(values: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&r| values[r]).sum::<f64>() / rows.len() as f64
}

/// Least-squares gradient boosting over shallow regression trees.
/// Training is deterministic: no row or column subsampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: GbmParams,
    n_features: usize,
    init: f64,
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl GradientBoostedTrees {
    pub fn new(params: GbmParams) -> Self {
        Self {
            params,
            n_features: 0,
            init: 0.0,
            trees: Vec::new(),
            importances: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn is_trained(&self) -> bool {
        self.n_features > 0
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let n_features = check_shape(x, y)?;

        let init = y.iter().sum::<f64>() / y.len() as f64;
        let mut current = vec![init; y.len()];
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        let mut gains = vec![0.0; n_features];

        for _ in 0..self.params.n_estimators {
            let residuals = y
                .iter()
                .zip(&current)
                .map(|(t, f)| t - f)
                .collect::<Vec<_>>();
            let mut fitter = TreeFitter {
                x,
                residuals: &residuals,
                params: self.params,
                n_features,
                nodes: Vec::new(),
                gains: vec![0.0; n_features],
            };
            fitter.grow((0..y.len()).collect(), 0);
            let tree = RegressionTree {
                nodes: fitter.nodes,
            };
            for (acc, g) in gains.iter_mut().zip(&fitter.gains) {
                *acc += g;
            }
            for (f, row) in current.iter_mut().zip(x) {
                *f += self.params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        let total: f64 = gains.iter().sum();
        let importances = if total > 0.0 {
            gains.iter().map(|g| g / total).collect()
        } else {
            vec![0.0; n_features]
        };

        self.n_features = n_features;
        self.init = init;
        self.trees = trees;
        self.importances = importances;
        Ok(())
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if !self.is_trained() {
            return Err(EngineError::NotFitted("gradient boosted trees"));
        }
        if row.len() != self.n_features {
            return Err(EngineError::FeatureMismatch {
                expected: self.n_features,
                got: row.len(),
            });
        }
        Ok(self.init
            + self
                .trees
                .iter()
                .map(|t| self.params.learning_rate * t.predict(row))
                .sum::<f64>())
    }

    pub fn importances(&self) -> &[f64] {
        &self.importances
    }
}

pub(crate) fn check_shape(x: &[Vec<f64>], y: &[f64]) -> Result<usize> {
    if x.is_empty() || y.is_empty() {
        return Err(EngineError::InsufficientData { got: 0, need: 1 });
    }
    if x.len() != y.len() {
        return Err(EngineError::FeatureMismatch {
            expected: y.len(),
            got: x.len(),
        });
    }
    let n_features = x[0].len();
    if let Some(bad) = x.iter().find(|r| r.len() != n_features) {
        return Err(EngineError::FeatureMismatch {
            expected: n_features,
            got: bad.len(),
        });
    }
    Ok(n_features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_split_recovers_step_function() {
        let x = (0..20).map(|i| vec![i as f64, 0.0]).collect::<Vec<_>>();
        let y = (0..20)
            .map(|i| if i < 10 { 90.0 } else { 95.0 })
            .collect::<Vec<_>>();
        let mut gbm = GradientBoostedTrees::new(GbmParams {
            n_estimators: 20,
            learning_rate: 0.5,
            ..GbmParams::default()
        });
        gbm.fit(&x, &y).unwrap();
        assert!((gbm.predict_row(&[2.0, 0.0]).unwrap() - 90.0).abs() < 1e-3);
        assert!((gbm.predict_row(&[17.0, 0.0]).unwrap() - 95.0).abs() < 1e-3);
        // The constant column never splits.
        assert_eq!(gbm.importances()[1], 0.0);
        assert!((gbm.importances()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_target_has_no_signal() {
        let x = (0..12).map(|i| vec![i as f64]).collect::<Vec<_>>();
        let y = vec![100.0; 12];
        let mut gbm = GradientBoostedTrees::new(GbmParams::default());
        gbm.fit(&x, &y).unwrap();
        assert_eq!(gbm.predict_row(&[3.0]).unwrap(), 100.0);
        assert_eq!(gbm.importances(), &[0.0]);
    }

    #[test]
    fn untrained_model_refuses_to_predict() {
        let gbm = GradientBoostedTrees::new(GbmParams::default());
        assert!(matches!(
            gbm.predict_row(&[1.0]),
            Err(EngineError::NotFitted(_))
        ));
    }
}
