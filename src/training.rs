use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::features::FEATURE_COUNT;

/// One historical observation. Missing feature values are NaN in memory and
/// `null` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    #[serde(with = "nullable_row")]
    pub features: [f64; FEATURE_COUNT],
    pub actual_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Mean absolute error on the held-out split, in seconds.
    pub mae: f64,
    pub training_samples: usize,
    pub test_samples: usize,
    pub feature_importance: BTreeMap<String, f64>,
    pub trained_at: DateTime<Utc>,
    pub persisted: bool,
}

pub fn load_examples(path: &Path) -> Result<Vec<TrainingExample>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Shuffled (train, test) index split. The test side gets `ceil(n * ratio)`
/// rows, capped so at least one row is left for training.
pub fn train_test_split(n: usize, test_ratio: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx = (0..n).collect::<Vec<_>>();
    if n < 2 {
        return (idx, Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);
    let ratio = if test_ratio.is_finite() {
        test_ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let n_test = ((n as f64 * ratio).ceil() as usize).min(n - 1);
    let train = idx.split_off(n_test);
    (train, idx)
}

mod nullable_row {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::features::FEATURE_COUNT;

    pub fn serialize<S: Serializer>(row: &[f64; FEATURE_COUNT], ser: S) -> Result<S::Ok, S::Error> {
        row.iter()
            .map(|v| v.is_finite().then_some(*v))
            .collect::<Vec<_>>()
            .serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[f64; FEATURE_COUNT], D::Error> {
        let raw = Vec::<Option<f64>>::deserialize(de)?;
        if raw.len() != FEATURE_COUNT {
            return Err(D::Error::invalid_length(
                raw.len(),
                &"exactly six feature values",
            ));
        }
        let mut row = [f64::NAN; FEATURE_COUNT];
        for (slot, value) in row.iter_mut().zip(raw) {
            if let Some(v) = value {
                *slot = v;
            }
        }
        Ok(row)
    }
}
