use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::features::FEATURE_NAMES;
use crate::gbm::{GbmParams, GradientBoostedTrees};
use crate::ridge::RidgeRegressor;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub samples: usize,
    pub train_mae: f64,
}

/// Capability contract for the regressor behind the overlay. Feature
/// importances are positional and follow the training column order.
pub trait BaseModel {
    fn train(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<FitSummary>;
    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>>;
    fn feature_importance(&self) -> Vec<f64>;
    fn is_trained(&self) -> bool;
    fn to_bytes(&self) -> Result<Vec<u8>>;
    fn from_bytes(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    Gbm,
    Ridge,
}

impl ModelKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gbm" | "gradient_boosting" | "gradient-boosting" => Some(Self::Gbm),
            "ridge" | "linear" => Some(Self::Ridge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Regressor {
    GradientBoosting(GradientBoostedTrees),
    Ridge(RidgeRegressor),
}

impl Regressor {
    pub fn untrained(kind: ModelKind, gbm: GbmParams, ridge_l2: f64) -> Self {
        match kind {
            ModelKind::Gbm => Self::GradientBoosting(GradientBoostedTrees::new(gbm)),
            ModelKind::Ridge => Self::Ridge(RidgeRegressor::new(ridge_l2)),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::GradientBoosting(_) => ModelKind::Gbm,
            Self::Ridge(_) => ModelKind::Ridge,
        }
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        match self {
            Self::GradientBoosting(m) => m.predict_row(row),
            Self::Ridge(m) => m.predict_row(row),
        }
    }
}

impl BaseModel for Regressor {
    fn train(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<FitSummary> {
        match self {
            Self::GradientBoosting(m) => m.fit(x, y)?,
            Self::Ridge(m) => m.fit(x, y)?,
        }
        let fitted = self.predict(x)?;
        Ok(FitSummary {
            samples: y.len(),
            train_mae: mean_absolute_error(y, &fitted),
        })
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        x.iter().map(|row| self.predict_row(row)).collect()
    }

    fn feature_importance(&self) -> Vec<f64> {
        match self {
            Self::GradientBoosting(m) if m.is_trained() => m.importances().to_vec(),
            Self::Ridge(m) if m.is_trained() => m.importances(),
            _ => vec![0.0; FEATURE_NAMES.len()],
        }
    }

    fn is_trained(&self) -> bool {
        match self {
            Self::GradientBoosting(m) => m.is_trained(),
            Self::Ridge(m) => m.is_trained(),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(EngineError::from)
    }
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != predicted.len() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

pub fn named_importance(scores: &[f64]) -> BTreeMap<String, f64> {
    FEATURE_NAMES
        .iter()
        .zip(scores)
        .map(|(name, score)| (name.to_string(), *score))
        .collect()
}

pub fn top_feature(importance: &BTreeMap<String, f64>) -> Option<(&str, f64)> {
    importance
        .iter()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best: Option<(&str, f64)>, (name, v)| match best {
            Some((_, b)) if b >= *v => best,
            _ => Some((name.as_str(), *v)),
        })
}
