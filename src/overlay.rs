use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::features::FeatureVector;
use crate::jitter::gaussian;

/// Each strength lives in [0, 1]; they need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Weights {
    pub track_suitability: f64,
    pub clean_air_pace: f64,
    pub qualifying_importance: f64,
    pub team_form: f64,
    pub weather_impact: f64,
    pub chaos_mode: bool,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            track_suitability: 0.85,
            clean_air_pace: 0.90,
            qualifying_importance: 0.85,
            team_form: 0.68,
            weather_impact: 0.45,
            chaos_mode: false,
        }
    }
}

impl Weights {
    pub fn zero() -> Self {
        Self {
            track_suitability: 0.0,
            clean_air_pace: 0.0,
            qualifying_importance: 0.0,
            team_form: 0.0,
            weather_impact: 0.0,
            chaos_mode: false,
        }
    }

    pub fn from_json_value(value: Value) -> Result<Self> {
        let weights: Weights = serde_json::from_value(value)
            .map_err(|err| EngineError::InvalidWeights(err.to_string()))?;
        weights.validate()?;
        Ok(weights)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| EngineError::InvalidWeights(err.to_string()))?;
        Self::from_json_value(value)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.strengths() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidWeights(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn strengths(&self) -> [(&'static str, f64); 5] {
        [
            ("track_suitability", self.track_suitability),
            ("clean_air_pace", self.clean_air_pace),
            ("qualifying_importance", self.qualifying_importance),
            ("team_form", self.team_form),
            ("weather_impact", self.weather_impact),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceScale {
    pub mean: f64,
    pub std: f64,
}

impl ReferenceScale {
    pub const IDENTITY: Self = Self { mean: 0.0, std: 1.0 };

    pub fn z_score(&self, value: f64) -> f64 {
        if self.std == 0.0 {
            return 0.0;
        }
        (value - self.mean) / self.std
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayReference {
    pub average_position_change: ReferenceScale,
    pub clean_air_pace: ReferenceScale,
    pub qualifying_time: ReferenceScale,
    pub team_performance_score: ReferenceScale,
    pub rain_probability: ReferenceScale,
}

impl Default for OverlayReference {
    fn default() -> Self {
        Self {
            average_position_change: ReferenceScale::IDENTITY,
            clean_air_pace: ReferenceScale::IDENTITY,
            qualifying_time: ReferenceScale::IDENTITY,
            team_performance_score: ReferenceScale::IDENTITY,
            rain_probability: ReferenceScale::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicParams {
    /// Seconds added to a qualifying lap to approximate a race time.
    pub race_overhead: f64,
    pub rain_coefficient: f64,
}

impl Default for HeuristicParams {
    fn default() -> Self {
        Self {
            race_overhead: 20.0,
            rain_coefficient: 0.1,
        }
    }
}

impl HeuristicParams {
    pub fn time_for(&self, fv: &FeatureVector) -> f64 {
        (fv.qualifying_time + self.race_overhead)
            * (2.0 - fv.team_performance_score)
            * (1.0 + fv.rain_probability * self.rain_coefficient)
    }

    pub fn times(&self, features: &[FeatureVector]) -> Vec<f64> {
        features.iter().map(|fv| self.time_for(fv)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightOverlay {
    pub reference: OverlayReference,
    pub coefficient: f64,
    pub chaos_sd: f64,
}

impl Default for WeightOverlay {
    fn default() -> Self {
        Self {
            reference: OverlayReference::default(),
            coefficient: 0.1,
            chaos_sd: 2.0,
        }
    }
}

impl WeightOverlay {
    pub fn adjustment(&self, fv: &FeatureVector, weights: &Weights) -> f64 {
        let r = &self.reference;
        let terms = [
            (
                weights.track_suitability,
                r.average_position_change.z_score(fv.average_position_change),
            ),
            (weights.clean_air_pace, r.clean_air_pace.z_score(fv.clean_air_pace)),
            (
                weights.qualifying_importance,
                r.qualifying_time.z_score(fv.qualifying_time),
            ),
            (
                weights.team_form,
                r.team_performance_score.z_score(fv.team_performance_score),
            ),
            (
                weights.weather_impact,
                r.rain_probability.z_score(fv.rain_probability),
            ),
        ];
        terms
            .iter()
            .filter(|(w, _)| *w != 0.0)
            .map(|(w, z)| w * z * self.coefficient)
            .sum()
    }

    /// Chaos noise is drawn in input order.
    pub fn adjust<R: Rng + ?Sized>(
        &self,
        raw_times: &[f64],
        features: &[FeatureVector],
        weights: &Weights,
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        if raw_times.len() != features.len() {
            return Err(EngineError::FeatureMismatch {
                expected: features.len(),
                got: raw_times.len(),
            });
        }
        Ok(raw_times
            .iter()
            .zip(features)
            .map(|(raw, fv)| {
                let mut t = raw + self.adjustment(fv, weights);
                if weights.chaos_mode {
                    t += gaussian(rng, self.chaos_sd);
                }
                t
            })
            .collect())
    }
}
