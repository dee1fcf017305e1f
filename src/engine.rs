use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{ModelArtifact, current_layout_fingerprint};
use crate::config::{EngineConfig, MIN_TRAINING_EXAMPLES, WeatherSource};
use crate::error::{EngineError, Result};
use crate::features::{FEATURE_NAMES, FeatureBuilder, FeatureVector, RaceSignals};
use crate::imputer::MedianImputer;
use crate::model::{BaseModel, ModelKind, Regressor, mean_absolute_error, named_importance};
use crate::overlay::Weights;
use crate::race_data::{RaceDataProvider, StaticRaceData};
use crate::race_store::RaceStore;
use crate::ranking::{Competitor, PredictionResult, explain, rank};
use crate::training::{TrainingExample, TrainingReport, train_test_split};
use crate::weather::{NoWeather, OpenMeteoProvider, WeatherProvider, WeatherSnapshot};

pub const MODEL_CONFIDENCE: f64 = 0.85;
pub const HEURISTIC_CONFIDENCE: f64 = 0.45;
pub const DEGRADED_CONFIDENCE: f64 = 0.30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub season: i32,
    pub venue: String,
    #[serde(default)]
    pub race_start: Option<NaiveDateTime>,
    #[serde(default)]
    pub weights: Weights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorFeatures {
    pub driver: String,
    pub team: String,
    pub features: FeatureVector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    pub predictions: Vec<PredictionResult>,
    /// Empty when no model is loaded.
    pub feature_importance: BTreeMap<String, f64>,
    pub model_confidence: f64,
    pub explanation: String,
    pub weather: WeatherSnapshot,
    pub weather_is_fallback: bool,
    pub used_model: bool,
    /// Built features in roster order, skipped competitors excluded.
    pub features: Vec<CompetitorFeatures>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_loaded: bool,
    pub model_kind: Option<ModelKind>,
    pub feature_names: Vec<String>,
    pub layout_fingerprint: String,
    pub competitors: usize,
    pub teams: usize,
    pub trained_at: Option<DateTime<Utc>>,
    pub mae: Option<f64>,
    pub training_samples: usize,
}

/// Predictions read an `Arc` snapshot of the artifact; training swaps in a
/// finished one.
pub struct PredictionEngine {
    config: EngineConfig,
    builder: FeatureBuilder,
    race_data: Arc<dyn RaceDataProvider>,
    weather: Arc<dyn WeatherProvider>,
    artifact: RwLock<Option<Arc<ModelArtifact>>>,
    seeds: Mutex<StdRng>,
}

impl PredictionEngine {
    pub fn new(
        config: EngineConfig,
        race_data: Arc<dyn RaceDataProvider>,
        weather: Arc<dyn WeatherProvider>,
    ) -> Self {
        let seeds = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            builder: FeatureBuilder::new(config.tables.estimates.clone()),
            config,
            race_data,
            weather,
            artifact: RwLock::new(None),
            seeds: Mutex::new(seeds),
        }
    }

    pub fn from_config(config: EngineConfig) -> Self {
        let race_data: Arc<dyn RaceDataProvider> = match config.db_path.as_deref() {
            Some(path) => match RaceStore::open(path) {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "race store unavailable; using empty history");
                    Arc::new(StaticRaceData::empty())
                }
            },
            None => Arc::new(StaticRaceData::empty()),
        };
        let weather: Arc<dyn WeatherProvider> = match config.weather {
            WeatherSource::OpenMeteo => Arc::new(OpenMeteoProvider),
            WeatherSource::Off => Arc::new(NoWeather),
        };

        let artifact_path = config.artifact_path.clone();
        let engine = Self::new(config, race_data, weather);
        if let Some(path) = artifact_path
            && path.exists()
            && let Err(err) = engine.load_artifact(&path)
        {
            warn!(path = %path.display(), error = %err, "ignoring persisted model");
        }
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionReport> {
        let seed = self.seeds.lock().r#gen::<u64>();
        let mut rng = StdRng::seed_from_u64(seed);
        self.predict_with_rng(request, &mut rng)
    }

    /// Estimate jitter is drawn first (roster order), then chaos noise.
    pub fn predict_with_rng<R: Rng + ?Sized>(
        &self,
        request: &PredictionRequest,
        rng: &mut R,
    ) -> Result<PredictionReport> {
        request.weights.validate()?;
        let venue = request.venue.as_str();

        let pace_history = self.history("pace", || {
            self.race_data.pace_history(request.season, venue)
        });
        let qualifying_history = self.history("qualifying", || {
            self.race_data.qualifying_history(request.season, venue)
        });
        let position_change_history = self.history("position change", || {
            self.race_data.position_change_history(venue)
        });
        let (weather, weather_is_fallback) = self.weather_for(venue, request.race_start);

        let signals = RaceSignals {
            venue,
            weather: &weather,
            pace_history: &pace_history,
            qualifying_history: &qualifying_history,
            position_change_history: &position_change_history,
        };

        let mut competitors = Vec::new();
        let mut features = Vec::new();
        for entry in self.config.tables.roster.entries() {
            let team = Some(entry.team.as_str()).filter(|t| !t.trim().is_empty());
            match self.builder.build(&entry.driver, team, &signals, rng) {
                Ok(fv) => {
                    competitors.push(Competitor {
                        driver: entry.driver.clone(),
                        team: entry.team.clone(),
                    });
                    features.push(fv);
                }
                Err(err) => warn!(driver = %entry.driver, error = %err, "skipping competitor"),
            }
        }

        let artifact = self.artifact.read().clone();
        let mut fallback_reason = None;
        let (raw_times, used_model, model_confidence) = match artifact.as_deref() {
            Some(artifact) => {
                let rows = features.iter().map(|fv| fv.to_row().to_vec()).collect::<Vec<_>>();
                match artifact.predict(&rows) {
                    Ok(times) if times.iter().all(|t| t.is_finite()) => {
                        (times, true, MODEL_CONFIDENCE)
                    }
                    Ok(_) => {
                        warn!("model produced non-finite times; using heuristic");
                        fallback_reason = Some("the model produced non-finite times".to_string());
                        (self.heuristic_times(&features), false, DEGRADED_CONFIDENCE)
                    }
                    Err(err) => {
                        warn!(error = %err, "model prediction failed; using heuristic");
                        fallback_reason = Some(format!("the model failed: {err}"));
                        (self.heuristic_times(&features), false, DEGRADED_CONFIDENCE)
                    }
                }
            }
            None => (self.heuristic_times(&features), false, HEURISTIC_CONFIDENCE),
        };

        let adjusted =
            self.config
                .tables
                .overlay
                .adjust(&raw_times, &features, &request.weights, rng)?;
        let predictions = rank(&competitors, &adjusted);

        let feature_importance = artifact
            .as_deref()
            .map(|a| named_importance(&a.model.feature_importance()))
            .unwrap_or_default();
        let mut explanation = explain(&request.weights, request.race_start, &feature_importance);
        if let Some(reason) = fallback_reason {
            explanation = format!("Using fallback predictions because {reason}. {explanation}");
        }

        info!(
            venue,
            season = request.season,
            competitors = predictions.len(),
            used_model,
            weather_is_fallback,
            "prediction complete"
        );

        Ok(PredictionReport {
            predictions,
            feature_importance,
            model_confidence,
            explanation,
            weather,
            weather_is_fallback,
            used_model,
            features: competitors
                .into_iter()
                .zip(features)
                .map(|(c, fv)| CompetitorFeatures {
                    driver: c.driver,
                    team: c.team,
                    features: fv,
                })
                .collect(),
        })
    }

    /// On error the installed artifact is left in place.
    pub fn train(&self, examples: &[TrainingExample]) -> Result<TrainingReport> {
        let usable = examples
            .iter()
            .filter(|ex| ex.actual_time.is_finite())
            .collect::<Vec<_>>();
        if usable.len() < examples.len() {
            debug!(
                dropped = examples.len() - usable.len(),
                "dropping examples without a finite race time"
            );
        }
        if usable.len() < MIN_TRAINING_EXAMPLES {
            return Err(EngineError::InsufficientData {
                got: usable.len(),
                need: MIN_TRAINING_EXAMPLES,
            });
        }

        let rows = usable.iter().map(|ex| ex.features.to_vec()).collect::<Vec<_>>();
        let targets = usable.iter().map(|ex| ex.actual_time).collect::<Vec<_>>();
        let imputer = MedianImputer::fit(&rows)?;
        let filled = imputer.transform(&rows)?;

        let (train_idx, test_idx) =
            train_test_split(filled.len(), self.config.test_ratio, self.config.split_seed);
        let pick_x = |idx: &[usize]| idx.iter().map(|&i| filled[i].clone()).collect::<Vec<_>>();
        let pick_y = |idx: &[usize]| idx.iter().map(|&i| targets[i]).collect::<Vec<_>>();
        let (x_train, y_train) = (pick_x(&train_idx), pick_y(&train_idx));
        let (x_test, y_test) = (pick_x(&test_idx), pick_y(&test_idx));

        let mut model =
            Regressor::untrained(self.config.model_kind, self.config.gbm, self.config.ridge_l2);
        let fit = model.train(&x_train, &y_train)?;
        let mae = if x_test.is_empty() {
            fit.train_mae
        } else {
            mean_absolute_error(&y_test, &model.predict(&x_test)?)
        };

        let mut artifact = ModelArtifact::new(model, imputer, Utc::now());
        artifact.mae = mae;
        artifact.training_samples = x_train.len();
        artifact.test_samples = x_test.len();

        let persisted = match self.config.artifact_path.as_deref() {
            Some(path) => match artifact.save(path) {
                Ok(()) => true,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to persist model");
                    false
                }
            },
            None => false,
        };

        let report = TrainingReport {
            mae,
            training_samples: artifact.training_samples,
            test_samples: artifact.test_samples,
            feature_importance: named_importance(&artifact.model.feature_importance()),
            trained_at: artifact.trained_at,
            persisted,
        };
        *self.artifact.write() = Some(Arc::new(artifact));

        info!(
            mae = report.mae,
            training_samples = report.training_samples,
            test_samples = report.test_samples,
            persisted,
            "model trained"
        );
        Ok(report)
    }

    pub fn reset(&self) {
        *self.artifact.write() = None;
        info!("model reset");
    }

    pub fn feature_importance(&self) -> BTreeMap<String, f64> {
        self.artifact
            .read()
            .as_deref()
            .map(|a| named_importance(&a.model.feature_importance()))
            .unwrap_or_default()
    }

    pub fn model_status(&self) -> ModelStatus {
        let artifact = self.artifact.read().clone();
        let roster = &self.config.tables.roster;
        ModelStatus {
            model_loaded: artifact.is_some(),
            model_kind: artifact.as_deref().map(|a| a.model.kind()),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            layout_fingerprint: current_layout_fingerprint(),
            competitors: roster.len(),
            teams: roster.team_count(),
            trained_at: artifact.as_deref().map(|a| a.trained_at),
            mae: artifact.as_deref().map(|a| a.mae),
            training_samples: artifact.as_deref().map_or(0, |a| a.training_samples),
        }
    }

    pub fn load_artifact(&self, path: &Path) -> Result<()> {
        let artifact = ModelArtifact::load(path)?;
        info!(path = %path.display(), trained_at = %artifact.trained_at, "model loaded");
        self.install_artifact(artifact)
    }

    pub fn install_artifact(&self, artifact: ModelArtifact) -> Result<()> {
        artifact.check_layout()?;
        *self.artifact.write() = Some(Arc::new(artifact));
        Ok(())
    }

    pub fn artifact(&self) -> Option<Arc<ModelArtifact>> {
        self.artifact.read().clone()
    }

    fn heuristic_times(&self, features: &[FeatureVector]) -> Vec<f64> {
        self.config.tables.heuristic.times(features)
    }

    fn history<F>(&self, what: &str, fetch: F) -> HashMap<String, f64>
    where
        F: FnOnce() -> Result<HashMap<String, f64>>,
    {
        fetch().unwrap_or_else(|err| {
            warn!(signal = what, error = %err, "race data unavailable; estimating");
            HashMap::new()
        })
    }

    fn weather_for(&self, venue: &str, race_start: Option<NaiveDateTime>) -> (WeatherSnapshot, bool) {
        let Some(at) = race_start else {
            return (WeatherSnapshot::fallback(), true);
        };
        match self.weather.forecast(venue, at) {
            Ok(Some(snapshot)) => (snapshot, false),
            Ok(None) => {
                debug!(venue, "no forecast; using fallback weather");
                (WeatherSnapshot::fallback(), true)
            }
            Err(err) => {
                warn!(venue, error = %err, "weather unavailable; using fallback");
                (WeatherSnapshot::fallback(), true)
            }
        }
    }
}
