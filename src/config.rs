use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::features::{EstimateTables, Roster};
use crate::gbm::GbmParams;
use crate::model::ModelKind;
use crate::overlay::{HeuristicParams, WeightOverlay};

const CACHE_DIR: &str = "gridcast";
const ARTIFACT_FILE: &str = "race_prediction_model.json";
const DB_FILE: &str = "race_data.sqlite";

pub const MIN_TRAINING_EXAMPLES: usize = 10;
pub const DEFAULT_TEST_RATIO: f64 = 0.3;
pub const DEFAULT_SPLIT_SEED: u64 = 37;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeatherSource {
    #[default]
    OpenMeteo,
    Off,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub artifact_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    /// Fixed seed for estimate jitter and chaos noise; `None` draws from entropy.
    pub seed: Option<u64>,
    pub model_kind: ModelKind,
    pub gbm: GbmParams,
    pub ridge_l2: f64,
    pub test_ratio: f64,
    pub split_seed: u64,
    pub weather: WeatherSource,
    pub tables: RaceTables,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_path: None,
            db_path: None,
            seed: None,
            model_kind: ModelKind::default(),
            gbm: GbmParams::default(),
            ridge_l2: 1.0,
            test_ratio: DEFAULT_TEST_RATIO,
            split_seed: DEFAULT_SPLIT_SEED,
            weather: WeatherSource::Off,
            tables: RaceTables::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let tables = match env_path("GRIDCAST_TABLES_PATH") {
            Some(path) => RaceTables::load(&path)?,
            None => RaceTables::default(),
        };
        let model_kind = match env::var("GRIDCAST_MODEL") {
            Ok(raw) => ModelKind::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unknown GRIDCAST_MODEL; using gbm");
                ModelKind::Gbm
            }),
            Err(_) => ModelKind::Gbm,
        };
        let weather = match env::var("GRIDCAST_WEATHER").ok().as_deref().map(str::trim) {
            Some("off") | Some("none") => WeatherSource::Off,
            _ => WeatherSource::OpenMeteo,
        };

        Ok(Self {
            artifact_path: env_path("GRIDCAST_ARTIFACT_PATH").or_else(|| cache_file(ARTIFACT_FILE)),
            db_path: env_path("GRIDCAST_DB_PATH").or_else(|| cache_file(DB_FILE)),
            seed: env::var("GRIDCAST_SEED")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok()),
            model_kind,
            weather,
            tables,
            ..Self::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceTables {
    pub roster: Roster,
    pub estimates: EstimateTables,
    pub overlay: WeightOverlay,
    pub heuristic: HeuristicParams,
}

impl RaceTables {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

pub fn cache_dir() -> Option<PathBuf> {
    // Prefer XDG cache.
    if let Ok(base) = env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

fn cache_file(name: &str) -> Option<PathBuf> {
    cache_dir().map(|dir| dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_tables_file_keeps_defaults() {
        let raw = r#"{"roster": [{"driver": "VER", "team": "Red Bull"}]}"#;
        let tables: RaceTables = serde_json::from_str(raw).unwrap();
        assert_eq!(tables.roster.len(), 1);
        assert_eq!(tables.estimates.default_team_score, 0.5);
        assert_eq!(tables.heuristic.race_overhead, 20.0);
    }
}
