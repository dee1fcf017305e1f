use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gridcast::artifact::ModelArtifact;
use chrono::Utc;

use gridcast::config::EngineConfig;
use gridcast::engine::DEGRADED_CONFIDENCE;
use gridcast::gbm::GbmParams;
use gridcast::imputer::MedianImputer;
use gridcast::model::{ModelKind, Regressor};
use gridcast::overlay::Weights;
use gridcast::race_data::StaticRaceData;
use gridcast::training::TrainingExample;
use gridcast::weather::NoWeather;
use gridcast::{EngineError, PredictionEngine, PredictionRequest};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gridcast-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn examples(n: usize, seed: u64) -> Vec<TrainingExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let quali = 70.0 + rng.r#gen::<f64>() * 3.0;
            let team = rng.r#gen::<f64>();
            let rain = if i % 3 == 0 { f64::NAN } else { rng.r#gen::<f64>() };
            TrainingExample {
                features: [quali, rain, 20.0, team, 93.0 + quali - 70.0, 0.0],
                actual_time: 5000.0 + quali * 5.0 - team * 30.0,
            }
        })
        .collect()
}

fn engine(config: EngineConfig) -> PredictionEngine {
    PredictionEngine::new(config, Arc::new(StaticRaceData::empty()), Arc::new(NoWeather))
}

#[test]
fn nine_examples_are_not_enough() {
    let engine = engine(EngineConfig::default());
    let err = engine.train(&examples(9, 1)).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData { got: 9, need: 10 }));
    assert!(engine.artifact().is_none());
}

#[test]
fn non_finite_targets_do_not_count() {
    let engine = engine(EngineConfig::default());
    let mut set = examples(10, 1);
    set[4].actual_time = f64::NAN;
    let err = engine.train(&set).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData { got: 9, .. }));
}

#[test]
fn ten_examples_train_with_positive_importance() {
    let engine = engine(EngineConfig::default());
    let report = engine.train(&examples(10, 2)).unwrap();
    assert_eq!(report.training_samples, 7);
    assert_eq!(report.test_samples, 3);
    assert_eq!(report.feature_importance.len(), 6);
    assert!(report.feature_importance.values().sum::<f64>() > 0.0);
    assert!(report.mae.is_finite());
    assert!(!report.persisted);

    let mut rng = StdRng::seed_from_u64(4);
    let prediction = engine
        .predict_with_rng(
            &PredictionRequest {
                season: 2025,
                venue: "Silverstone".to_string(),
                race_start: None,
                weights: Weights::default(),
            },
            &mut rng,
        )
        .unwrap();
    assert!(prediction.used_model);
    assert_eq!(prediction.model_confidence, 0.85);
    assert!(prediction.explanation.contains("Most important prediction factor"));
}

#[test]
fn failed_retrain_keeps_previous_model() {
    let engine = engine(EngineConfig::default());
    engine.train(&examples(12, 3)).unwrap();
    let before = engine.artifact().unwrap();
    assert!(engine.train(&examples(5, 3)).is_err());
    let after = engine.artifact().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[test]
fn saved_artifact_predicts_bit_for_bit() {
    let dir = scratch_dir("roundtrip");
    let path = dir.join("model.json");
    let config = EngineConfig {
        artifact_path: Some(path.clone()),
        ..EngineConfig::default()
    };
    let engine = engine(config);
    let set = examples(40, 5);
    let report = engine.train(&set).unwrap();
    assert!(report.persisted);

    let rows = set.iter().map(|e| e.features.to_vec()).collect::<Vec<_>>();
    let original = engine.artifact().unwrap();
    let loaded = ModelArtifact::load(&path).unwrap();
    let a = original.predict(&rows).unwrap();
    let b = loaded.predict(&rows).unwrap();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.to_bits(), y.to_bits());
    }

    let fresh = engine_with_artifact(&path);
    let reloaded = fresh.artifact().unwrap();
    assert_eq!(reloaded.trained_at, original.trained_at);
    let _ = fs::remove_dir_all(&dir);
}

fn engine_with_artifact(path: &std::path::Path) -> PredictionEngine {
    let engine = engine(EngineConfig::default());
    engine.load_artifact(path).unwrap();
    engine
}

#[test]
fn ridge_variant_round_trips_too() {
    let config = EngineConfig {
        model_kind: ModelKind::Ridge,
        ..EngineConfig::default()
    };
    let engine = engine(config);
    engine.train(&examples(30, 6)).unwrap();
    let artifact = engine.artifact().unwrap();
    let bytes = artifact.to_bytes().unwrap();
    let back = ModelArtifact::from_bytes(&bytes).unwrap();
    let rows = examples(5, 7)
        .iter()
        .map(|e| e.features.to_vec())
        .collect::<Vec<_>>();
    let a = artifact.predict(&rows).unwrap();
    let b = back.predict(&rows).unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
    assert_eq!(engine.model_status().model_kind, Some(ModelKind::Ridge));
}

#[test]
fn foreign_format_version_is_rejected_on_load() {
    let dir = scratch_dir("layout");
    let path = dir.join("model.json");
    let engine = engine(EngineConfig::default());
    engine.train(&examples(12, 8)).unwrap();
    let mut raw: serde_json::Value =
        serde_json::from_slice(&engine.artifact().unwrap().to_bytes().unwrap()).unwrap();
    raw["format_version"] = serde_json::json!(99);
    fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

    let other = self::engine(EngineConfig::default());
    let err = other.load_artifact(&path).unwrap_err();
    assert!(matches!(err, EngineError::ArtifactLayoutMismatch { .. }));
    assert!(other.artifact().is_none());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn persistence_failure_still_installs_model() {
    let dir = scratch_dir("blocked");
    let blocker = dir.join("not-a-dir");
    fs::write(&blocker, b"x").unwrap();
    let config = EngineConfig {
        artifact_path: Some(blocker.join("model.json")),
        ..EngineConfig::default()
    };
    let engine = engine(config);
    let report = engine.train(&examples(12, 9)).unwrap();
    assert!(!report.persisted);
    assert!(engine.model_status().model_loaded);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn training_set_parses_from_json() {
    let raw = r#"[
        {"features": [70.1, 0.1, 20.0, 0.9, 93.2, 1.0], "actual_time": 5400.5},
        {"features": [null, null, null, null, null, null], "actual_time": 5500.0}
    ]"#;
    let parsed: Vec<TrainingExample> = serde_json::from_str(raw).unwrap();
    assert_eq!(parsed.len(), 2);
    assert!(parsed[1].features.iter().all(|v| v.is_nan()));
}

fn silverstone() -> PredictionRequest {
    PredictionRequest {
        season: 2025,
        venue: "Silverstone".to_string(),
        race_start: None,
        weights: Weights::default(),
    }
}

#[test]
fn untrained_artifact_is_not_installed() {
    let engine = engine(EngineConfig::default());
    let blank = ModelArtifact::new(
        Regressor::untrained(ModelKind::Gbm, GbmParams::default(), 1.0),
        MedianImputer::new(),
        Utc::now(),
    );
    let err = engine.install_artifact(blank).unwrap_err();
    assert!(matches!(err, EngineError::NotFitted(_)));
    assert!(!engine.model_status().model_loaded);
}

#[test]
fn broken_model_degrades_to_heuristic() {
    let config = EngineConfig {
        model_kind: ModelKind::Ridge,
        ..EngineConfig::default()
    };
    let trained = engine(config.clone());
    trained.train(&examples(30, 11)).unwrap();
    let mut raw: serde_json::Value =
        serde_json::from_slice(&trained.artifact().unwrap().to_bytes().unwrap()).unwrap();
    raw["model"]["feature_stds"] = serde_json::json!(vec![0.0_f64; 6]);
    let broken = ModelArtifact::from_bytes(&serde_json::to_vec(&raw).unwrap()).unwrap();

    let engine = engine(config);
    engine.install_artifact(broken).unwrap();
    let mut rng = StdRng::seed_from_u64(12);
    let report = engine.predict_with_rng(&silverstone(), &mut rng).unwrap();
    assert!(!report.used_model);
    assert_eq!(report.model_confidence, DEGRADED_CONFIDENCE);
    assert!(report.predictions.iter().all(|p| p.predicted_time.is_finite()));
    assert!(
        report
            .explanation
            .starts_with("Using fallback predictions because the model produced non-finite times.")
    );
    assert!(report.explanation.ends_with('.'));
}

#[test]
fn predictions_run_alongside_retraining() {
    let engine = Arc::new(engine(EngineConfig::default()));
    engine.train(&examples(20, 13)).unwrap();

    let trainer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for seed in 0..5 {
                engine.train(&examples(20, 100 + seed)).unwrap();
            }
        })
    };

    for _ in 0..50 {
        let report = engine.predict(&silverstone()).unwrap();
        assert!(report.used_model);
        assert!(report.predictions.iter().all(|p| p.predicted_time.is_finite()));
    }
    trainer.join().unwrap();
    assert!(engine.model_status().model_loaded);
}
