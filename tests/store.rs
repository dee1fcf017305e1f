use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use gridcast::config::EngineConfig;
use gridcast::features::{EstimateTables, Roster};
use gridcast::overlay::Weights;
use gridcast::race_store::{RaceSession, RaceStore};
use gridcast::weather::NoWeather;
use gridcast::{PredictionEngine, PredictionRequest};

const DRIVERS: [(&str, &str); 4] = [
    ("LEC", "Ferrari"),
    ("PIA", "McLaren"),
    ("SAI", "Ferrari"),
    ("NOR", "McLaren"),
];

fn session(season: i32, round: u32, venue: &str) -> RaceSession {
    let qualifying = DRIVERS
        .iter()
        .enumerate()
        .map(|(i, (driver, team))| {
            serde_json::json!({
                "driver": driver, "team": team,
                "q1": 71.5 + i as f64 * 0.2, "q3": 70.2 + i as f64 * 0.15
            })
        })
        .collect::<Vec<_>>();
    let laps = DRIVERS
        .iter()
        .enumerate()
        .flat_map(|(i, (driver, _))| {
            (1..=12).map(move |lap| {
                let time = if lap == 1 { 82.0 } else { 76.0 + i as f64 * 0.1 };
                serde_json::json!({"driver": driver, "lap": lap, "time": time})
            })
        })
        .collect::<Vec<_>>();
    let results = DRIVERS
        .iter()
        .enumerate()
        .map(|(i, (driver, team))| {
            serde_json::json!({
                "driver": driver, "team": team,
                "grid": i + 1, "finish": (i + 2) % 4 + 1,
                "race_time": 6000.0 + season as f64 + i as f64 * 3.5
            })
        })
        .collect::<Vec<_>>();
    serde_json::from_value(serde_json::json!({
        "season": season,
        "round": round,
        "venue": venue,
        "weather": {"rain_probability": 0.2, "temperature": 23.0},
        "qualifying": qualifying,
        "laps": laps,
        "results": results
    }))
    .unwrap()
}

#[test]
fn stored_history_drives_features() {
    let store = RaceStore::open_in_memory().unwrap();
    store.upsert_session(&session(2025, 8, "Monaco")).unwrap();

    let mut config = EngineConfig::default();
    config.tables.roster = Roster::from_pairs(DRIVERS);
    let engine = PredictionEngine::new(config, Arc::new(store), Arc::new(NoWeather));
    let mut rng = StdRng::seed_from_u64(10);
    let report = engine
        .predict_with_rng(
            &PredictionRequest {
                season: 2025,
                venue: "Monaco".to_string(),
                race_start: None,
                weights: Weights::zero(),
            },
            &mut rng,
        )
        .unwrap();

    let lec = report.features.iter().find(|f| f.driver == "LEC").unwrap();
    assert_eq!(lec.features.qualifying_time, 70.2);
    assert_eq!(lec.features.clean_air_pace, 76.0);
    // grid 1, finish 3
    assert_eq!(lec.features.average_position_change, -2.0);
}

#[test]
fn stored_results_become_training_examples() {
    let store = RaceStore::open_in_memory().unwrap();
    for (season, venue) in [(2022, "Monaco"), (2023, "Monaco"), (2024, "Monza")] {
        store.upsert_session(&session(season, 7, venue)).unwrap();
    }
    assert_eq!(store.race_count().unwrap(), 3);

    let examples = store.training_examples(&EstimateTables::default()).unwrap();
    assert_eq!(examples.len(), 12);
    assert!(examples.iter().all(|e| e.actual_time > 6000.0));
    assert!(examples.iter().all(|e| e.features[0].is_finite()));

    let engine = PredictionEngine::new(
        EngineConfig::default(),
        Arc::new(RaceStore::open_in_memory().unwrap()),
        Arc::new(NoWeather),
    );
    let report = engine.train(&examples).unwrap();
    assert_eq!(report.training_samples + report.test_samples, 12);
}
