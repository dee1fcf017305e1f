use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

use gridcast::config::EngineConfig;
use gridcast::gbm::{GbmParams, GradientBoostedTrees};
use gridcast::overlay::Weights;
use gridcast::race_data::{StaticRaceData, clean_air_pace};
use gridcast::training::TrainingExample;
use gridcast::weather::NoWeather;
use gridcast::{PredictionEngine, PredictionRequest};

fn synthetic_examples(n: usize, seed: u64) -> Vec<TrainingExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let quali = 70.0 + rng.r#gen::<f64>() * 3.0;
            let rain = rng.r#gen::<f64>();
            let team = rng.r#gen::<f64>();
            let pace = 93.0 + rng.r#gen::<f64>() * 3.0;
            TrainingExample {
                features: [quali, rain, 18.0 + rain * 10.0, team, pace, rng.r#gen::<f64>() * 4.0 - 2.0],
                actual_time: 5300.0 + quali * 2.0 + pace * 1.5 - team * 40.0 + rain * 60.0,
            }
        })
        .collect()
}

fn engine() -> PredictionEngine {
    PredictionEngine::new(
        EngineConfig::default(),
        Arc::new(StaticRaceData::empty()),
        Arc::new(NoWeather),
    )
}

fn request() -> PredictionRequest {
    PredictionRequest {
        season: 2025,
        venue: "Monaco".to_string(),
        race_start: None,
        weights: Weights {
            chaos_mode: true,
            ..Weights::default()
        },
    }
}

fn bench_predict_heuristic(c: &mut Criterion) {
    let engine = engine();
    let req = request();
    c.bench_function("predict_heuristic", |b| {
        let mut rng = StdRng::seed_from_u64(7);
        b.iter(|| {
            let report = engine.predict_with_rng(black_box(&req), &mut rng).unwrap();
            black_box(report.predictions.len());
        })
    });
}

fn bench_predict_trained(c: &mut Criterion) {
    let engine = engine();
    engine.train(&synthetic_examples(400, 11)).unwrap();
    let req = request();
    c.bench_function("predict_trained", |b| {
        let mut rng = StdRng::seed_from_u64(7);
        b.iter(|| {
            let report = engine.predict_with_rng(black_box(&req), &mut rng).unwrap();
            black_box(report.predictions.len());
        })
    });
}

fn bench_gbm_fit(c: &mut Criterion) {
    let examples = synthetic_examples(400, 3);
    let x = examples.iter().map(|e| e.features.to_vec()).collect::<Vec<_>>();
    let y = examples.iter().map(|e| e.actual_time).collect::<Vec<_>>();
    c.bench_function("gbm_fit_400", |b| {
        b.iter(|| {
            let mut model = GradientBoostedTrees::new(GbmParams::default());
            model.fit(black_box(&x), black_box(&y)).unwrap();
            black_box(model.n_trees());
        })
    });
}

fn bench_clean_air_pace(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(5);
    let laps = (0..78)
        .map(|_| 76.0 + rng.r#gen::<f64>() * 4.0)
        .collect::<Vec<_>>();
    c.bench_function("clean_air_pace_78_laps", |b| {
        b.iter(|| black_box(clean_air_pace(black_box(&laps))))
    });
}

criterion_group!(
    perf,
    bench_predict_heuristic,
    bench_predict_trained,
    bench_gbm_fit,
    bench_clean_air_pace
);
criterion_main!(perf);
