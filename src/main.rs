use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Datelike, NaiveDateTime, Utc};
use tracing_subscriber::EnvFilter;

use gridcast::config::EngineConfig;
use gridcast::overlay::Weights;
use gridcast::race_store::RaceStore;
use gridcast::training::load_examples;
use gridcast::{PredictionEngine, PredictionRequest};

const USAGE: &str = "usage:
  gridcast predict --venue <name> [--season <year>] [--start <YYYY-MM-DDTHH:MM>] [--weights <file.json>] [--json]
  gridcast train [--examples <file.json>]
  gridcast status";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(command) = args.first().cloned() else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = EngineConfig::from_env().context("load configuration")?;
    let engine = PredictionEngine::from_config(config);

    match command.as_str() {
        "predict" => predict(&engine, &args),
        "train" => train(&engine, &args),
        "status" => status(&engine),
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

fn predict(engine: &PredictionEngine, args: &[String]) -> Result<()> {
    let venue = arg_value(args, "--venue").ok_or_else(|| anyhow!("--venue is required"))?;
    let season = match arg_value(args, "--season") {
        Some(raw) => raw
            .parse::<i32>()
            .with_context(|| format!("invalid --season {raw:?}"))?,
        None => Utc::now().year(),
    };
    let race_start = match arg_value(args, "--start") {
        Some(raw) => Some(
            NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M")
                .with_context(|| format!("invalid --start {raw:?}"))?,
        ),
        None => None,
    };
    let weights = match arg_value(args, "--weights") {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("read weights {path}"))?;
            Weights::from_json(&raw)?
        }
        None => Weights::default(),
    };

    let report = engine.predict(&PredictionRequest {
        season,
        venue: venue.clone(),
        race_start,
        weights,
    })?;

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{venue} {season}");
    println!(
        "Weather: {} {:.1}C rain {:.0}%{}",
        report.weather.condition,
        report.weather.temperature_c,
        report.weather.precipitation_prob * 100.0,
        if report.weather_is_fallback { " (fallback)" } else { "" }
    );
    println!(
        "Model: {} confidence={:.2}",
        if report.used_model { "trained" } else { "heuristic" },
        report.model_confidence
    );
    for (pos, row) in report.predictions.iter().enumerate() {
        println!(
            "{:>2}. {:<4} {:<14} {:>10.3}  win={:.2} podium={:.2}",
            pos + 1,
            row.driver,
            row.team,
            row.predicted_time,
            row.win_probability,
            row.podium_probability
        );
    }
    println!("{}", report.explanation);
    Ok(())
}

fn train(engine: &PredictionEngine, args: &[String]) -> Result<()> {
    let examples = match arg_value(args, "--examples") {
        Some(path) => {
            load_examples(&PathBuf::from(&path)).with_context(|| format!("load examples {path}"))?
        }
        None => {
            let db_path = engine
                .config()
                .db_path
                .clone()
                .context("no --examples file and no race database configured")?;
            let store = RaceStore::open(&db_path)
                .with_context(|| format!("open race store {}", db_path.display()))?;
            store.training_examples(&engine.config().tables.estimates)?
        }
    };

    let report = engine.train(&examples)?;
    println!("Training complete");
    println!(
        "Samples: train={} test={}",
        report.training_samples, report.test_samples
    );
    println!("MAE: {:.3}s", report.mae);
    println!("Persisted: {}", report.persisted);
    let mut ranked = report.feature_importance.iter().collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.total_cmp(a.1));
    for (name, score) in ranked {
        println!("  {name:<24} {score:.3}");
    }
    Ok(())
}

fn status(engine: &PredictionEngine) -> Result<()> {
    let status = engine.model_status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}
