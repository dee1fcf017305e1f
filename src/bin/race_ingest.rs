use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use gridcast::config::cache_dir;
use gridcast::race_store::{RaceSession, RaceStore};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let _ = dotenvy::dotenv();

    let inputs = parse_input_args();
    if inputs.is_empty() {
        return Err(anyhow!(
            "usage: race_ingest [--db <path>] <session.json|dir> [...]"
        ));
    }

    let db_path = parse_db_path_arg()
        .or_else(default_db_path)
        .context("unable to resolve sqlite path")?;
    let store = RaceStore::open(&db_path)
        .with_context(|| format!("open sqlite db {}", db_path.display()))?;

    let mut files = Vec::new();
    for input in &inputs {
        collect_json_files(input, &mut files)?;
    }
    files.sort();

    let mut sessions = 0usize;
    let mut qualifying_rows = 0usize;
    let mut lap_rows = 0usize;
    let mut result_rows = 0usize;
    let mut errors: Vec<String> = Vec::new();
    for file in &files {
        match ingest_file(&store, file) {
            Ok(summaries) => {
                for s in summaries {
                    sessions += 1;
                    qualifying_rows += s.qualifying_rows;
                    lap_rows += s.lap_rows;
                    result_rows += s.result_rows;
                }
            }
            Err(err) => {
                warn!(file = %file.display(), error = %err, "skipping dump");
                errors.push(format!("{}: {err:#}", file.display()));
            }
        }
    }

    println!("Race ingest complete");
    println!("DB: {}", db_path.display());
    println!("Files: {}/{}", files.len() - errors.len(), files.len());
    println!("Sessions upserted: {sessions}");
    println!(
        "Rows: qualifying={qualifying_rows} laps={lap_rows} results={result_rows}"
    );
    println!("Races stored: {}", store.race_count()?);
    if !errors.is_empty() {
        println!("errors: {}", errors.len());
        for err in errors.iter().take(6) {
            println!(" - {err}");
        }
    }
    Ok(())
}

/// A dump holds one session object or an array of them.
fn ingest_file(
    store: &RaceStore,
    path: &Path,
) -> Result<Vec<gridcast::race_store::SessionSummary>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw).context("parse json")?;
    let sessions: Vec<RaceSession> = if value.is_array() {
        serde_json::from_value(value).context("decode sessions")?
    } else {
        vec![serde_json::from_value(value).context("decode session")?]
    };
    let mut out = Vec::with_capacity(sessions.len());
    for session in &sessions {
        out.push(store.upsert_session(session).with_context(|| {
            format!("upsert {} round {}", session.season, session.round)
        })?);
    }
    Ok(out)
}

fn collect_json_files(path: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if path.is_dir() {
        for entry in fs::read_dir(path).with_context(|| format!("read dir {}", path.display()))? {
            let entry_path = entry?.path();
            if entry_path.extension().is_some_and(|ext| ext == "json") {
                out.push(entry_path);
            }
        }
    } else {
        out.push(path.to_path_buf());
    }
    Ok(())
}

fn default_db_path() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("GRIDCAST_DB_PATH")
        && !raw.trim().is_empty()
    {
        return Some(PathBuf::from(raw.trim()));
    }
    cache_dir().map(|dir| dir.join("race_data.sqlite"))
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db" {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}

fn parse_input_args() -> Vec<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--db" {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        out.push(PathBuf::from(arg));
    }
    out
}
