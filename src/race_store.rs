use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::features::{EstimateTables, FeatureVector};
use crate::race_data::{
    RaceDataProvider, average_position_change, best_qualifying_time, clean_air_pace,
    parse_lap_time,
};
use crate::training::TrainingExample;

/// A lap or session time as it appears in dumps: seconds or "m:ss.sss".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTime {
    Seconds(f64),
    Text(String),
}

impl RawTime {
    pub fn seconds(&self) -> Option<f64> {
        match self {
            Self::Seconds(s) => Some(*s).filter(|s| s.is_finite() && *s > 0.0),
            Self::Text(raw) => parse_lap_time(raw),
        }
    }
}

fn seconds(raw: &Option<RawTime>) -> Option<f64> {
    raw.as_ref().and_then(RawTime::seconds)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionWeather {
    pub rain_probability: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifyingEntry {
    pub driver: String,
    pub team: String,
    #[serde(default)]
    pub q1: Option<RawTime>,
    #[serde(default)]
    pub q2: Option<RawTime>,
    #[serde(default)]
    pub q3: Option<RawTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapEntry {
    pub driver: String,
    pub lap: u32,
    pub time: Option<RawTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub driver: String,
    pub team: String,
    pub grid: u32,
    /// `None` when not classified.
    #[serde(default)]
    pub finish: Option<u32>,
    #[serde(default)]
    pub race_time: Option<RawTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSession {
    pub season: i32,
    pub round: u32,
    pub venue: String,
    #[serde(default)]
    pub race_date: Option<String>,
    #[serde(default)]
    pub weather: SessionWeather,
    #[serde(default)]
    pub qualifying: Vec<QualifyingEntry>,
    #[serde(default)]
    pub laps: Vec<LapEntry>,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub qualifying_rows: usize,
    pub lap_rows: usize,
    pub result_rows: usize,
}

pub struct RaceStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for RaceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceStore").field("path", &self.path).finish()
    }
}

impl RaceStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Replaces everything stored for the session's (season, round).
    pub fn upsert_session(&self, session: &RaceSession) -> Result<SessionSummary> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let season = session.season as i64;
        let round = session.round as i64;

        tx.execute(
            r#"
            INSERT INTO races (season, round, venue, race_date, rain_probability, temperature, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(season, round) DO UPDATE SET
                venue = excluded.venue,
                race_date = excluded.race_date,
                rain_probability = excluded.rain_probability,
                temperature = excluded.temperature,
                updated_at = excluded.updated_at
            "#,
            params![
                season,
                round,
                session.venue,
                session.race_date,
                session.weather.rain_probability,
                session.weather.temperature,
                Utc::now().to_rfc3339(),
            ],
        )?;
        for table in ["qualifying", "race_laps", "results"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE season = ?1 AND round = ?2"),
                params![season, round],
            )?;
        }

        let mut summary = SessionSummary::default();
        for q in &session.qualifying {
            tx.execute(
                "INSERT OR REPLACE INTO qualifying (season, round, driver, team, q1, q2, q3)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    season,
                    round,
                    q.driver,
                    q.team,
                    seconds(&q.q1),
                    seconds(&q.q2),
                    seconds(&q.q3),
                ],
            )?;
            summary.qualifying_rows += 1;
        }
        for lap in &session.laps {
            let Some(time) = seconds(&lap.time) else {
                continue;
            };
            tx.execute(
                "INSERT OR REPLACE INTO race_laps (season, round, driver, lap, lap_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![season, round, lap.driver, lap.lap as i64, time],
            )?;
            summary.lap_rows += 1;
        }
        for r in &session.results {
            tx.execute(
                "INSERT OR REPLACE INTO results (season, round, driver, team, grid, finish, race_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    season,
                    round,
                    r.driver,
                    r.team,
                    r.grid as i64,
                    r.finish.map(|f| f as i64),
                    seconds(&r.race_time),
                ],
            )?;
            summary.result_rows += 1;
        }
        tx.commit()?;
        Ok(summary)
    }

    pub fn race_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM races", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// One example per result with a recorded race time. Pace and position
    /// change come only from earlier races at the venue, as they would at
    /// prediction time. Missing signals are left as NaN for the imputer.
    pub fn training_examples(&self, tables: &EstimateTables) -> Result<Vec<TrainingExample>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT r.season, r.round, ra.venue, r.driver, r.team, r.race_time,
                   ra.rain_probability, ra.temperature
            FROM results r
            JOIN races ra ON ra.season = r.season AND ra.round = r.round
            WHERE r.race_time IS NOT NULL
            ORDER BY r.season ASC, r.round ASC, r.driver ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredResult {
                    season: row.get(0)?,
                    round: row.get(1)?,
                    venue: row.get(2)?,
                    driver: row.get(3)?,
                    team: row.get(4)?,
                    race_time: row.get(5)?,
                    rain_probability: row.get(6)?,
                    temperature: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut quali_cache: HashMap<(i64, i64), HashMap<String, f64>> = HashMap::new();
        let mut prior_cache: HashMap<(i64, i64), PriorSignals> = HashMap::new();

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let key = (r.season, r.round);
            if !quali_cache.contains_key(&key) {
                quali_cache.insert(key, qualifying_for_round(&conn, r.season, r.round)?);
            }
            if !prior_cache.contains_key(&key) {
                prior_cache.insert(key, prior_signals(&conn, &r.venue, r.season, r.round)?);
            }
            let lookup = |map: Option<&HashMap<String, f64>>| {
                map.and_then(|m| m.get(&r.driver).copied())
                    .unwrap_or(f64::NAN)
            };
            let prior = prior_cache.get(&key);
            let fv = FeatureVector {
                qualifying_time: lookup(quali_cache.get(&key)),
                rain_probability: r.rain_probability.unwrap_or(f64::NAN),
                temperature: r.temperature.unwrap_or(f64::NAN),
                team_performance_score: tables.team_score(&r.team),
                clean_air_pace: lookup(prior.map(|p| &p.pace)),
                average_position_change: lookup(prior.map(|p| &p.position_change)),
            };
            out.push(TrainingExample {
                features: fv.to_row(),
                actual_time: r.race_time,
            });
        }
        Ok(out)
    }
}

struct PriorSignals {
    pace: HashMap<String, f64>,
    position_change: HashMap<String, f64>,
}

/// Signals known before (season, round): pace from the most recent earlier
/// race at `venue`, position change over all earlier results there.
fn prior_signals(conn: &Connection, venue: &str, season: i64, round: i64) -> Result<PriorSignals> {
    let previous = conn
        .query_row(
            r#"
            SELECT season, round FROM races
            WHERE venue = ?1 AND (season < ?2 OR (season = ?2 AND round < ?3))
            ORDER BY season DESC, round DESC
            LIMIT 1
            "#,
            params![venue, season, round],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    let pace = match previous {
        Some((s, r)) => pace_for_round(conn, s, r)?,
        None => HashMap::new(),
    };
    Ok(PriorSignals {
        pace,
        position_change: position_changes_for_venue(conn, venue, Some((season, round)))?,
    })
}

struct StoredResult {
    season: i64,
    round: i64,
    venue: String,
    driver: String,
    team: String,
    race_time: f64,
    rain_probability: Option<f64>,
    temperature: Option<f64>,
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS races (
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            venue TEXT NOT NULL,
            race_date TEXT NULL,
            rain_probability REAL NULL,
            temperature REAL NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (season, round)
        );
        CREATE INDEX IF NOT EXISTS idx_races_venue ON races(venue);
        CREATE TABLE IF NOT EXISTS qualifying (
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            driver TEXT NOT NULL,
            team TEXT NOT NULL,
            q1 REAL NULL,
            q2 REAL NULL,
            q3 REAL NULL,
            PRIMARY KEY (season, round, driver)
        );
        CREATE TABLE IF NOT EXISTS race_laps (
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            driver TEXT NOT NULL,
            lap INTEGER NOT NULL,
            lap_time REAL NOT NULL,
            PRIMARY KEY (season, round, driver, lap)
        );
        CREATE TABLE IF NOT EXISTS results (
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            driver TEXT NOT NULL,
            team TEXT NOT NULL,
            grid INTEGER NOT NULL,
            finish INTEGER NULL,
            race_time REAL NULL,
            PRIMARY KEY (season, round, driver)
        );
        "#,
    )?;
    Ok(())
}

/// Latest round held at `venue` in `season`.
fn round_for(conn: &Connection, season: i32, venue: &str) -> Result<Option<i64>> {
    let round = conn
        .query_row(
            "SELECT MAX(round) FROM races WHERE season = ?1 AND venue = ?2",
            params![season as i64, venue],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?
        .flatten();
    Ok(round)
}

fn qualifying_for_round(conn: &Connection, season: i64, round: i64) -> Result<HashMap<String, f64>> {
    let mut stmt =
        conn.prepare("SELECT driver, q1, q2, q3 FROM qualifying WHERE season = ?1 AND round = ?2")?;
    let rows = stmt.query_map(params![season, round], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<f64>>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<f64>>(3)?,
        ))
    })?;
    let mut out = HashMap::new();
    for row in rows {
        let (driver, q1, q2, q3) = row?;
        if let Some(best) = best_qualifying_time(q1, q2, q3) {
            out.insert(driver, best);
        }
    }
    Ok(out)
}

fn pace_for_round(conn: &Connection, season: i64, round: i64) -> Result<HashMap<String, f64>> {
    let mut stmt = conn.prepare(
        "SELECT driver, lap_time FROM race_laps WHERE season = ?1 AND round = ?2 ORDER BY driver, lap",
    )?;
    let rows = stmt.query_map(params![season, round], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut laps: HashMap<String, Vec<f64>> = HashMap::new();
    for row in rows {
        let (driver, time) = row?;
        laps.entry(driver).or_default().push(time);
    }
    Ok(laps
        .into_iter()
        .filter_map(|(driver, times)| clean_air_pace(&times).map(|p| (driver, p)))
        .collect())
}

fn position_changes_for_venue(
    conn: &Connection,
    venue: &str,
    before: Option<(i64, i64)>,
) -> Result<HashMap<String, f64>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT r.driver, r.grid, r.finish
        FROM results r
        JOIN races ra ON ra.season = r.season AND ra.round = r.round
        WHERE ra.venue = ?1 AND r.finish IS NOT NULL
          AND (?2 IS NULL OR r.season < ?2 OR (r.season = ?2 AND r.round < ?3))
        "#,
    )?;
    let (season, round) = before.unzip();
    let rows = stmt.query_map(params![venue, season, round], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let mut per_driver: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
    for row in rows {
        let (driver, grid, finish) = row?;
        let (Ok(grid), Ok(finish)) = (u32::try_from(grid), u32::try_from(finish)) else {
            continue;
        };
        per_driver.entry(driver).or_default().push((grid, finish));
    }
    Ok(per_driver
        .into_iter()
        .filter_map(|(driver, pairs)| average_position_change(&pairs).map(|v| (driver, v)))
        .collect())
}

impl RaceDataProvider for RaceStore {
    fn pace_history(&self, season: i32, venue: &str) -> Result<HashMap<String, f64>> {
        let conn = self.conn.lock();
        match round_for(&conn, season, venue)? {
            Some(round) => pace_for_round(&conn, season as i64, round),
            None => Ok(HashMap::new()),
        }
    }

    fn qualifying_history(&self, season: i32, venue: &str) -> Result<HashMap<String, f64>> {
        let conn = self.conn.lock();
        match round_for(&conn, season, venue)? {
            Some(round) => qualifying_for_round(&conn, season as i64, round),
            None => Ok(HashMap::new()),
        }
    }

    fn position_change_history(&self, venue: &str) -> Result<HashMap<String, f64>> {
        let conn = self.conn.lock();
        position_changes_for_venue(&conn, venue, None)
    }
}
