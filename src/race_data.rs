use std::collections::HashMap;

use crate::error::Result;
use crate::imputer::median;

/// Source of historical per-driver signals. Every map may be partial or empty.
pub trait RaceDataProvider: Send + Sync {
    fn pace_history(&self, season: i32, venue: &str) -> Result<HashMap<String, f64>>;
    fn qualifying_history(&self, season: i32, venue: &str) -> Result<HashMap<String, f64>>;
    fn position_change_history(&self, venue: &str) -> Result<HashMap<String, f64>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticRaceData {
    pub pace: HashMap<(i32, String), HashMap<String, f64>>,
    pub qualifying: HashMap<(i32, String), HashMap<String, f64>>,
    pub position_change: HashMap<String, HashMap<String, f64>>,
}

impl StaticRaceData {
    pub fn empty() -> Self {
        Self::default()
    }
}

impl RaceDataProvider for StaticRaceData {
    fn pace_history(&self, season: i32, venue: &str) -> Result<HashMap<String, f64>> {
        Ok(self
            .pace
            .get(&(season, venue.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn qualifying_history(&self, season: i32, venue: &str) -> Result<HashMap<String, f64>> {
        Ok(self
            .qualifying
            .get(&(season, venue.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn position_change_history(&self, venue: &str) -> Result<HashMap<String, f64>> {
        Ok(self.position_change.get(venue).cloned().unwrap_or_default())
    }
}

/// Accepts "1:23.456" or plain seconds.
pub fn parse_lap_time(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let secs = match s.split_once(':') {
        Some((mins, rest)) => mins.trim().parse::<f64>().ok()? * 60.0 + rest.trim().parse::<f64>().ok()?,
        None => s.parse::<f64>().ok()?,
    };
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

pub fn best_qualifying_time(q1: Option<f64>, q2: Option<f64>, q3: Option<f64>) -> Option<f64> {
    q3.or(q2).or(q1)
}

fn quantile(sorted: &[f64], p: f64) -> f64 {
    let pos = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Representative race pace: laps outside the 10th..90th percentile are
/// dropped (traffic, pit laps, push laps) and the median of the rest is kept.
pub fn clean_air_pace(lap_times: &[f64]) -> Option<f64> {
    let mut laps = lap_times
        .iter()
        .copied()
        .filter(|t| t.is_finite())
        .collect::<Vec<_>>();
    if laps.is_empty() {
        return None;
    }
    laps.sort_by(f64::total_cmp);
    let lo = quantile(&laps, 0.1);
    let hi = quantile(&laps, 0.9);
    let clean = laps
        .into_iter()
        .filter(|t| *t >= lo && *t <= hi)
        .collect::<Vec<_>>();
    median(clean)
}

pub fn average_position_change(grid_finish: &[(u32, u32)]) -> Option<f64> {
    let valid = grid_finish
        .iter()
        .filter(|(grid, finish)| *grid > 0 && *finish > 0)
        .map(|(grid, finish)| *grid as f64 - *finish as f64)
        .collect::<Vec<_>>();
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}
