use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::model::top_feature;
use crate::overlay::Weights;

const GENERIC_EXPLANATION: &str =
    "Predictions based on historical performance, qualifying pace, and team form";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub driver: String,
    pub team: String,
    pub predicted_time: f64,
    // Both scores are rank-decreasing in (0, 1], not calibrated probabilities.
    pub win_probability: f64,
    pub podium_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Competitor {
    pub driver: String,
    pub team: String,
}

pub fn win_score(rank_index: usize) -> f64 {
    (0.95 - rank_index as f64 * 0.05).max(0.01)
}

pub fn podium_score(rank_index: usize) -> f64 {
    if rank_index < 3 {
        0.8 - rank_index as f64 * 0.1
    } else {
        (0.5 - (rank_index - 3) as f64 * 0.05).max(0.05)
    }
}

/// Orders competitors by adjusted time, fastest first. The sort is stable so
/// equal times keep input order; NaN times go last.
pub fn rank(competitors: &[Competitor], adjusted_times: &[f64]) -> Vec<PredictionResult> {
    let mut order = (0..competitors.len().min(adjusted_times.len())).collect::<Vec<_>>();
    order.sort_by(|&a, &b| compare_times(adjusted_times[a], adjusted_times[b]));

    order
        .into_iter()
        .enumerate()
        .map(|(rank_index, idx)| PredictionResult {
            driver: competitors[idx].driver.clone(),
            team: competitors[idx].team.clone(),
            predicted_time: adjusted_times[idx],
            win_probability: win_score(rank_index),
            podium_probability: podium_score(rank_index),
        })
        .collect()
}

fn compare_times(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

pub fn explain(
    weights: &Weights,
    race_start: Option<NaiveDateTime>,
    importance: &BTreeMap<String, f64>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if weights.track_suitability > 0.8 {
        parts.push(
            "High track suitability weighting favors drivers with strong historical performance at this circuit"
                .to_string(),
        );
    }
    if weights.clean_air_pace > 0.8 {
        parts.push(
            "Clean air pace is heavily weighted, benefiting drivers with strong one-lap pace"
                .to_string(),
        );
    }
    if weights.qualifying_importance > 0.8 {
        parts.push(
            "Qualifying position is crucial - grid position heavily influences race outcome"
                .to_string(),
        );
    }
    if weights.weather_impact > 0.6 {
        parts.push("Weather conditions significantly impact the predictions".to_string());
    }
    if weights.chaos_mode {
        parts.push(
            "Chaos mode enabled - increased unpredictability and variance in outcomes".to_string(),
        );
    }

    if let Some((name, score)) = top_feature(importance)
        && score > 0.0
    {
        parts.push(format!("Most important prediction factor: {}", title_case(name)));
    }

    if let Some(start) = race_start {
        let hour = start.hour();
        if hour < 10 {
            parts.push("Early race start may affect driver performance and strategy".to_string());
        } else if hour > 18 {
            parts.push(
                "Late race start increases likelihood of changing track conditions".to_string(),
            );
        }
    }

    if parts.is_empty() {
        parts.push(GENERIC_EXPLANATION.to_string());
    }
    format!("{}.", parts.join(". "))
}

fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
