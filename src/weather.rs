use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::http_client::http_client;

const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const OPEN_METEO_HOURLY: &str = "temperature_2m,precipitation_probability,precipitation,windspeed_10m,cloudcover,relativehumidity_2m,surface_pressure";
// Hourly slots further than this from the requested start are not a forecast for it.
const MAX_SLOT_DISTANCE_MINUTES: i64 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub timestamp: Option<NaiveDateTime>,
    pub temperature_c: f64,
    pub wind_kph: f64,
    /// Probability of precipitation in [0, 1].
    pub precipitation_prob: f64,
    pub precipitation_mm: f64,
    pub cloud_percentage: u8,
    pub humidity_percentage: u8,
    pub pressure_hpa: f64,
    pub condition: String,
    pub is_wet: bool,
}

impl WeatherSnapshot {
    pub fn fallback() -> Self {
        Self {
            timestamp: None,
            temperature_c: 20.0,
            wind_kph: 10.0,
            precipitation_prob: 0.1,
            precipitation_mm: 0.0,
            cloud_percentage: 30,
            humidity_percentage: 60,
            pressure_hpa: 1013.25,
            condition: "clear".to_string(),
            is_wet: false,
        }
    }
}

pub fn condition_label(precipitation_mm: f64, cloud_percentage: u8) -> &'static str {
    if precipitation_mm > 5.0 {
        "heavy rain"
    } else if precipitation_mm > 1.0 {
        "light rain"
    } else if precipitation_mm > 0.1 {
        "drizzle"
    } else if cloud_percentage > 80 {
        "overcast"
    } else if cloud_percentage > 50 {
        "partly cloudy"
    } else {
        "clear"
    }
}

pub trait WeatherProvider: Send + Sync {
    /// `Ok(None)` means the provider answered but has nothing for that venue/time.
    fn forecast(&self, venue: &str, at: NaiveDateTime) -> Result<Option<WeatherSnapshot>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoWeather;

impl WeatherProvider for NoWeather {
    fn forecast(&self, _venue: &str, _at: NaiveDateTime) -> Result<Option<WeatherSnapshot>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitLocation {
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

const CIRCUITS: &[CircuitLocation] = &[
    CircuitLocation { name: "Monaco", latitude: 43.7384, longitude: 7.4246 },
    CircuitLocation { name: "Silverstone", latitude: 52.0786, longitude: -1.01694 },
    CircuitLocation { name: "Monza", latitude: 45.6156, longitude: 9.28111 },
    CircuitLocation { name: "Spa", latitude: 50.4372, longitude: 5.97139 },
    CircuitLocation { name: "Suzuka", latitude: 34.8431, longitude: 136.5407 },
    CircuitLocation { name: "Austin", latitude: 30.1328, longitude: -97.6411 },
    CircuitLocation { name: "Interlagos", latitude: -23.7036, longitude: -46.6997 },
    CircuitLocation { name: "Albert Park", latitude: -37.8497, longitude: 144.968 },
    CircuitLocation { name: "Red Bull Ring", latitude: 47.2197, longitude: 14.7647 },
    CircuitLocation { name: "Abu Dhabi", latitude: 24.4672, longitude: 54.6031 },
];

pub fn circuit_location(venue: &str) -> Option<CircuitLocation> {
    let key = venue.trim().to_ascii_lowercase().replace('_', " ");
    let key = match key.as_str() {
        "yas marina" => "abu dhabi",
        "cota" => "austin",
        "spa francorchamps" | "spa-francorchamps" => "spa",
        other => other,
    };
    CIRCUITS
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(key))
        .copied()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenMeteoProvider;

impl WeatherProvider for OpenMeteoProvider {
    fn forecast(&self, venue: &str, at: NaiveDateTime) -> Result<Option<WeatherSnapshot>> {
        let Some(location) = circuit_location(venue) else {
            warn!(venue, "no circuit location known; weather unavailable");
            return Ok(None);
        };
        let client = http_client()?;
        let body = client
            .get(OPEN_METEO_FORECAST_URL)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("hourly", OPEN_METEO_HOURLY.to_string()),
                ("timezone", "auto".to_string()),
                ("forecast_days", "7".to_string()),
            ])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text())
            .map_err(|err| EngineError::ProviderUnavailable(format!("open-meteo: {err}")))?;
        let snapshot = parse_open_meteo_hourly(&body, at)?;
        if snapshot.is_none() {
            debug!(venue, %at, "forecast window does not cover race start");
        }
        Ok(snapshot)
    }
}

/// Picks the hourly slot closest to `at` from an Open-Meteo forecast body.
pub fn parse_open_meteo_hourly(body: &str, at: NaiveDateTime) -> Result<Option<WeatherSnapshot>> {
    let v: Value = serde_json::from_str(body.trim())?;
    let Some(hourly) = v.get("hourly") else {
        return Ok(None);
    };
    let Some(times) = hourly.get("time").and_then(|t| t.as_array()) else {
        return Ok(None);
    };

    let mut best: Option<(usize, i64)> = None;
    for (idx, raw) in times.iter().enumerate() {
        let Some(ts) = raw
            .as_str()
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").ok())
        else {
            continue;
        };
        let distance = (ts - at).num_minutes().abs();
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((idx, distance));
        }
    }
    let Some((idx, distance)) = best else {
        return Ok(None);
    };
    if distance > MAX_SLOT_DISTANCE_MINUTES {
        return Ok(None);
    }

    let series = |name: &str| -> Option<f64> {
        hourly
            .get(name)
            .and_then(|s| s.as_array())
            .and_then(|s| s.get(idx))
            .and_then(|x| x.as_f64())
    };
    let Some(temperature_c) = series("temperature_2m") else {
        return Ok(None);
    };
    let precipitation_mm = series("precipitation").unwrap_or(0.0);
    let cloud = series("cloudcover").unwrap_or(0.0).clamp(0.0, 100.0) as u8;
    Ok(Some(WeatherSnapshot {
        timestamp: Some(at),
        temperature_c,
        wind_kph: series("windspeed_10m").unwrap_or(0.0),
        precipitation_prob: (series("precipitation_probability").unwrap_or(0.0) / 100.0)
            .clamp(0.0, 1.0),
        precipitation_mm,
        cloud_percentage: cloud,
        humidity_percentage: series("relativehumidity_2m")
            .unwrap_or(0.0)
            .clamp(0.0, 100.0) as u8,
        pressure_hpa: series("surface_pressure").unwrap_or(1013.25),
        condition: condition_label(precipitation_mm, cloud).to_string(),
        is_wet: precipitation_mm > 0.1,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").unwrap()
    }

    const BODY: &str = r#"{
        "hourly": {
            "time": ["2025-05-25T13:00", "2025-05-25T14:00", "2025-05-25T15:00"],
            "temperature_2m": [21.0, 22.5, 23.0],
            "precipitation_probability": [10, 65, 80],
            "precipitation": [0.0, 1.4, 6.0],
            "windspeed_10m": [8.0, 12.0, 14.0],
            "cloudcover": [20, 90, 100],
            "relativehumidity_2m": [55, 70, 80],
            "surface_pressure": [1012.0, 1010.5, 1009.0]
        }
    }"#;

    #[test]
    fn picks_closest_hourly_slot() {
        let snap = parse_open_meteo_hourly(BODY, at("2025-05-25T14:20"))
            .unwrap()
            .unwrap();
        assert_eq!(snap.temperature_c, 22.5);
        assert!((snap.precipitation_prob - 0.65).abs() < 1e-9);
        assert_eq!(snap.condition, "light rain");
        assert!(snap.is_wet);
    }

    #[test]
    fn start_outside_window_is_absent() {
        let snap = parse_open_meteo_hourly(BODY, at("2025-05-26T14:00")).unwrap();
        assert!(snap.is_none());
    }

    #[test]
    fn condition_thresholds() {
        assert_eq!(condition_label(6.0, 0), "heavy rain");
        assert_eq!(condition_label(0.2, 0), "drizzle");
        assert_eq!(condition_label(0.0, 85), "overcast");
        assert_eq!(condition_label(0.0, 60), "partly cloudy");
        assert_eq!(condition_label(0.0, 10), "clear");
    }

    #[test]
    fn circuit_aliases_resolve() {
        assert_eq!(circuit_location("yas_marina").unwrap().name, "Abu Dhabi");
        assert_eq!(circuit_location("monaco").unwrap().name, "Monaco");
        assert!(circuit_location("Nowhere").is_none());
    }
}
