use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::jitter::gaussian;
use crate::weather::WeatherSnapshot;

pub const FEATURE_COUNT: usize = 6;

/// Column order shared by the imputer, the base model and the artifact.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "qualifying_time",
    "rain_probability",
    "temperature",
    "team_performance_score",
    "clean_air_pace",
    "average_position_change",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub qualifying_time: f64,
    pub rain_probability: f64,
    pub temperature: f64,
    pub team_performance_score: f64,
    pub clean_air_pace: f64,
    pub average_position_change: f64,
}

impl FeatureVector {
    pub fn to_row(&self) -> [f64; FEATURE_COUNT] {
        [
            self.qualifying_time,
            self.rain_probability,
            self.temperature,
            self.team_performance_score,
            self.clean_air_pace,
            self.average_position_change,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub driver: String,
    pub team: String,
}

/// Driver → team mapping for one prediction run. Order is the input order used
/// to break ranking ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(driver, team)| RosterEntry {
                    driver: driver.to_string(),
                    team: team.to_string(),
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn team_of(&self, driver: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.driver == driver)
            .map(|e| e.team.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn team_count(&self) -> usize {
        let mut teams = self.entries.iter().map(|e| e.team.as_str()).collect::<Vec<_>>();
        teams.sort_unstable();
        teams.dedup();
        teams.len()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::from_pairs([
            ("VER", "Red Bull"),
            ("NOR", "McLaren"),
            ("PIA", "McLaren"),
            ("LEC", "Ferrari"),
            ("RUS", "Mercedes"),
            ("HAM", "Mercedes"),
            ("GAS", "Alpine"),
            ("ALO", "Aston Martin"),
            ("TSU", "Racing Bulls"),
            ("SAI", "Ferrari"),
            ("HUL", "Kick Sauber"),
            ("OCO", "Alpine"),
            ("STR", "Aston Martin"),
            ("ALB", "Williams"),
            ("COL", "Williams"),
            ("MAG", "Haas"),
            ("BOT", "Kick Sauber"),
            ("ZHO", "Kick Sauber"),
            ("RIC", "Racing Bulls"),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateTables {
    /// Normalized points share per team.
    pub team_scores: HashMap<String, f64>,
    pub default_team_score: f64,
    pub qualifying_base_times: HashMap<String, f64>,
    pub default_qualifying_base_time: f64,
    pub driver_adjustments: HashMap<String, f64>,
    pub qualifying_jitter_sd: f64,
    pub pace_base_times: HashMap<String, f64>,
    pub default_pace_base_time: f64,
    pub pace_jitter_sd: f64,
    /// venue → driver → mean places gained.
    pub position_changes: HashMap<String, HashMap<String, f64>>,
}

impl EstimateTables {
    pub fn team_score(&self, team: &str) -> f64 {
        self.team_scores
            .get(team)
            .copied()
            .unwrap_or(self.default_team_score)
    }

    pub fn qualifying_base_time(&self, team: &str) -> f64 {
        self.qualifying_base_times
            .get(team)
            .copied()
            .unwrap_or(self.default_qualifying_base_time)
    }

    pub fn driver_adjustment(&self, driver: &str) -> f64 {
        self.driver_adjustments.get(driver).copied().unwrap_or(0.0)
    }

    pub fn pace_base_time(&self, team: &str) -> f64 {
        self.pace_base_times
            .get(team)
            .copied()
            .unwrap_or(self.default_pace_base_time)
    }

    pub fn position_change(&self, venue: &str, driver: &str) -> Option<f64> {
        self.position_changes.get(venue)?.get(driver).copied()
    }
}

fn owned_map(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

impl Default for EstimateTables {
    fn default() -> Self {
        const LEADER_POINTS: f64 = 279.0;
        let team_scores = [
            ("McLaren", 279.0),
            ("Mercedes", 147.0),
            ("Red Bull", 131.0),
            ("Williams", 51.0),
            ("Ferrari", 114.0),
            ("Haas", 20.0),
            ("Aston Martin", 14.0),
            ("Kick Sauber", 6.0),
            ("Racing Bulls", 10.0),
            ("Alpine", 7.0),
        ]
        .iter()
        .map(|(team, pts)| (team.to_string(), pts / LEADER_POINTS))
        .collect();

        let monaco = owned_map(&[
            ("VER", -1.0),
            ("NOR", 1.0),
            ("PIA", 0.2),
            ("RUS", 0.5),
            ("SAI", -0.3),
            ("ALB", 0.8),
            ("LEC", -1.5),
            ("OCO", -0.2),
            ("HAM", 0.3),
            ("STR", 1.1),
            ("GAS", -0.4),
            ("ALO", -0.6),
            ("HUL", 0.0),
        ]);

        Self {
            team_scores,
            default_team_score: 0.5,
            qualifying_base_times: owned_map(&[
                ("Red Bull", 70.5),
                ("McLaren", 70.8),
                ("Ferrari", 71.0),
                ("Mercedes", 71.2),
                ("Aston Martin", 71.5),
                ("Alpine", 71.8),
                ("Williams", 72.0),
                ("Racing Bulls", 72.2),
                ("Haas", 72.4),
                ("Kick Sauber", 72.6),
            ]),
            default_qualifying_base_time: 72.5,
            driver_adjustments: owned_map(&[
                ("VER", -0.3),
                ("NOR", -0.1),
                ("LEC", -0.2),
                ("HAM", -0.1),
                ("RUS", 0.0),
                ("PIA", 0.1),
                ("ALO", -0.1),
                ("SAI", 0.0),
                ("STR", 0.2),
                ("GAS", 0.1),
            ]),
            qualifying_jitter_sd: 0.1,
            pace_base_times: owned_map(&[
                ("Red Bull", 93.5),
                ("McLaren", 93.7),
                ("Ferrari", 94.0),
                ("Mercedes", 94.2),
                ("Aston Martin", 95.0),
                ("Alpine", 95.5),
                ("Williams", 95.8),
                ("Racing Bulls", 96.0),
                ("Haas", 96.2),
                ("Kick Sauber", 96.5),
            ]),
            default_pace_base_time: 96.0,
            pace_jitter_sd: 0.2,
            position_changes: HashMap::from([("Monaco".to_string(), monaco)]),
        }
    }
}

/// Per-race signals gathered from the providers before features are built.
/// Any map may be empty; absence is handled per competitor.
#[derive(Debug, Clone, Copy)]
pub struct RaceSignals<'a> {
    pub venue: &'a str,
    pub weather: &'a WeatherSnapshot,
    pub pace_history: &'a HashMap<String, f64>,
    pub qualifying_history: &'a HashMap<String, f64>,
    pub position_change_history: &'a HashMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    tables: EstimateTables,
}

impl FeatureBuilder {
    pub fn new(tables: EstimateTables) -> Self {
        Self { tables }
    }

    /// Builds one competitor's row. Missing history is estimated from the
    /// tables plus jitter drawn from `rng`; only a missing team is an error.
    pub fn build<R: Rng + ?Sized>(
        &self,
        competitor: &str,
        team: Option<&str>,
        signals: &RaceSignals<'_>,
        rng: &mut R,
    ) -> Result<FeatureVector> {
        let Some(team) = team else {
            return Err(EngineError::MissingInput {
                competitor: competitor.to_string(),
            });
        };

        let qualifying_time = match observed(signals.qualifying_history, competitor) {
            Some(t) => t,
            None => self.estimate_qualifying_time(competitor, team, rng),
        };
        let clean_air_pace = match observed(signals.pace_history, competitor) {
            Some(p) => p,
            None => self.estimate_clean_air_pace(team, rng),
        };
        let average_position_change = observed(signals.position_change_history, competitor)
            .or_else(|| self.tables.position_change(signals.venue, competitor))
            .unwrap_or(0.0);

        Ok(FeatureVector {
            qualifying_time,
            rain_probability: signals.weather.precipitation_prob,
            temperature: signals.weather.temperature_c,
            team_performance_score: self.tables.team_score(team),
            clean_air_pace,
            average_position_change,
        })
    }

    pub fn estimate_qualifying_time<R: Rng + ?Sized>(
        &self,
        driver: &str,
        team: &str,
        rng: &mut R,
    ) -> f64 {
        self.tables.qualifying_base_time(team)
            + self.tables.driver_adjustment(driver)
            + gaussian(rng, self.tables.qualifying_jitter_sd)
    }

    pub fn estimate_clean_air_pace<R: Rng + ?Sized>(&self, team: &str, rng: &mut R) -> f64 {
        self.tables.pace_base_time(team) + gaussian(rng, self.tables.pace_jitter_sd)
    }
}

fn observed(map: &HashMap<String, f64>, competitor: &str) -> Option<f64> {
    map.get(competitor).copied().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn no_jitter() -> EstimateTables {
        EstimateTables {
            qualifying_jitter_sd: 0.0,
            pace_jitter_sd: 0.0,
            ..EstimateTables::default()
        }
    }

    #[test]
    fn estimates_fill_every_missing_signal() {
        let builder = FeatureBuilder::new(no_jitter());
        let weather = WeatherSnapshot::fallback();
        let empty = HashMap::new();
        let signals = RaceSignals {
            venue: "Monaco",
            weather: &weather,
            pace_history: &empty,
            qualifying_history: &empty,
            position_change_history: &empty,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let fv = builder
            .build("VER", Some("Red Bull"), &signals, &mut rng)
            .unwrap();
        assert!((fv.qualifying_time - 70.2).abs() < 1e-9);
        assert_eq!(fv.clean_air_pace, 93.5);
        assert_eq!(fv.average_position_change, -1.0);
        assert!((fv.team_performance_score - 131.0 / 279.0).abs() < 1e-12);
        assert_eq!(fv.rain_probability, 0.1);
        assert_eq!(fv.temperature, 20.0);
    }

    #[test]
    fn observed_history_wins_over_estimates() {
        let builder = FeatureBuilder::default();
        let weather = WeatherSnapshot::fallback();
        let quali = HashMap::from([("NOR".to_string(), 69.9)]);
        let pace = HashMap::from([("NOR".to_string(), 92.8), ("PIA".to_string(), f64::NAN)]);
        let pos = HashMap::from([("NOR".to_string(), 2.5)]);
        let signals = RaceSignals {
            venue: "Monza",
            weather: &weather,
            pace_history: &pace,
            qualifying_history: &quali,
            position_change_history: &pos,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let fv = builder
            .build("NOR", Some("McLaren"), &signals, &mut rng)
            .unwrap();
        assert_eq!(fv.qualifying_time, 69.9);
        assert_eq!(fv.clean_air_pace, 92.8);
        assert_eq!(fv.average_position_change, 2.5);

        // NaN history counts as absent.
        let fv = builder
            .build("PIA", Some("McLaren"), &signals, &mut rng)
            .unwrap();
        assert!(fv.clean_air_pace.is_finite());
        assert_eq!(fv.average_position_change, 0.0);
    }

    #[test]
    fn unknown_team_uses_defaults_and_missing_team_fails() {
        let builder = FeatureBuilder::new(no_jitter());
        let weather = WeatherSnapshot::fallback();
        let empty = HashMap::new();
        let signals = RaceSignals {
            venue: "Spa",
            weather: &weather,
            pace_history: &empty,
            qualifying_history: &empty,
            position_change_history: &empty,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let fv = builder
            .build("NEW", Some("Garage Team"), &signals, &mut rng)
            .unwrap();
        assert_eq!(fv.team_performance_score, 0.5);
        assert_eq!(fv.qualifying_time, 72.5);
        assert_eq!(fv.clean_air_pace, 96.0);

        let err = builder.build("NEW", None, &signals, &mut rng).unwrap_err();
        assert!(matches!(err, EngineError::MissingInput { .. }));
    }

    #[test]
    fn roster_counts_teams_once() {
        let roster = Roster::default();
        assert_eq!(roster.len(), 19);
        assert_eq!(roster.team_count(), 10);
        assert_eq!(roster.team_of("ALB"), Some("Williams"));
    }
}
