use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use crate::imputer::MedianImputer;
use crate::model::{BaseModel, Regressor};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Hex SHA-256 over the ordered feature names. Any change to the layout
/// changes the fingerprint.
pub fn layout_fingerprint(names: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub fn current_layout_fingerprint() -> String {
    layout_fingerprint(&FEATURE_NAMES)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub layout_fingerprint: String,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub model: Regressor,
    pub imputer: MedianImputer,
    pub mae: f64,
    pub training_samples: usize,
    pub test_samples: usize,
}

impl ModelArtifact {
    pub fn new(model: Regressor, imputer: MedianImputer, trained_at: DateTime<Utc>) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            layout_fingerprint: current_layout_fingerprint(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            trained_at,
            model,
            imputer,
            mae: 0.0,
            training_samples: 0,
            test_samples: 0,
        }
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let filled = self.imputer.transform(rows)?;
        self.model.predict(&filled)
    }

    pub fn check_layout(&self) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(EngineError::ArtifactLayoutMismatch {
                expected: format!("format v{ARTIFACT_FORMAT_VERSION}"),
                found: format!("format v{}", self.format_version),
            });
        }
        let expected = current_layout_fingerprint();
        let names = self.feature_names.iter().map(String::as_str).collect::<Vec<_>>();
        let recomputed = layout_fingerprint(&names);
        if self.layout_fingerprint != expected || recomputed != expected {
            return Err(EngineError::ArtifactLayoutMismatch {
                expected,
                found: self.layout_fingerprint.clone(),
            });
        }
        if !self.model.is_trained() {
            return Err(EngineError::NotFitted("artifact model"));
        }
        match self.imputer.statistics() {
            None => Err(EngineError::NotFitted("artifact imputer")),
            Some(stats) if stats.len() != FEATURE_COUNT => Err(EngineError::FeatureMismatch {
                expected: FEATURE_COUNT,
                got: stats.len(),
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: ModelArtifact = serde_json::from_slice(bytes)?;
        artifact.check_layout()?;
        Ok(artifact)
    }

    /// Writes through a temp file and renames it over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, self.to_bytes()?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)?;
        Self::from_bytes(&raw)
    }
}
