pub mod artifact;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod gbm;
pub mod http_client;
pub mod imputer;
pub mod jitter;
pub mod model;
pub mod overlay;
pub mod race_data;
pub mod race_store;
pub mod ranking;
pub mod ridge;
pub mod training;
pub mod weather;

pub use engine::{PredictionEngine, PredictionReport, PredictionRequest};
pub use error::{EngineError, Result};
