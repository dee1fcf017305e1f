use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no team mapping for competitor {competitor}")]
    MissingInput { competitor: String },

    #[error("insufficient training data: got {got} examples, need at least {need}")]
    InsufficientData { got: usize, need: usize },

    #[error("{0} used before fit")]
    NotFitted(&'static str),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    #[error("feature mismatch: expected {expected} columns, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("artifact layout mismatch: expected {expected}, found {found}")]
    ArtifactLayoutMismatch { expected: String, found: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
