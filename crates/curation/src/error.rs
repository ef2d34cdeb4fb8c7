use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CurationError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid JSON: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Ser(#[from] serde_json::Error),

    #[error("record {index}: missing field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("invalid word bounds: min_words {min} > max_words {max}")]
    InvalidBounds { min: usize, max: usize },

    #[error("split fraction must be within [0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("dataset is empty after {0}")]
    EmptyDataset(String),

    #[error("worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, CurationError>;
