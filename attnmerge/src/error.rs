//! Error types for attnmerge

use thiserror::Error;

/// Result type alias using attnmerge's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for merge and verification operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: String, got: String },

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error(
        "{tensor} mismatch between {candidate} and {reference}: \
         max abs diff {max_abs_diff} (first violation at flat index {index}: \
         {actual} vs {expected})"
    )]
    ToleranceExceeded {
        tensor: String,
        candidate: String,
        reference: String,
        max_abs_diff: f32,
        index: usize,
        actual: f32,
        expected: f32,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
