//! Error taxonomy for the priority and classification subsystem.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input to a public operation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Training was invoked with too few labelled issues.
    #[error("insufficient training data: found {found}, need at least {required}")]
    InsufficientData { found: usize, required: usize },

    /// A trained model is missing or unreadable. Classifiers absorb this and fall back.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
