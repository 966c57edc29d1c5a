use crate::domain::Source;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PricerError {
    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("adapter rejected {input_source} record at offset {offset}: {reason}")]
    Adapter {
        input_source: Source,
        offset: usize,
        reason: String,
    },

    #[error("schema mapping failed for field '{field}': {reason}")]
    SchemaMapping { field: &'static str, reason: String },

    #[error("invalid prediction request: {0}")]
    Validation(String),

    #[error("no champion model is loaded")]
    ModelUnavailable,

    #[error("promotion rejected: {0}")]
    PromotionRejected(String),

    #[error("feature vector schema '{vector}' does not match model schema '{model}'")]
    SchemaVersionMismatch { vector: String, model: String },

    #[error("inference deadline exceeded after {0}ms")]
    InferenceTimeout(u64),
}

pub type Result<T> = std::result::Result<T, PricerError>;
