//! Data model error types.

use thiserror::Error;

/// Errors raised while building or validating in-memory columnar data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid {data_type} array: {reason}")]
    InvalidArray { data_type: String, reason: String },

    #[error("column '{column}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },

    #[error("dictionary error: {0}")]
    Dictionary(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("invalid tensor: {0}")]
    InvalidTensor(String),

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DataError {
    pub(crate) fn invalid(data_type: impl ToString, reason: impl Into<String>) -> Self {
        DataError::InvalidArray {
            data_type: data_type.to_string(),
            reason: reason.into(),
        }
    }
}
