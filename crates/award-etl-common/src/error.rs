//! Error types for value coercion

use thiserror::Error;

/// Result type alias for coercion operations
pub type Result<T> = std::result::Result<T, CoerceError>;

/// Raised when a required field cannot be produced from a raw record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoerceError {
    #[error("required field '{0}' is missing or null")]
    Missing(String),

    #[error("field '{field}' has invalid {expected} value: {value}")]
    Invalid {
        field: String,
        expected: &'static str,
        value: String,
    },
}

impl CoerceError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    pub fn invalid(field: impl Into<String>, expected: &'static str, value: impl ToString) -> Self {
        Self::Invalid {
            field: field.into(),
            expected,
            value: value.to_string(),
        }
    }

    /// Name of the field that failed
    pub fn field(&self) -> &str {
        match self {
            Self::Missing(field) => field,
            Self::Invalid { field, .. } => field,
        }
    }
}
