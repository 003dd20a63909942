//! Error types for the ETL engine
//!
//! [`ApiError`] is the client's taxonomy and decides retryability.
//! [`EtlError`] wraps it with storage and precondition failures. Both expose
//! a stable `kind()` label that is written into job and step records.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EtlError>;

/// Failures talking to the source API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Connection error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("Rate limited by source (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Request rejected (HTTP {status}): {body}")]
    Client { status: u16, body: String },

    #[error("Invalid response body: {0}")]
    InvalidResponse(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    /// Whether the failure is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limit",
            Self::Unauthorized { .. } => "auth_error",
            Self::Server { .. } => "server_error",
            Self::Client { .. } => "client_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Cancelled => "cancelled",
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err)
        }
    }
}

/// Engine-level error
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid state value: {0}")]
    InvalidState(String),

    #[error("Load failed: {0}")]
    Load(String),

    #[error("Pipeline failed: {0}")]
    Pipeline(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl EtlError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Api(e) => e.kind(),
            Self::Database(_) | Self::Migration(_) => "database_error",
            Self::Serialization(_) => "serialization_error",
            Self::MissingParameter(_) => "precondition",
            Self::UnknownEntity(_) => "unknown_entity",
            Self::Config(_) => "config",
            Self::JobNotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Load(_) => "load_error",
            Self::Pipeline(_) => "pipeline_error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Api(ApiError::Cancelled))
    }
}
