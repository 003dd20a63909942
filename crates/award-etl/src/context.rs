//! Per-sub-pipeline execution context

use crate::entities::EntityKind;
use award_etl_common::CoerceError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// An untyped record as received from the source
pub type RawRecord = Map<String, Value>;

/// A record that could not be transformed, by position in its batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    pub index: usize,
    pub field: Option<String>,
    pub message: String,
}

impl RecordError {
    pub fn new(index: usize, err: CoerceError) -> Self {
        Self {
            index,
            field: Some(err.field().to_string()),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.index, self.message)
    }
}

/// State carried through extract, transform and load for one
/// (entity, award code) combination
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub job_id: String,
    pub entity: EntityKind,
    pub award_code: Option<String>,
    pub cancel: CancellationToken,
    record_errors: Vec<RecordError>,
    errors: Vec<String>,
}

impl PipelineContext {
    pub fn new(job_id: impl Into<String>, entity: EntityKind, award_code: Option<String>) -> Self {
        Self {
            job_id: job_id.into(),
            entity,
            award_code,
            cancel: CancellationToken::new(),
            record_errors: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn record_error(&mut self, err: RecordError) {
        self.record_errors.push(err);
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn record_errors(&self) -> &[RecordError] {
        &self.record_errors
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
