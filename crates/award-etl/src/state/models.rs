//! Job and step records persisted by the state store

use crate::{entities::EntityKind, error::EtlError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Job lifecycle: `pending -> running -> {success, failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(EtlError::InvalidState(format!("unknown job status '{other}'"))),
        }
    }
}

/// Step lifecycle: `pending -> running -> {success, failed, skipped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// Nothing upstream to act on; not an error
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepType {
    Extract,
    Transform,
    Load,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Extract => "extract",
            StepType::Transform => "transform",
            StepType::Load => "load",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job row (maps to etl_jobs table)
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Job {
    pub job_id: String,
    pub pipeline_name: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_records: i64,
    pub error_count: i64,
    pub warning_count: i64,
    pub error_message: Option<String>,
    pub parameters: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn duration_secs(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }
}

/// Step row (maps to etl_job_steps table)
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct JobStep {
    pub id: i64,
    pub job_id: String,
    pub step_name: String,
    pub step_type: StepType,
    pub entity: Option<String>,
    pub award_code: Option<String>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: i64,
    pub records_failed: i64,
    pub error_message: Option<String>,
    pub error_details: Option<Json<Value>>,
}

/// A job together with its steps, ordered by start time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub steps: Vec<JobStep>,
}

/// Identity of a step about to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStep {
    pub job_id: String,
    pub step_name: String,
    pub step_type: StepType,
    pub entity: Option<EntityKind>,
    pub award_code: Option<String>,
}

impl NewStep {
    /// `{entity}_{award_code}_{stage}` for child steps, `{entity}_{stage}` otherwise
    pub fn new(
        job_id: &str,
        entity: EntityKind,
        award_code: Option<&str>,
        step_type: StepType,
    ) -> Self {
        let step_name = match award_code {
            Some(code) => format!("{entity}_{code}_{step_type}"),
            None => format!("{entity}_{step_type}"),
        };
        Self {
            job_id: job_id.to_string(),
            step_name,
            step_type,
            entity: Some(entity),
            award_code: award_code.map(str::to_string),
        }
    }
}

/// Terminal fields written by `finish_step`
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub records_processed: i64,
    pub records_failed: i64,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
}

impl StepOutcome {
    pub fn success(records_processed: u64, records_failed: u64) -> Self {
        Self {
            status: StepStatus::Success,
            records_processed: records_processed as i64,
            records_failed: records_failed as i64,
            error_message: None,
            error_details: None,
        }
    }

    pub fn failed(message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            status: StepStatus::Failed,
            records_processed: 0,
            records_failed: 0,
            error_message: Some(message.into()),
            error_details: details,
        }
    }

    pub fn with_counts(mut self, records_processed: u64, records_failed: u64) -> Self {
        self.records_processed = records_processed as i64;
        self.records_failed = records_failed as i64;
        self
    }
}

/// Terminal fields written by `complete_job`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub total_records: i64,
    pub error_count: i64,
    pub warning_count: i64,
    pub error_message: Option<String>,
}

impl JobOutcome {
    pub fn success(total_records: u64) -> Self {
        Self {
            status: JobStatus::Success,
            total_records: total_records as i64,
            error_count: 0,
            warning_count: 0,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>, total_records: u64) -> Self {
        Self {
            status: JobStatus::Failed,
            total_records: total_records as i64,
            error_count: 1,
            warning_count: 0,
            error_message: Some(message.into()),
        }
    }

    pub fn with_counts(mut self, errors: usize, warnings: usize) -> Self {
        self.error_count = errors as i64;
        self.warning_count = warnings as i64;
        self
    }
}

/// Filter for `list_jobs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// Aggregates over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStats {
    pub window_start: DateTime<Utc>,
    pub total_jobs: i64,
    pub by_status: BTreeMap<String, i64>,
    pub total_records: i64,
    /// Successful share of terminal jobs, 0.0 when none finished
    pub success_rate: f64,
    pub avg_duration_secs: Option<f64>,
}
