//! Durable job and step state
//!
//! Backed by a local SQLite file with embedded migrations. Every call takes
//! its own connection from the pool and releases it when done; no
//! transaction spans more than one call.

pub mod models;

use crate::error::{EtlError, Result};
use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
    SqlitePool,
};
use std::{collections::BTreeMap, path::Path};
use tracing::{debug, info, instrument, warn};

pub use models::{
    Job, JobDetail, JobFilter, JobOutcome, JobStats, JobStatus, JobStep, NewStep, StepOutcome,
    StepStatus, StepType,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const JOB_COLUMNS: &str = "job_id, pipeline_name, status, started_at, completed_at, \
     total_records, error_count, warning_count, error_message, parameters, created_at";

const STEP_COLUMNS: &str = "id, job_id, step_name, step_type, entity, award_code, status, \
     started_at, completed_at, records_processed, records_failed, error_message, error_details";

const STALE_MESSAGE: &str = "Marked failed after exceeding the stale job timeout";

#[derive(Debug, Clone)]
pub struct StateManager {
    pool: SqlitePool,
}

impl StateManager {
    /// Open (creating if needed) the state database at `path` and migrate it
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EtlError::Config(format!("Cannot create {}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        MIGRATOR.run(&pool).await?;
        debug!("State store migrated");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Create a `pending` job, or reset an existing one with the same id
    ///
    /// Resetting clears counts, timestamps and any previous steps.
    #[instrument(skip(self, parameters))]
    pub async fn create_job(
        &self,
        job_id: &str,
        pipeline_name: &str,
        parameters: Option<&Value>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM etl_job_steps WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO etl_jobs (job_id, pipeline_name, status, parameters, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (job_id) DO UPDATE SET
                pipeline_name = excluded.pipeline_name,
                status = excluded.status,
                started_at = NULL,
                completed_at = NULL,
                total_records = 0,
                error_count = 0,
                warning_count = 0,
                error_message = NULL,
                parameters = excluded.parameters,
                created_at = excluded.created_at
            "#,
        )
        .bind(job_id)
        .bind(pipeline_name)
        .bind(JobStatus::Pending.as_str())
        .bind(parameters.map(Json))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Job created");
        Ok(())
    }

    pub async fn start_job(&self, job_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE etl_jobs
            SET status = $1, started_at = $2
            WHERE job_id = $3
            "#,
        )
        .bind(JobStatus::Running.as_str())
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EtlError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Move a job to its terminal state with final counts
    #[instrument(skip(self, outcome), fields(status = %outcome.status))]
    pub async fn complete_job(&self, job_id: &str, outcome: &JobOutcome) -> Result<()> {
        if !outcome.status.is_terminal() {
            return Err(EtlError::InvalidState(format!(
                "cannot complete job with non-terminal status '{}'",
                outcome.status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE etl_jobs
            SET status = $1,
                completed_at = $2,
                started_at = COALESCE(started_at, $2),
                total_records = $3,
                error_count = $4,
                warning_count = $5,
                error_message = $6
            WHERE job_id = $7
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(Utc::now())
        .bind(outcome.total_records)
        .bind(outcome.error_count)
        .bind(outcome.warning_count)
        .bind(outcome.error_message.as_deref())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EtlError::JobNotFound(job_id.to_string()));
        }
        info!(total_records = outcome.total_records, "Job completed");
        Ok(())
    }

    /// Jobs newest first
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM etl_jobs \
             WHERE ($1 IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit.max(0))
            .bind(filter.offset.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobDetail>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM etl_jobs WHERE job_id = $1");
        let Some(job) = sqlx::query_as::<_, Job>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let sql = format!(
            "SELECT {STEP_COLUMNS} FROM etl_job_steps WHERE job_id = $1 ORDER BY started_at, id"
        );
        let steps = sqlx::query_as::<_, JobStep>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(JobDetail { job, steps }))
    }

    /// Totals over jobs created within `window` of now
    pub async fn stats(&self, window: Duration) -> Result<JobStats> {
        let window_start = Utc::now() - window;
        let sql = format!("SELECT {JOB_COLUMNS} FROM etl_jobs WHERE created_at >= $1");
        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(window_start)
            .fetch_all(&self.pool)
            .await?;

        let mut by_status = BTreeMap::new();
        for job in &jobs {
            *by_status.entry(job.status.as_str().to_string()).or_insert(0) += 1;
        }

        let terminal: Vec<&Job> = jobs.iter().filter(|j| j.status.is_terminal()).collect();
        let succeeded = terminal
            .iter()
            .filter(|j| j.status == JobStatus::Success)
            .count();
        let success_rate = if terminal.is_empty() {
            0.0
        } else {
            succeeded as f64 / terminal.len() as f64
        };

        let durations: Vec<f64> = terminal.iter().filter_map(|j| j.duration_secs()).collect();
        let avg_duration_secs =
            (!durations.is_empty()).then(|| durations.iter().sum::<f64>() / durations.len() as f64);

        Ok(JobStats {
            window_start,
            total_jobs: jobs.len() as i64,
            by_status,
            total_records: jobs.iter().map(|j| j.total_records).sum(),
            success_rate,
            avg_duration_secs,
        })
    }

    /// Fail `pending` and `running` jobs older than `max_age`
    ///
    /// Their unfinished steps are failed with them. Returns the number of
    /// jobs touched.
    #[instrument(skip(self))]
    pub async fn cleanup_stale_jobs(&self, max_age: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - max_age;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE etl_job_steps
            SET status = 'failed', completed_at = $1, error_message = $2
            WHERE status IN ('pending', 'running')
              AND job_id IN (
                  SELECT job_id FROM etl_jobs
                  WHERE status IN ('pending', 'running')
                    AND COALESCE(started_at, created_at) < $3
              )
            "#,
        )
        .bind(now)
        .bind(STALE_MESSAGE)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE etl_jobs
            SET status = 'failed', completed_at = $1, error_message = $2,
                error_count = error_count + 1
            WHERE status IN ('pending', 'running')
              AND COALESCE(started_at, created_at) < $3
            "#,
        )
        .bind(now)
        .bind(STALE_MESSAGE)
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let cleaned = result.rows_affected();
        if cleaned > 0 {
            warn!(cleaned, "Marked stale jobs as failed");
        }
        Ok(cleaned)
    }

    /// Remove a job and its steps; false when it did not exist
    pub async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM etl_job_steps WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM etl_jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Steps
    // ========================================================================

    /// Record a step as `running`; returns its row id
    pub async fn start_step(&self, step: &NewStep) -> Result<i64> {
        self.insert_step(step, StepStatus::Running, None).await
    }

    pub async fn finish_step(&self, step_id: i64, outcome: &StepOutcome) -> Result<()> {
        if !outcome.status.is_terminal() {
            return Err(EtlError::InvalidState(format!(
                "cannot finish step with non-terminal status '{}'",
                outcome.status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE etl_job_steps
            SET status = $1,
                completed_at = $2,
                records_processed = $3,
                records_failed = $4,
                error_message = $5,
                error_details = $6
            WHERE id = $7
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(Utc::now())
        .bind(outcome.records_processed)
        .bind(outcome.records_failed)
        .bind(outcome.error_message.as_deref())
        .bind(outcome.error_details.as_ref().map(Json))
        .bind(step_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EtlError::InvalidState(format!("step {step_id} does not exist")));
        }
        Ok(())
    }

    /// Record a step that had nothing to act on
    pub async fn skip_step(&self, step: &NewStep, reason: &str) -> Result<i64> {
        self.insert_step(step, StepStatus::Skipped, Some(reason)).await
    }

    async fn insert_step(
        &self,
        step: &NewStep,
        status: StepStatus,
        message: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now();
        let completed_at = status.is_terminal().then_some(now);

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO etl_job_steps (
                job_id, step_name, step_type, entity, award_code,
                status, started_at, completed_at, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&step.job_id)
        .bind(&step.step_name)
        .bind(step.step_type.as_str())
        .bind(step.entity.map(|e| e.as_str()))
        .bind(step.award_code.as_deref())
        .bind(status.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}
