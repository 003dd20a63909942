//! Loader role: canonical records into the destination store
//!
//! Records are split into fixed-size batches. Each batch is written in its
//! own transaction with an upsert keyed by the table's key columns, so
//! reloading the same records leaves the table unchanged. A batch that still
//! fails after its retries is counted as failed and the remaining batches
//! carry on.

pub mod destination;
pub mod schema;

use crate::{
    context::PipelineContext,
    entities::CanonicalRecord,
    error::{EtlError, Result},
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

pub use destination::{is_transient, Destination, RawSnapshot, SqlDestination, ARCHIVE_TABLE};
pub use schema::{Column, ColumnType, SqlValue, TableSpec};

/// A batch that could not be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub records: usize,
    pub error: String,
}

/// Outcome of one [`BulkLoader::load`] call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: u64,
    pub failed: u64,
    pub batches: usize,
    pub failed_batches: Vec<BatchFailure>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty()
    }
}

pub struct BulkLoader {
    destination: Arc<dyn Destination>,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
    archive_batches: bool,
}

impl BulkLoader {
    pub fn new(destination: Arc<dyn Destination>, batch_size: usize) -> Self {
        Self {
            destination,
            batch_size: batch_size.max(1),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            archive_batches: false,
        }
    }

    /// Retries per batch after the first attempt, with `delay * attempt` between them
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    /// Archive each successfully written batch
    pub fn with_archive(mut self, enabled: bool) -> Self {
        self.archive_batches = enabled;
        self
    }

    /// Load `records` in batches
    ///
    /// Returns `Err` only when the table cannot be prepared or the run is
    /// cancelled. Batch failures are reported in the [`LoadReport`] and in
    /// the context's error list.
    #[instrument(
        skip_all,
        fields(table = R::TABLE.name, records = records.len(), job_id = %ctx.job_id)
    )]
    pub async fn load<R: CanonicalRecord>(
        &self,
        records: &[R],
        ctx: &mut PipelineContext,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        self.destination.ensure_table(R::TABLE).await?;

        for (batch, chunk) in records.chunks(self.batch_size).enumerate() {
            if ctx.is_cancelled() {
                return Err(EtlError::Cancelled);
            }

            let rows: Vec<Vec<SqlValue>> = chunk.iter().map(CanonicalRecord::values).collect();
            report.batches += 1;

            match self.write_with_retry(R::TABLE, &rows, batch).await {
                Ok(written) => {
                    debug!(batch, written, "Batch loaded");
                    report.loaded += written;
                    if self.archive_batches {
                        self.archive_batch(chunk, ctx).await;
                    }
                },
                Err(e) => {
                    warn!(batch, records = chunk.len(), error = %e, "Batch failed");
                    ctx.add_error(format!("{} batch {batch}: {e}", R::TABLE.name));
                    report.failed += chunk.len() as u64;
                    report.failed_batches.push(BatchFailure {
                        batch,
                        records: chunk.len(),
                        error: e.to_string(),
                    });
                },
            }
        }

        info!(
            loaded = report.loaded,
            failed = report.failed,
            batches = report.batches,
            "Load complete"
        );
        Ok(report)
    }

    async fn write_with_retry(
        &self,
        table: &'static TableSpec,
        rows: &[Vec<SqlValue>],
        batch: usize,
    ) -> std::result::Result<u64, sqlx::Error> {
        let mut attempt = 0u32;
        loop {
            match self.destination.write_batch(table, rows).await {
                Ok(written) => return Ok(written),
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_delay * attempt;
                    warn!(batch, attempt, ?delay, error = %e, "Transient load failure, retrying");
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn archive_batch<R: CanonicalRecord>(&self, chunk: &[R], ctx: &PipelineContext) {
        let payload = match serde_json::to_value(chunk) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Could not serialize batch for archive");
                return;
            },
        };

        let snapshot = RawSnapshot::new(
            &ctx.job_id,
            ctx.entity,
            ctx.award_code.clone(),
            chunk.len(),
            payload,
        );
        if let Err(e) = self.destination.archive(&snapshot).await {
            warn!(error = %e, "Failed to archive loaded batch");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entities::{EntityKind, PayRate, PayRatesTransformer};
    use crate::transform::Transformer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn pay_rates(n: usize, rate: f64) -> Vec<PayRate> {
        (0..n)
            .map(|i| {
                let raw = json!({
                    "classification_fixed_id": i + 1,
                    "award_code": "MA000001",
                    "operative_from": "2024-07-01",
                    "base_rate": rate,
                    "calculated_rate": rate,
                });
                PayRatesTransformer
                    .transform_record(raw.as_object().unwrap())
                    .unwrap()
            })
            .collect()
    }

    fn ctx() -> PipelineContext {
        PipelineContext::new("job-1", EntityKind::PayRates, Some("MA000001".into()))
    }

    async fn sqlite(dir: &tempfile::TempDir) -> Arc<SqlDestination> {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("awards.db").display());
        Arc::new(SqlDestination::connect(&url, 1).await.unwrap())
    }

    /// Fails the listed calls (0-based) with the given error kind
    struct ScriptedDestination {
        calls: Mutex<usize>,
        transient: Vec<usize>,
        permanent: Vec<usize>,
        archived: Mutex<usize>,
    }

    impl ScriptedDestination {
        fn new(transient: Vec<usize>, permanent: Vec<usize>) -> Self {
            Self {
                calls: Mutex::new(0),
                transient,
                permanent,
                archived: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Destination for ScriptedDestination {
        async fn ensure_table(
            &self,
            _table: &'static TableSpec,
        ) -> std::result::Result<(), sqlx::Error> {
            Ok(())
        }

        async fn write_batch(
            &self,
            _table: &'static TableSpec,
            rows: &[Vec<SqlValue>],
        ) -> std::result::Result<u64, sqlx::Error> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls - 1
            };
            if self.transient.contains(&call) {
                return Err(sqlx::Error::PoolTimedOut);
            }
            if self.permanent.contains(&call) {
                return Err(sqlx::Error::ColumnNotFound("base_rate".into()));
            }
            Ok(rows.len() as u64)
        }

        async fn archive(&self, _snapshot: &RawSnapshot) -> std::result::Result<(), sqlx::Error> {
            *self.archived.lock().unwrap() += 1;
            Err(sqlx::Error::PoolClosed)
        }
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = sqlite(&dir).await;
        let loader = BulkLoader::new(dest.clone(), 2);
        let records = pay_rates(5, 25.0);

        let first = loader.load(&records, &mut ctx()).await.unwrap();
        let second = loader.load(&records, &mut ctx()).await.unwrap();

        assert_eq!(first.loaded, 5);
        assert_eq!(first.batches, 3);
        assert_eq!(second, first);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pay_rates")
            .fetch_one(dest.pool())
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_reload_updates_non_key_values() {
        let dir = tempfile::tempdir().unwrap();
        let dest = sqlite(&dir).await;
        let loader = BulkLoader::new(dest.clone(), 10);

        loader.load(&pay_rates(3, 25.0), &mut ctx()).await.unwrap();
        loader.load(&pay_rates(3, 27.5), &mut ctx()).await.unwrap();

        let rates: Vec<f64> = sqlx::query_scalar("SELECT base_rate FROM pay_rates")
            .fetch_all(dest.pool())
            .await
            .unwrap();
        assert_eq!(rates, vec![27.5; 3]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dest = Arc::new(ScriptedDestination::new(vec![0, 1], vec![]));
        let loader = BulkLoader::new(dest.clone(), 10).with_retries(3, Duration::from_millis(1));

        let report = loader.load(&pay_rates(4, 1.0), &mut ctx()).await.unwrap();

        assert_eq!(report.loaded, 4);
        assert!(report.is_complete());
        assert_eq!(*dest.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_siblings() {
        // batch 1 fails for good, batches 0 and 2 succeed
        let dest = Arc::new(ScriptedDestination::new(vec![], vec![1]));
        let loader = BulkLoader::new(dest, 2).with_retries(2, Duration::from_millis(1));
        let mut ctx = ctx();

        let report = loader.load(&pay_rates(6, 1.0), &mut ctx).await.unwrap();

        assert_eq!(report.loaded, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(report.failed_batches.len(), 1);
        assert_eq!(report.failed_batches[0].batch, 1);
        assert_eq!(ctx.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let dest = Arc::new(ScriptedDestination::new((0..10).collect(), vec![]));
        let loader = BulkLoader::new(dest.clone(), 10).with_retries(2, Duration::from_millis(1));

        let report = loader.load(&pay_rates(1, 1.0), &mut ctx()).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(*dest.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_archive_failure_does_not_fail_load() {
        let dest = Arc::new(ScriptedDestination::new(vec![], vec![]));
        let loader = BulkLoader::new(dest.clone(), 2).with_archive(true);

        let report = loader.load(&pay_rates(3, 1.0), &mut ctx()).await.unwrap();

        assert_eq!(report.loaded, 3);
        assert_eq!(*dest.archived.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let dest = Arc::new(ScriptedDestination::new(vec![], vec![]));
        let loader = BulkLoader::new(dest.clone(), 2);
        let mut ctx = ctx();
        ctx.cancel.cancel();

        let err = loader.load(&pay_rates(3, 1.0), &mut ctx).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(*dest.calls.lock().unwrap(), 0);
    }
}
