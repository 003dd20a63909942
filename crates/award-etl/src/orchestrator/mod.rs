//! Orchestrator: composes extract, transform and load per entity and fans
//! child entities out across award codes
//!
//! A full run loads awards first, takes the award codes from what it loaded
//! (or from an explicit list) and then runs every configured child entity
//! for every code. A failing (entity, award code) combination is recorded
//! and the rest of the run carries on.

pub mod summary;

use crate::{
    client::RateLimitedClient,
    config::EtlConfig,
    context::PipelineContext,
    entities::{
        AwardsTransformer, ClassificationsTransformer, EntityKind, ExpenseAllowancesTransformer,
        PayRatesTransformer, PenaltiesTransformer, WageAllowancesTransformer,
    },
    error::{EtlError, Result},
    extract::{EndpointExtractor, ExtractParams, Extractor, Paginator},
    load::{BulkLoader, Destination, SqlDestination},
    state::{JobOutcome, NewStep, StateManager, StepOutcome, StepType},
    transform::Transformer,
};
use chrono::Utc;
use futures::{stream, StreamExt};
use serde_json::json;
use std::{collections::BTreeSet, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub use summary::{RunSummary, RunTotals, SubPipelineResult, SubPipelineStatus};

/// Record errors kept in a transform step's details
const MAX_RECORD_ERROR_DETAILS: usize = 50;

/// `etl_<YYYYMMDD>_<HHMMSS>_<8 hex chars>`
pub fn new_job_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("etl_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

pub struct Orchestrator {
    config: EtlConfig,
    client: Arc<RateLimitedClient>,
    destination: Arc<dyn Destination>,
    state: StateManager,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: EtlConfig,
        client: Arc<RateLimitedClient>,
        destination: Arc<dyn Destination>,
        state: StateManager,
    ) -> Self {
        Self {
            config,
            client,
            destination,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Build the client and connect both stores from configuration
    ///
    /// `cancel` is shared with the client so in-flight requests stop too.
    pub async fn connect(config: EtlConfig, cancel: CancellationToken) -> Result<Self> {
        let client = RateLimitedClient::new(&config.api)?.with_cancellation(cancel.clone());
        let destination =
            SqlDestination::connect(&config.database.url, config.database.max_connections).await?;
        let state = StateManager::connect(&config.state.database_path).await?;

        Ok(
            Self::new(config, Arc::new(client), Arc::new(destination), state)
                .with_cancellation(cancel),
        )
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// Run awards and then every child entity for every award code
    ///
    /// `award_codes` replaces the codes discovered from the awards load.
    /// Returns `Err` only when the job itself cannot be recorded; every
    /// pipeline failure ends up in the summary and the job row.
    #[instrument(skip(self, award_codes))]
    pub async fn run_full(&self, award_codes: Option<Vec<String>>) -> Result<RunSummary> {
        let job_id = new_job_id();

        let stale_after = self.config.state.stale_job_timeout();
        if let Err(e) = self.state.cleanup_stale_jobs(stale_after).await {
            warn!(error = %e, "Stale job cleanup failed");
        }

        let parameters = json!({
            "award_codes": award_codes,
            "child_entities": self.config.orchestrator.child_entities,
        });
        self.state.create_job(&job_id, "full", Some(&parameters)).await?;
        self.state.start_job(&job_id).await?;
        info!(%job_id, "Full run started");

        let mut summary = RunSummary::new(&job_id, Utc::now());
        let run_error = self.execute_full(&job_id, award_codes, &mut summary).await.err();
        summary.finish(run_error.map(|e| e.to_string()));

        let errors = summary.totals.failed.max(usize::from(!summary.is_success()));
        let outcome = JobOutcome {
            status: summary.status,
            total_records: summary.totals.records_loaded as i64,
            error_count: errors as i64,
            warning_count: summary.totals.warnings as i64,
            error_message: summary.error_message.clone(),
        };
        self.state.complete_job(&job_id, &outcome).await?;

        if summary.is_success() {
            info!(%job_id, records = summary.totals.records_loaded, "Full run succeeded");
        } else {
            error!(
                %job_id,
                records = summary.totals.records_loaded,
                error = summary.error_message.as_deref().unwrap_or_default(),
                "Full run failed"
            );
        }
        Ok(summary)
    }

    async fn execute_full(
        &self,
        job_id: &str,
        award_codes: Option<Vec<String>>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let (parent, awards) = self.run_pipeline(&AwardsTransformer, job_id, None).await;
        let parent_error = parent.error.clone();
        summary.set_parent(parent);

        let codes: BTreeSet<String> = match award_codes {
            Some(codes) => codes
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            None => match parent_error {
                Some(e) if awards.is_empty() => {
                    return Err(EtlError::Pipeline(format!(
                        "awards pipeline failed, no award codes to process: {e}"
                    )));
                },
                // a partial awards load still yields every transformed code
                Some(e) => {
                    warn!(
                        awards = awards.len(),
                        error = %e,
                        "Awards pipeline failed, continuing with transformed codes"
                    );
                    awards.into_iter().map(|a| a.code).collect()
                },
                None => awards.into_iter().map(|a| a.code).collect(),
            },
        };

        if self.cancel.is_cancelled() {
            return Err(EtlError::Cancelled);
        }

        info!(
            award_codes = codes.len(),
            entities = self.config.orchestrator.child_entities.len(),
            concurrency = self.config.orchestrator.parent_concurrency,
            "Fanning out child pipelines"
        );
        for code in &codes {
            summary.add_award_code(code);
        }

        let results: Vec<Vec<SubPipelineResult>> = stream::iter(codes)
            .map(|code| async move { self.run_children(job_id, &code).await })
            .buffer_unordered(self.config.orchestrator.parent_concurrency.max(1))
            .collect()
            .await;

        for child in results.into_iter().flatten() {
            summary.add_child(child);
        }

        if self.cancel.is_cancelled() {
            return Err(EtlError::Cancelled);
        }
        Ok(())
    }

    /// Every configured child entity for one award code, in order
    async fn run_children(&self, job_id: &str, award_code: &str) -> Vec<SubPipelineResult> {
        let mut results = Vec::with_capacity(self.config.orchestrator.child_entities.len());
        for &entity in &self.config.orchestrator.child_entities {
            results.push(self.run_entity(entity, job_id, Some(award_code)).await);
        }
        results
    }

    /// Run one entity as its own job
    #[instrument(skip(self))]
    pub async fn run_single_entity(
        &self,
        entity: EntityKind,
        award_code: Option<&str>,
    ) -> Result<SubPipelineResult> {
        if entity.is_child() && award_code.is_none() {
            return Err(EtlError::MissingParameter(crate::entities::PARENT_FIELD));
        }
        let award_code = if entity.is_child() { award_code } else { None };

        let job_id = new_job_id();
        let parameters = json!({ "entity": entity, "award_code": award_code });
        self.state
            .create_job(&job_id, &format!("entity:{entity}"), Some(&parameters))
            .await?;
        self.state.start_job(&job_id).await?;

        let result = self.run_entity(entity, &job_id, award_code).await;

        let outcome = match &result.error {
            None => JobOutcome::success(result.loaded),
            Some(e) => JobOutcome::failed(e.clone(), result.loaded),
        };
        let outcome = outcome.with_counts(usize::from(!result.is_success()), result.warnings);
        self.state.complete_job(&job_id, &outcome).await?;
        Ok(result)
    }

    async fn run_entity(
        &self,
        entity: EntityKind,
        job_id: &str,
        award_code: Option<&str>,
    ) -> SubPipelineResult {
        match entity {
            EntityKind::Awards => self.run_pipeline(&AwardsTransformer, job_id, None).await.0,
            EntityKind::Classifications => {
                self.run_pipeline(&ClassificationsTransformer, job_id, award_code).await.0
            },
            EntityKind::PayRates => {
                self.run_pipeline(&PayRatesTransformer, job_id, award_code).await.0
            },
            EntityKind::ExpenseAllowances => {
                self.run_pipeline(&ExpenseAllowancesTransformer, job_id, award_code)
                    .await
                    .0
            },
            EntityKind::WageAllowances => {
                self.run_pipeline(&WageAllowancesTransformer, job_id, award_code)
                    .await
                    .0
            },
            EntityKind::Penalties => {
                self.run_pipeline(&PenaltiesTransformer, job_id, award_code).await.0
            },
        }
    }

    /// Extract, transform and load one (entity, award code)
    ///
    /// Never fails: errors are captured in the result and the step rows.
    /// Also hands back the transformed records, including when the load
    /// stage failed for some of them.
    #[instrument(skip(self, transformer), fields(entity = %transformer.entity()))]
    async fn run_pipeline<T: Transformer>(
        &self,
        transformer: &T,
        job_id: &str,
        award_code: Option<&str>,
    ) -> (SubPipelineResult, Vec<T::Output>) {
        let entity = transformer.entity();
        let started = Instant::now();
        let mut ctx = PipelineContext::new(job_id, entity, award_code.map(str::to_string))
            .with_cancellation(self.cancel.clone());
        let mut result = SubPipelineResult::new(entity, award_code);
        let mut records = Vec::new();

        if let Err(e) = self
            .run_stages(transformer, &mut ctx, &mut result, &mut records)
            .await
        {
            error!(%entity, ?award_code, kind = e.kind(), error = %e, "Sub-pipeline failed");
            result.fail(&e);
        }

        result.warnings = ctx.record_errors().len();
        result.duration_secs = started.elapsed().as_secs_f64();
        (result, records)
    }

    async fn run_stages<T: Transformer>(
        &self,
        transformer: &T,
        ctx: &mut PipelineContext,
        result: &mut SubPipelineResult,
        records: &mut Vec<T::Output>,
    ) -> Result<()> {
        let entity = ctx.entity;
        let award_code = ctx.award_code.clone();
        let job_id = ctx.job_id.clone();
        let step = |stage| NewStep::new(&job_id, entity, award_code.as_deref(), stage);

        // extract
        let extract = step(StepType::Extract);
        let step_id = self.state.start_step(&extract).await?;
        let params = ExtractParams {
            award_code: award_code.clone(),
        };
        let raw = match self.extractor(entity).extract(&params, ctx).await {
            Ok(raw) => raw,
            Err(e) => return Err(self.fail_step(step_id, e).await),
        };
        result.extracted = raw.len() as u64;
        self.state
            .finish_step(step_id, &StepOutcome::success(result.extracted, 0))
            .await?;

        if raw.is_empty() {
            self.state
                .skip_step(&step(StepType::Transform), "No records extracted")
                .await?;
            self.state
                .skip_step(&step(StepType::Load), "No records extracted")
                .await?;
            return Ok(());
        }

        // transform
        let step_id = self.state.start_step(&step(StepType::Transform)).await?;
        *records = transformer.transform(&raw, ctx);
        let dropped = ctx.record_errors().len() as u64;
        result.transformed = records.len() as u64;
        result.failed += dropped;

        let mut outcome = StepOutcome::success(result.transformed, dropped);
        if dropped > 0 {
            let details: Vec<_> = ctx
                .record_errors()
                .iter()
                .take(MAX_RECORD_ERROR_DETAILS)
                .collect();
            outcome.error_message = Some(format!("{dropped} records failed validation"));
            outcome.error_details = Some(json!({ "record_errors": details }));
        }
        self.state.finish_step(step_id, &outcome).await?;

        if records.is_empty() {
            self.state
                .skip_step(&step(StepType::Load), "No records to load")
                .await?;
            return Ok(());
        }

        // load
        let step_id = self.state.start_step(&step(StepType::Load)).await?;
        let report = match self.loader().load(records.as_slice(), ctx).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail_step(step_id, e).await),
        };
        result.loaded = report.loaded;
        result.failed += report.failed;

        if report.is_complete() {
            self.state
                .finish_step(step_id, &StepOutcome::success(report.loaded, 0))
                .await?;
            return Ok(());
        }

        let err = EtlError::Load(format!(
            "{} of {} batches failed ({} records)",
            report.failed_batches.len(),
            report.batches,
            report.failed
        ));
        let outcome = StepOutcome::failed(
            err.to_string(),
            Some(json!({
                "kind": err.kind(),
                "failed_batches": report.failed_batches,
                "errors": ctx.errors(),
            })),
        )
        .with_counts(report.loaded, report.failed);
        self.state.finish_step(step_id, &outcome).await?;
        Err(err)
    }

    /// Mark a step failed and hand the error back
    async fn fail_step(&self, step_id: i64, err: EtlError) -> EtlError {
        let outcome = StepOutcome::failed(err.to_string(), Some(json!({ "kind": err.kind() })));
        if let Err(state_err) = self.state.finish_step(step_id, &outcome).await {
            warn!(step_id, error = %state_err, "Could not record step failure");
        }
        err
    }

    fn extractor(&self, entity: EntityKind) -> EndpointExtractor {
        let api = &self.config.api;
        let extractor = EndpointExtractor::new(
            entity,
            self.client.clone(),
            Paginator::new(api.page_size, api.max_pages),
        );
        if self.config.database.archive_raw_responses {
            extractor.with_archive(self.destination.clone())
        } else {
            extractor
        }
    }

    fn loader(&self) -> BulkLoader {
        let db = &self.config.database;
        BulkLoader::new(self.destination.clone(), db.batch_size)
            .with_retries(db.load_retry_attempts, db.load_retry_delay())
            .with_archive(db.archive_loaded_batches)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_shape() {
        let id = new_job_id();
        let parts: Vec<&str> = id.split('_').collect();

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "etl");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(new_job_id(), id);
    }
}
