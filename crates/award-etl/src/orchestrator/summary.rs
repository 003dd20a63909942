//! Results reported by the orchestrator

use crate::{entities::EntityKind, error::EtlError, state::JobStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubPipelineStatus {
    Success,
    Failed,
}

/// Outcome of one extract -> transform -> load run for an (entity, award code)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubPipelineResult {
    pub entity: EntityKind,
    pub award_code: Option<String>,
    pub status: SubPipelineStatus,
    pub extracted: u64,
    pub transformed: u64,
    pub loaded: u64,
    /// Records dropped in transform plus records in failed load batches
    pub failed: u64,
    pub warnings: usize,
    /// Stable error label, e.g. `auth_error`
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl SubPipelineResult {
    pub fn new(entity: EntityKind, award_code: Option<&str>) -> Self {
        Self {
            entity,
            award_code: award_code.map(str::to_string),
            status: SubPipelineStatus::Success,
            extracted: 0,
            transformed: 0,
            loaded: 0,
            failed: 0,
            warnings: 0,
            error_kind: None,
            error: None,
            duration_secs: 0.0,
        }
    }

    pub fn fail(&mut self, err: &EtlError) {
        self.status = SubPipelineStatus::Failed;
        self.error_kind = Some(err.kind().to_string());
        self.error = Some(err.to_string());
    }

    pub fn is_success(&self) -> bool {
        self.status == SubPipelineStatus::Success
    }

    /// `entity/award_code (kind)`, for job error messages
    pub fn label(&self) -> String {
        let mut label = self.entity.to_string();
        if let Some(code) = &self.award_code {
            label.push('/');
            label.push_str(code);
        }
        if let Some(kind) = &self.error_kind {
            label.push_str(&format!(" ({kind})"));
        }
        label
    }
}

/// Run-wide counters
///
/// The `records_*` counters cover child pipelines only and feed the job's
/// total. The awards load is counted in `parent_loaded`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub sub_pipelines: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_extracted: u64,
    pub records_loaded: u64,
    pub records_failed: u64,
    pub parent_loaded: u64,
    pub warnings: usize,
}

impl RunTotals {
    pub fn add(&mut self, result: &SubPipelineResult) {
        self.count(result);
        self.records_extracted += result.extracted;
        self.records_loaded += result.loaded;
        self.records_failed += result.failed;
    }

    pub fn add_parent(&mut self, result: &SubPipelineResult) {
        self.count(result);
        self.parent_loaded += result.loaded;
    }

    fn count(&mut self, result: &SubPipelineResult) {
        self.sub_pipelines += 1;
        if result.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.warnings += result.warnings;
    }

    /// Share of sub-pipelines that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.sub_pipelines > 0 {
            (self.succeeded as f64 / self.sub_pipelines as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Everything a full run produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub parent: Option<SubPipelineResult>,
    /// Roll-up per award code: failed if any of its entities failed
    pub award_codes: BTreeMap<String, SubPipelineStatus>,
    pub entities: BTreeMap<EntityKind, BTreeMap<String, SubPipelineResult>>,
    pub totals: RunTotals,
    pub error_message: Option<String>,
}

impl RunSummary {
    pub fn new(job_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Running,
            started_at,
            completed_at: started_at,
            parent: None,
            award_codes: BTreeMap::new(),
            entities: BTreeMap::new(),
            totals: RunTotals::default(),
            error_message: None,
        }
    }

    pub fn set_parent(&mut self, result: SubPipelineResult) {
        self.totals.add_parent(&result);
        self.parent = Some(result);
    }

    /// Ensure a code shows up even if none of its entities ran
    pub fn add_award_code(&mut self, code: &str) {
        self.award_codes
            .entry(code.to_string())
            .or_insert(SubPipelineStatus::Success);
    }

    pub fn add_child(&mut self, result: SubPipelineResult) {
        self.totals.add(&result);
        let code = result.award_code.clone().unwrap_or_default();

        let rollup = self
            .award_codes
            .entry(code.clone())
            .or_insert(SubPipelineStatus::Success);
        if !result.is_success() {
            *rollup = SubPipelineStatus::Failed;
        }

        self.entities
            .entry(result.entity)
            .or_default()
            .insert(code, result);
    }

    pub fn failures(&self) -> impl Iterator<Item = &SubPipelineResult> {
        self.parent
            .iter()
            .chain(self.entities.values().flat_map(BTreeMap::values))
            .filter(|r| !r.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    /// Decide the terminal status
    ///
    /// Any failed sub-pipeline or a run-level error fails the job.
    pub fn finish(&mut self, run_error: Option<String>) {
        self.completed_at = Utc::now();

        let failures: Vec<String> = self.failures().map(SubPipelineResult::label).collect();
        self.error_message = match (run_error, failures.is_empty()) {
            (Some(e), _) => Some(e),
            (None, true) => None,
            (None, false) => Some(format!(
                "{} of {} sub-pipelines failed: {}",
                failures.len(),
                self.totals.sub_pipelines,
                failures.join(", ")
            )),
        };
        self.status = if self.error_message.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Success
        };
    }
}
