//! Command-line surface for the `award-etl` binary

use crate::{
    entities::EntityKind,
    orchestrator::Orchestrator,
    state::{JobFilter, JobStatus},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "award-etl")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging to the console
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Load awards, then every child entity for every award code
    Run {
        /// Process only these award codes (repeatable)
        #[arg(short, long = "award-code")]
        award_code: Vec<String>,
    },

    /// Run a single entity pipeline
    Entity {
        /// awards, classifications, pay_rates, expense_allowances,
        /// wage_allowances or penalties
        name: EntityKind,

        /// Required for every entity except awards
        #[arg(short, long)]
        award_code: Option<String>,
    },

    /// List recent jobs
    Jobs {
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: i64,

        #[arg(short, long, default_value = "0")]
        offset: i64,
    },

    /// Show one job and its steps
    Job { id: String },

    /// Job statistics over a trailing window
    Stats {
        #[arg(short, long, default_value = "7")]
        days: i64,
    },

    /// Fail jobs stuck in pending or running
    Cleanup {
        /// Defaults to STALE_JOB_TIMEOUT_MINUTES
        #[arg(short, long)]
        max_age_minutes: Option<i64>,
    },
}

/// What a command printed and whether it should fail the process
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub body: Value,
    pub success: bool,
}

impl CommandOutput {
    fn ok(body: Value) -> Self {
        Self {
            body,
            success: true,
        }
    }
}

/// Execute a command against a connected orchestrator
pub async fn execute(command: &Commands, orchestrator: &Orchestrator) -> Result<CommandOutput> {
    let state = orchestrator.state();

    match command {
        Commands::Run { award_code } => {
            let codes = (!award_code.is_empty()).then(|| award_code.clone());
            let summary = orchestrator.run_full(codes).await?;
            Ok(CommandOutput {
                success: summary.is_success(),
                body: serde_json::to_value(&summary)?,
            })
        },

        Commands::Entity { name, award_code } => {
            let result = orchestrator
                .run_single_entity(*name, award_code.as_deref())
                .await?;
            Ok(CommandOutput {
                success: result.is_success(),
                body: serde_json::to_value(&result)?,
            })
        },

        Commands::Jobs {
            status,
            limit,
            offset,
        } => {
            let status = status
                .as_deref()
                .map(str::parse::<JobStatus>)
                .transpose()
                .context("Invalid --status")?;
            let filter = JobFilter {
                status,
                limit: *limit,
                offset: *offset,
            };
            let jobs = state.list_jobs(&filter).await?;
            Ok(CommandOutput::ok(json!({ "jobs": jobs, "count": jobs.len() })))
        },

        Commands::Job { id } => {
            let detail = state
                .get_job(id)
                .await?
                .with_context(|| format!("Job not found: {id}"))?;
            Ok(CommandOutput::ok(serde_json::to_value(&detail)?))
        },

        Commands::Stats { days } => {
            let stats = state.stats(chrono::Duration::days(*days)).await?;
            Ok(CommandOutput::ok(serde_json::to_value(&stats)?))
        },

        Commands::Cleanup { max_age_minutes } => {
            let max_age = max_age_minutes
                .map(chrono::Duration::minutes)
                .unwrap_or_else(|| orchestrator.config().state.stale_job_timeout());
            let cleaned = state.cleanup_stale_jobs(max_age).await?;
            Ok(CommandOutput::ok(json!({
                "cleaned": cleaned,
                "max_age_minutes": max_age.num_minutes(),
            })))
        },
    }
}
