//! Award ETL Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls paginated award data from the Fair Work Commission API, validates
//! and normalizes each record, and upserts the result into a relational
//! store. Every run is tracked as a job with per-stage steps in a local
//! SQLite state database.
//!
//! # Architecture
//!
//! - **Client**: [`client::RateLimitedClient`] with a rolling one-second
//!   request window and exponential backoff on transient failures
//! - **Extract**: [`extract::Paginator`] walks pages until the source runs
//!   out; [`extract::EndpointExtractor`] binds it to one entity's endpoint
//! - **Transform**: one [`transform::Transformer`] per entity; bad records
//!   are dropped and reported, never fatal to the batch
//! - **Load**: [`load::BulkLoader`] upserts fixed-size batches keyed by each
//!   table's natural key, so reruns are idempotent
//! - **State**: [`state::StateManager`] records jobs and steps
//! - **Orchestrator**: [`orchestrator::Orchestrator`] runs awards, then
//!   every child entity for every award code
//!
//! # Example
//!
//! ```no_run
//! use award_etl::{config::EtlConfig, orchestrator::Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::load()?;
//!     let orchestrator = Orchestrator::connect(config, CancellationToken::new()).await?;
//!     let summary = orchestrator.run_full(None).await?;
//!     println!("{}", serde_json::to_string_pretty(&summary)?);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod extract;
pub mod load;
pub mod orchestrator;
pub mod state;
pub mod transform;

pub use error::{ApiError, EtlError, Result};
