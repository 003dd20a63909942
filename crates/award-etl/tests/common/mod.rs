//! Shared fixtures for end-to-end tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use award_etl::{
    client::RateLimitedClient,
    config::{ApiConfig, DatabaseConfig, EtlConfig, OrchestratorConfig, StateConfig},
    entities::EntityKind,
    load::{Destination, SqlDestination},
    orchestrator::Orchestrator,
    state::StateManager,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,award_etl=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Mock API, SQLite destination and state store wired into an orchestrator
pub struct Harness {
    pub server: MockServer,
    pub orchestrator: Orchestrator,
    pub destination: Arc<SqlDestination>,
    pub cancel: CancellationToken,
    _dir: TempDir,
}

impl Harness {
    pub async fn new(children: &[EntityKind]) -> Result<Self> {
        Self::with_concurrency(children, 1).await
    }

    pub async fn with_concurrency(children: &[EntityKind], concurrency: usize) -> Result<Self> {
        Self::build(children, concurrency, |dest| dest as Arc<dyn Destination>).await
    }

    /// Route the orchestrator's writes through `wrap` around the SQLite destination
    pub async fn with_destination<F>(children: &[EntityKind], wrap: F) -> Result<Self>
    where
        F: FnOnce(Arc<SqlDestination>) -> Arc<dyn Destination>,
    {
        Self::build(children, 1, wrap).await
    }

    async fn build<F>(children: &[EntityKind], concurrency: usize, wrap: F) -> Result<Self>
    where
        F: FnOnce(Arc<SqlDestination>) -> Arc<dyn Destination>,
    {
        init_tracing();

        let server = MockServer::start().await;
        let dir = tempfile::tempdir()?;
        let config = EtlConfig {
            api: ApiConfig {
                base_url: server.uri(),
                api_key: "test-key".into(),
                timeout_secs: 5,
                rate_limit_per_sec: 100,
                retry_attempts: 3,
                retry_base_delay_ms: 5,
                retry_max_delay_ms: 20,
                page_size: 50,
                max_pages: None,
            },
            database: DatabaseConfig {
                url: format!("sqlite://{}?mode=rwc", dir.path().join("awards.db").display()),
                max_connections: 1,
                batch_size: 2,
                load_retry_attempts: 1,
                load_retry_delay_ms: 1,
                archive_raw_responses: true,
                archive_loaded_batches: false,
            },
            state: StateConfig {
                database_path: dir.path().join("state.db"),
                stale_job_timeout_minutes: 120,
            },
            orchestrator: OrchestratorConfig {
                parent_concurrency: concurrency,
                child_entities: children.to_vec(),
            },
        };

        let cancel = CancellationToken::new();
        let client = RateLimitedClient::new(&config.api)?.with_cancellation(cancel.clone());
        let destination = Arc::new(
            SqlDestination::connect(&config.database.url, config.database.max_connections).await?,
        );
        let state = StateManager::connect(&config.state.database_path).await?;
        let orchestrator =
            Orchestrator::new(config, Arc::new(client), wrap(destination.clone()), state)
                .with_cancellation(cancel.clone());

        Ok(Self {
            server,
            orchestrator,
            destination,
            cancel,
            _dir: dir,
        })
    }

    /// Serve `records` as the single page of `endpoint`
    pub async fn serve(&self, endpoint: &str, records: Value) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(records)))
            .mount(&self.server)
            .await;
    }

    pub async fn serve_status(&self, endpoint: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status).set_body_string("denied"))
            .mount(&self.server)
            .await;
    }

    pub async fn serve_awards(&self, codes: &[&str]) {
        self.serve("/awards", awards(codes)).await;
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(self.destination.pool())
            .await?;
        Ok(count)
    }

    pub async fn requests_to(&self, endpoint: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == endpoint)
            .count()
    }
}

pub fn page(records: Value) -> Value {
    json!({
        "results": records,
        "_meta": { "current_page": 1, "page_count": 1, "has_more_results": false }
    })
}

pub fn awards(codes: &[&str]) -> Value {
    Value::Array(
        codes
            .iter()
            .enumerate()
            .map(|(i, code)| {
                json!({
                    "award_id": 100 + i,
                    "award_fixed_id": i + 1,
                    "code": code,
                    "name": format!("Award {code}"),
                    "version_number": 3,
                    "published_year": 2024,
                })
            })
            .collect(),
    )
}

pub fn pay_rates(n: usize) -> Value {
    Value::Array(
        (0..n)
            .map(|i| {
                json!({
                    "classification_fixed_id": i + 1,
                    "classification": format!("Level {}", i + 1),
                    "base_rate": 1000.0 + i as f64,
                    "base_rate_type": "Weekly",
                    "operative_from": "2024-07-01T00:00:00+10:00",
                    "published_year": 2024,
                })
            })
            .collect(),
    )
}
