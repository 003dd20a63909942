//! Extractor role: endpoint + paginator -> raw records

pub mod paginator;

use crate::{
    client::RateLimitedClient,
    context::{PipelineContext, RawRecord},
    entities::{EntityKind, PARENT_FIELD},
    error::{EtlError, Result},
    load::{Destination, RawSnapshot},
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub use paginator::{Page, PaginationMeta, Paginator};

/// Parameters for one extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractParams {
    /// Required for child entities
    pub award_code: Option<String>,
}

impl ExtractParams {
    pub fn for_award(code: impl Into<String>) -> Self {
        Self {
            award_code: Some(code.into()),
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn entity(&self) -> EntityKind;

    async fn extract(
        &self,
        params: &ExtractParams,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<RawRecord>>;
}

/// Extracts one entity type from its API endpoint
///
/// Child records are tagged with the award code they were fetched under,
/// overriding whatever the payload carried. When an archive destination is
/// configured the raw batch is written to it after a successful fetch;
/// archive failures are logged and otherwise ignored.
pub struct EndpointExtractor {
    entity: EntityKind,
    client: Arc<RateLimitedClient>,
    paginator: Paginator,
    archive: Option<Arc<dyn Destination>>,
}

impl EndpointExtractor {
    pub fn new(entity: EntityKind, client: Arc<RateLimitedClient>, paginator: Paginator) -> Self {
        Self {
            entity,
            client,
            paginator,
            archive: None,
        }
    }

    pub fn with_archive(mut self, destination: Arc<dyn Destination>) -> Self {
        self.archive = Some(destination);
        self
    }

    async fn archive_batch(&self, records: &[RawRecord], ctx: &PipelineContext) {
        let Some(destination) = &self.archive else {
            return;
        };

        let payload = Value::Array(records.iter().cloned().map(Value::Object).collect());
        let snapshot = RawSnapshot::new(
            &ctx.job_id,
            self.entity,
            ctx.award_code.clone(),
            records.len(),
            payload,
        );
        if let Err(e) = destination.archive(&snapshot).await {
            warn!(
                job_id = %ctx.job_id,
                entity = %self.entity,
                error = %e,
                "Failed to archive raw response"
            );
        }
    }
}

#[async_trait]
impl Extractor for EndpointExtractor {
    fn entity(&self) -> EntityKind {
        self.entity
    }

    #[instrument(skip(self, ctx), fields(entity = %self.entity, job_id = %ctx.job_id))]
    async fn extract(
        &self,
        params: &ExtractParams,
        ctx: &mut PipelineContext,
    ) -> Result<Vec<RawRecord>> {
        let award_code = match (self.entity.is_child(), params.award_code.as_deref()) {
            (true, None) => return Err(EtlError::MissingParameter(PARENT_FIELD)),
            (true, Some(code)) => Some(code),
            (false, _) => None,
        };
        let path = self.entity.path(award_code)?;

        if ctx.is_cancelled() {
            return Err(EtlError::Cancelled);
        }

        let client = &self.client;
        let path = path.as_str();
        let mut records = self
            .paginator
            .fetch_all(|page, limit| async move {
                client
                    .get(path, &[("page", page.to_string()), ("limit", limit.to_string())])
                    .await
            })
            .await?;

        if let Some(code) = award_code {
            for record in &mut records {
                record.insert(PARENT_FIELD.to_string(), Value::String(code.to_string()));
            }
        }

        info!(records = records.len(), ?award_code, "Extraction complete");
        self.archive_batch(&records, ctx).await;
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn client(server: &MockServer) -> Arc<RateLimitedClient> {
        let config = ApiConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            retry_base_delay_ms: 5,
            ..ApiConfig::default()
        };
        Arc::new(RateLimitedClient::new(&config).unwrap())
    }

    #[tokio::test]
    async fn test_child_records_are_tagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/awards/MA000001/pay-rates"))
            .and(query_param("page", "1"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "classification_fixed_id": 1, "award_code": "WRONG" },
                    { "classification_fixed_id": 2 },
                ],
                "_meta": { "current_page": 1, "page_count": 1, "has_more_results": false }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let extractor =
            EndpointExtractor::new(EntityKind::PayRates, client(&server), Paginator::new(50, None));
        let mut ctx = PipelineContext::new("job", EntityKind::PayRates, Some("MA000001".into()));
        let records = extractor
            .extract(&ExtractParams::for_award("MA000001"), &mut ctx)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["award_code"] == json!("MA000001")));
    }

    #[tokio::test]
    async fn test_child_without_award_code_is_precondition_failure() {
        let server = MockServer::start().await;
        let extractor = EndpointExtractor::new(
            EntityKind::Classifications,
            client(&server),
            Paginator::new(100, None),
        );
        let mut ctx = PipelineContext::new("job", EntityKind::Classifications, None);

        let err = extractor
            .extract(&ExtractParams::default(), &mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::MissingParameter("award_code")));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parent_walks_all_pages() {
        let server = MockServer::start().await;
        for page in 1..=2 {
            Mock::given(method("GET"))
                .and(path("/awards"))
                .and(query_param("page", page.to_string()))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "results": [{ "code": format!("MA00000{page}") }],
                    "_meta": { "current_page": page, "page_count": 2, "has_more_results": page < 2 }
                })))
                .mount(&server)
                .await;
        }

        let extractor =
            EndpointExtractor::new(EntityKind::Awards, client(&server), Paginator::new(1, None));
        let mut ctx = PipelineContext::new("job", EntityKind::Awards, None);
        let records = extractor
            .extract(&ExtractParams::default(), &mut ctx)
            .await
            .unwrap();

        let codes: Vec<_> = records.iter().map(|r| r["code"].clone()).collect();
        assert_eq!(codes, vec![json!("MA000001"), json!("MA000002")]);
        assert!(records.iter().all(|r| !r.contains_key("award_code")));
    }
}
