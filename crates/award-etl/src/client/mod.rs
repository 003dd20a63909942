//! Authenticated, rate-limited client for the award data API

pub mod rate_limit;
pub mod retry;

use crate::{
    config::ApiConfig,
    error::{ApiError, EtlError},
};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER},
    Client, Method, StatusCode,
};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the subscription key (`Ocp-Apim-Subscription-Key`)
pub const API_KEY_HEADER: &str = "ocp-apim-subscription-key";

const USER_AGENT: &str = concat!("award-etl/", env!("CARGO_PKG_VERSION"));

/// Error bodies are truncated to this many characters in error messages
const MAX_ERROR_BODY: usize = 500;

/// HTTP client shared by every extractor in a run
///
/// Every call waits on the shared [`RateLimiter`] before each attempt, so
/// retries count against the request ceiling too.
#[derive(Debug)]
pub struct RateLimitedClient {
    http: Client,
    base_url: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl RateLimitedClient {
    pub fn new(config: &ApiConfig) -> Result<Self, EtlError> {
        let mut key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| EtlError::Config("API key contains invalid header characters".into()))?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| EtlError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(config.rate_limit_per_sec),
            retry: RetryPolicy::new(
                config.retry_attempts,
                config.retry_base_delay(),
                config.retry_max_delay(),
            ),
            cancel: CancellationToken::new(),
        })
    }

    /// Abort pending and future requests when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a request and decode the JSON body
    #[instrument(skip(self, params))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let url = url.as_str();

        self.retry
            .run(&self.cancel, |attempt| {
                let method = method.clone();
                async move {
                    self.limiter.acquire().await;
                    debug!(attempt, url, "Sending request");
                    self.send_once(method, url, params).await
                }
            })
            .await
    }

    pub async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        self.request(Method::GET, path, params).await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let response = self
            .http
            .request(method, url)
            .query(params)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await.map_err(ApiError::from_reqwest)?;
            return serde_json::from_slice(&body)
                .map_err(|e| ApiError::InvalidResponse(e.to_string()));
        }

        let retry_after = parse_retry_after(response.headers());
        let body = truncate(response.text().await.unwrap_or_default());

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { retry_after },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
                status: status.as_u16(),
                message: body,
            },
            s if s.is_server_error() => ApiError::Server {
                status: s.as_u16(),
                body,
            },
            s => ApiError::Client {
                status: s.as_u16(),
                body,
            },
        })
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(mut body: String) -> String {
    if let Some((idx, _)) = body.char_indices().nth(MAX_ERROR_BODY) {
        body.truncate(idx);
    }
    body
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn config(server: &MockServer) -> ApiConfig {
        ApiConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            timeout_secs: 5,
            rate_limit_per_sec: 50,
            retry_attempts: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 50,
            ..ApiConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sends_key_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/awards"))
            .and(header(API_KEY_HEADER, "test-key"))
            .and(query_param("page", "2"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RateLimitedClient::new(&config(&server)).unwrap();
        let body = client
            .get("/awards", &[("page", "2".into()), ("limit", "100".into())])
            .await
            .unwrap();

        assert_eq!(body, json!({ "results": [] }));
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/awards"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/awards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [1] })))
            .mount(&server)
            .await;

        let client = RateLimitedClient::new(&config(&server)).unwrap();
        let body = client.get("/awards", &[]).await.unwrap();

        assert_eq!(body["results"], json!([1]));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .expect(3)
            .mount(&server)
            .await;

        let client = RateLimitedClient::new(&config(&server)).unwrap();
        let err = client.get("/awards", &[]).await.unwrap_err();

        assert!(matches!(err, ApiError::Server { status: 502, ref body } if body == "bad gateway"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid subscription key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = RateLimitedClient::new(&config(&server)).unwrap();
        let err = client.get("/awards", &[]).await.unwrap_err();

        assert_eq!(err.kind(), "auth_error");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = RateLimitedClient::new(&config(&server)).unwrap();
        let err = client.get("/awards/XX/pay-rates", &[]).await.unwrap_err();

        assert!(matches!(err, ApiError::Client { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let client = RateLimitedClient::new(&config(&server)).unwrap();
        assert!(client.get("/awards", &[]).await.is_ok());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = RateLimitedClient::new(&config(&server)).unwrap();
        let err = client.get("/awards", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_cancelled_client_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let client = RateLimitedClient::new(&config(&server))
            .unwrap()
            .with_cancellation(token);

        assert!(matches!(
            client.get("/awards", &[]).await,
            Err(ApiError::Cancelled)
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_truncate_error_body() {
        let long = "x".repeat(MAX_ERROR_BODY + 20);
        assert_eq!(truncate(long).len(), MAX_ERROR_BODY);
        assert_eq!(truncate("short".into()), "short");
    }
}
