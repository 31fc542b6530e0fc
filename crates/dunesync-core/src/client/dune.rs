//! Dune API client - fetches execution result pages
//!
//! Every request goes through a shared token bucket and a pooled reqwest
//! client; failures come back as classified [`SyncError`]s. The client knows
//! nothing about pagination or storage.

use crate::client::{transport_error, CachingResolver, PageSource, RateLimiter};
use crate::error::SyncError;
use async_trait::async_trait;
use dunesync_types::{ClientSettings, ExecutionResultsResponse, PageRequest, PageResult};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

/// Header carrying the API credential
pub const API_KEY_HEADER: &str = "X-Dune-API-Key";

/// Longest error body kept in an [`SyncError::UnexpectedStatus`]
const MAX_ERROR_BODY: usize = 512;

/// Rate-limited client for the execution results endpoint
#[derive(Clone)]
pub struct DuneClient {
    /// HTTP client
    client: Client,
    base_url: Url,
    api_key: String,
    content_type: String,
    rate_limiter: RateLimiter,
    cancel: CancellationToken,
}

impl DuneClient {
    /// Create a new client from settings and a static API key
    pub fn new(settings: &ClientSettings, api_key: impl Into<String>) -> Result<Self, SyncError> {
        let requests_per_minute = NonZeroU32::new(settings.requests_per_minute).ok_or_else(|| {
            SyncError::InvalidConfig("requests_per_minute must be greater than zero".to_string())
        })?;

        let base_url = Url::parse(&settings.api_base_url).map_err(|e| {
            SyncError::InvalidConfig(format!("invalid api_base_url {}: {}", settings.api_base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidConfig(format!(
                "api_base_url cannot be a base: {}",
                settings.api_base_url
            )));
        }

        // reqwest has no separate write timeout; connection setup is the
        // bounded write-side phase
        let client = Client::builder()
            .user_agent(concat!("dunesync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.write_timeout())
            .read_timeout(settings.read_timeout())
            .timeout(settings.request_timeout())
            .pool_idle_timeout(settings.idle_connection_timeout())
            .dns_resolver(Arc::new(CachingResolver::new(settings.dns_cache_ttl())))
            .build()
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            content_type: settings.content_type.clone(),
            rate_limiter: RateLimiter::per_minute(requests_per_minute),
            cancel: CancellationToken::new(),
        })
    }

    /// Abort permit waits when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build `.../query/{execution_id}/results?offset=..&limit=..&allow_partial_results=true`
    pub fn results_url(&self, request: &PageRequest) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidConfig("api_base_url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(&["query", &request.execution_id.to_string(), "results"]);
        url.query_pairs_mut()
            .append_pair("offset", &request.offset.to_string())
            .append_pair("limit", &request.limit.to_string())
            .append_pair("allow_partial_results", "true");
        Ok(url)
    }

    /// Block until the limiter yields a permit or the run is cancelled
    async fn throttle(&self) -> Result<(), SyncError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SyncError::RateLimiterWait),
            _ = self.rate_limiter.acquire() => Ok(()),
        }
    }

    /// Fetch one page of execution results
    pub async fn fetch_page(&self, request: PageRequest) -> Result<PageResult, SyncError> {
        let url = self.results_url(&request)?;

        self.throttle().await?;

        debug!(
            "Fetching execution {} offset {} limit {}",
            request.execution_id, request.offset, request.limit
        );

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, &self.content_type)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            error!("Invalid HTTP response code: {}", status.as_u16());
            return Err(SyncError::UnexpectedStatus {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        let parsed: ExecutionResultsResponse = serde_json::from_slice(&body)
            .map_err(|e| SyncError::MalformedResponse(e.to_string()))?;

        Ok(parsed.into())
    }
}

#[async_trait]
impl PageSource for DuneClient {
    async fn fetch_page(&self, request: PageRequest) -> Result<PageResult, SyncError> {
        DuneClient::fetch_page(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use dunesync_types::ExecutionState;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> ClientSettings {
        ClientSettings {
            api_base_url: format!("{}/api/v1", server.uri()),
            requests_per_minute: 6000,
            request_timeout_secs: 5,
            ..ClientSettings::default()
        }
    }

    fn results_body(next_offset: Option<u64>) -> serde_json::Value {
        serde_json::json!({
            "execution_id": "01HV0000000000000000000000",
            "error": null,
            "execution_started_at": "2024-04-08T00:00:00Z",
            "execution_ended_at": "2024-04-08T00:01:00Z",
            "next_offset": next_offset,
            "result": {
                "rows": [
                    { "address": "0xaaa", "total_gas_used": 21000 },
                    { "address": "0xbbb", "total_gas_used": "42000" }
                ]
            },
            "state": "QUERY_STATE_COMPLETED"
        })
    }

    #[test]
    fn test_results_url() {
        let settings = ClientSettings {
            api_base_url: "https://api.dune.com/api/v1/".to_string(),
            ..ClientSettings::default()
        };
        let client = DuneClient::new(&settings, "key").unwrap();
        let url = client.results_url(&PageRequest::new(3600529, 4000, 2000)).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.dune.com/api/v1/query/3600529/results?offset=4000&limit=2000&allow_partial_results=true"
        );
    }

    #[test]
    fn test_zero_rpm_is_rejected() {
        let settings = ClientSettings {
            requests_per_minute: 0,
            ..ClientSettings::default()
        };
        assert!(matches!(
            DuneClient::new(&settings, "key"),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_page_success() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/query/3600529/results"))
            .and(query_param("offset", "2000"))
            .and(query_param("limit", "2000"))
            .and(query_param("allow_partial_results", "true"))
            .and(header(API_KEY_HEADER, "test-api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results_body(Some(4000))))
            .expect(1)
            .mount(&server)
            .await;

        let client = DuneClient::new(&settings_for(&server), "test-api-key").unwrap();
        let page = client
            .fetch_page(PageRequest::new(3600529, 2000, 2000))
            .await
            .unwrap();

        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.state, ExecutionState::Completed);
        assert_eq!(page.next_offset, Some(4000));
        assert_eq!(page.rows[0]["address"], "0xaaa");
    }

    #[tokio::test]
    async fn test_unexpected_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid API key"))
            .mount(&server)
            .await;

        let client = DuneClient::new(&settings_for(&server), "bad").unwrap();
        let err = client
            .fetch_page(PageRequest::new(1, 0, 10))
            .await
            .unwrap_err();

        match err {
            SyncError::UnexpectedStatus { status, ref message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid API key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limited_status_is_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit exceeded"))
            .mount(&server)
            .await;

        let client = DuneClient::new(&settings_for(&server), "key").unwrap();
        let err = client
            .fetch_page(PageRequest::new(1, 0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnexpectedStatus { status: 429, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let client = DuneClient::new(&settings_for(&server), "key").unwrap();
        let err = client
            .fetch_page(PageRequest::new(1, 0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_request_timeout_is_classified() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(results_body(None))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let settings = ClientSettings {
            request_timeout_secs: 1,
            ..settings_for(&server)
        };
        let client = DuneClient::new(&settings, "key").unwrap();
        let err = client
            .fetch_page(PageRequest::new(1, 0, 10))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_closed_connection_is_classified() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let settings = ClientSettings {
            api_base_url: format!("http://{}/api/v1", addr),
            requests_per_minute: 6000,
            ..ClientSettings::default()
        };
        let client = DuneClient::new(&settings, "key").unwrap();
        let err = client
            .fetch_page(PageRequest::new(1, 0, 10))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Transport {
                kind: TransportErrorKind::ConnectionClosed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_requests_are_throttled() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results_body(None)))
            .expect(3)
            .mount(&server)
            .await;

        let settings = ClientSettings {
            requests_per_minute: 600, // one every 100ms
            ..settings_for(&server)
        };
        let client = DuneClient::new(&settings, "key").unwrap();

        let start = Instant::now();
        for offset in [0, 10, 20] {
            client.fetch_page(PageRequest::new(1, offset, 10)).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_permit() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(results_body(None)))
            .expect(1)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let settings = ClientSettings {
            requests_per_minute: 1,
            ..settings_for(&server)
        };
        let client = DuneClient::new(&settings, "key")
            .unwrap()
            .with_cancellation(token.clone());

        client.fetch_page(PageRequest::new(1, 0, 10)).await.unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = client
            .fetch_page(PageRequest::new(1, 10, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RateLimiterWait));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
