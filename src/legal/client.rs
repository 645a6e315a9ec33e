use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::clock::Sleeper;
use crate::config::{RetryConfig, UpstreamConfig};
use crate::error::UpstreamError;

/// Exponential backoff applied to HTTP 429 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts per request, the first one included
  pub max_attempts: u32,
  /// Wait after the first 429; doubled after each further one
  pub base_delay: Duration,
}

impl RetryPolicy {
  /// Wait before retrying after the `attempt`-th consecutive 429 (0-based).
  pub fn delay_for(&self, attempt: u32) -> Duration {
    self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay: Duration::from_millis(2000),
    }
  }
}

impl From<&RetryConfig> for RetryPolicy {
  fn from(config: &RetryConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      base_delay: Duration::from_millis(config.base_delay_ms),
    }
  }
}

/// Case-management API client.
///
/// Issues one bearer-authenticated call at a time and classifies the outcome;
/// it never caches.
#[derive(Clone)]
pub struct LegalClient {
  http: reqwest::Client,
  base_url: String,
  token: String,
  lawsuits_path: String,
  movements_path: String,
  retry: RetryPolicy,
  sleeper: Arc<dyn Sleeper>,
}

impl LegalClient {
  pub fn new(
    upstream: &UpstreamConfig,
    retry: RetryPolicy,
    token: String,
    sleeper: Arc<dyn Sleeper>,
  ) -> Result<Self> {
    Url::parse(&upstream.base_url)
      .map_err(|e| eyre!("Invalid upstream base_url {}: {}", upstream.base_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("casemirror/", env!("CARGO_PKG_VERSION")))
      .timeout(Duration::from_secs(upstream.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: upstream.base_url.trim_end_matches('/').to_string(),
      token,
      lawsuits_path: upstream.lawsuits_path.clone(),
      movements_path: upstream.movements_path.clone(),
      retry,
      sleeper,
    })
  }

  /// Perform one call, retrying while the upstream answers 429.
  ///
  /// Non-2xx statuses become [`UpstreamError::Status`]; a 2xx body that is
  /// not JSON becomes [`UpstreamError::Malformed`]. An empty 2xx body is
  /// `null`. A `body` is sent as JSON on every attempt.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<&Value>,
  ) -> Result<Value, UpstreamError> {
    let url = self.url(path, query)?;
    let mut attempt = 0u32;

    loop {
      let mut request = self
        .http
        .request(method.clone(), url.clone())
        .bearer_auth(&self.token)
        .header(ACCEPT, "application/json");
      if let Some(body) = body {
        request = request.json(body);
      }

      debug!(%method, path, attempt, "upstream request");
      let response = request.send().await?;
      let status = response.status();

      if status == StatusCode::TOO_MANY_REQUESTS {
        attempt += 1;
        if attempt >= self.retry.max_attempts {
          warn!(path, attempts = attempt, "rate limit retries exhausted");
          return Err(UpstreamError::RateLimited { attempts: attempt });
        }
        let delay = self.retry.delay_for(attempt - 1);
        warn!(
          path,
          attempt,
          delay_ms = delay.as_millis() as u64,
          "rate limited, backing off"
        );
        self.sleeper.sleep(delay).await;
        continue;
      }

      let text = response.text().await?;
      if !status.is_success() {
        return Err(UpstreamError::status(status.as_u16(), &text));
      }
      return parse_body(status.as_u16(), &text);
    }
  }

  pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, UpstreamError> {
    self.request(Method::GET, path, query, None).await
  }

  /// Get one page of the lawsuit list.
  pub async fn lawsuits_page(&self, page: u32, limit: u32) -> Result<Value, UpstreamError> {
    self
      .get(&self.lawsuits_path, &page_query(page, limit))
      .await
  }

  /// Get one page of the movements (docket entries) of a lawsuit.
  pub async fn movements_page(
    &self,
    lawsuit_id: &str,
    page: u32,
    limit: u32,
  ) -> Result<Value, UpstreamError> {
    let path = self.movements_path.replace("{id}", validate_id(lawsuit_id)?);
    self.get(&path, &page_query(page, limit)).await
  }

  fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, UpstreamError> {
    let separator = if path.starts_with('/') { "" } else { "/" };
    let mut url = Url::parse(&format!("{}{}{}", self.base_url, separator, path))?;
    if !query.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (name, value) in query {
        pairs.append_pair(name, value);
      }
    }
    Ok(url)
  }
}

/// Check a lawsuit identifier before it is placed into a URL path.
pub fn validate_id(id: &str) -> Result<&str, UpstreamError> {
  let id = id.trim();
  if id.is_empty() {
    return Err(UpstreamError::invalid("lawsuit id is required"));
  }
  if !id
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
  {
    return Err(UpstreamError::invalid(format!("invalid lawsuit id: {id}")));
  }
  Ok(id)
}

fn page_query(page: u32, limit: u32) -> Vec<(&'static str, String)> {
  vec![("page", page.to_string()), ("limit", limit.to_string())]
}

fn parse_body(status: u16, text: &str) -> Result<Value, UpstreamError> {
  if text.trim().is_empty() {
    return Ok(Value::Null);
  }
  serde_json::from_str(text).map_err(|_| UpstreamError::malformed(status, text))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::testing::RecordingSleeper;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer, sleeper: Arc<RecordingSleeper>) -> LegalClient {
    let upstream = UpstreamConfig {
      base_url: format!("{}/v1", server.uri()),
      ..UpstreamConfig::default()
    };
    LegalClient::new(&upstream, RetryPolicy::default(), "test-token".into(), sleeper).unwrap()
  }

  #[test]
  fn test_backoff_doubles_from_two_seconds() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(0), Duration::from_secs(2));
    assert_eq!(policy.delay_for(1), Duration::from_secs(4));
    assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    assert_eq!(policy.delay_for(3), Duration::from_secs(16));
  }

  #[test]
  fn test_validate_id() {
    assert_eq!(validate_id(" 42 ").unwrap(), "42");
    assert!(validate_id("").is_err());
    assert!(validate_id("   ").is_err());
    assert!(validate_id("../admin").is_err());
  }

  #[tokio::test]
  async fn test_sends_bearer_token_and_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/lawsuits"))
      .and(header("authorization", "Bearer test-token"))
      .and(query_param("page", "2"))
      .and(query_param("limit", "1000"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
      .expect(1)
      .mount(&server)
      .await;

    let client = client(&server, Arc::default());
    let value = client.lawsuits_page(2, 1000).await.unwrap();

    assert_eq!(value, json!({ "data": [] }));
  }

  #[tokio::test]
  async fn test_retries_rate_limit_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/lawsuits"))
      .respond_with(ResponseTemplate::new(429))
      .up_to_n_times(3)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/v1/lawsuits"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
      .mount(&server)
      .await;

    let sleeper = Arc::new(RecordingSleeper::default());
    let client = client(&server, sleeper.clone());
    let value = client.lawsuits_page(1, 1000).await.unwrap();

    assert_eq!(value, json!([{ "id": 1 }]));
    assert_eq!(
      sleeper.waits(),
      vec![
        Duration::from_secs(2),
        Duration::from_secs(4),
        Duration::from_secs(8)
      ]
    );
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
  }

  #[tokio::test]
  async fn test_rate_limit_exhaustion_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(429))
      .mount(&server)
      .await;

    let sleeper = Arc::new(RecordingSleeper::default());
    let client = client(&server, sleeper.clone());
    let err = client.lawsuits_page(1, 1000).await.unwrap_err();

    assert!(matches!(err, UpstreamError::RateLimited { attempts: 5 }));
    assert!(err.is_transient());
    assert_eq!(sleeper.waits().len(), 4);
    assert_eq!(sleeper.total(), Duration::from_secs(2 + 4 + 8 + 16));
    assert_eq!(server.received_requests().await.unwrap().len(), 5);
  }

  #[tokio::test]
  async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
      .expect(1)
      .mount(&server)
      .await;

    let client = client(&server, Arc::default());
    let err = client.lawsuits_page(1, 1000).await.unwrap_err();

    match &err {
      UpstreamError::Status { status, excerpt } => {
        assert_eq!(*status, 503);
        assert_eq!(excerpt, "Service Unavailable");
      }
      other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_transient());
  }

  #[tokio::test]
  async fn test_client_error_is_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "not found" })))
      .mount(&server)
      .await;

    let client = client(&server, Arc::default());
    let err = client.movements_page("77", 1, 100).await.unwrap_err();

    assert!(!err.is_transient());
    assert_eq!(err.http_status(), 404);
  }

  #[tokio::test]
  async fn test_html_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_string("<html><body><h1>502 Bad Gateway</h1></body></html>"),
      )
      .mount(&server)
      .await;

    let client = client(&server, Arc::default());
    let err = client.lawsuits_page(1, 1000).await.unwrap_err();

    assert!(matches!(err, UpstreamError::Malformed { status: 200, .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_empty_body_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;

    let client = client(&server, Arc::default());
    assert_eq!(client.lawsuits_page(1, 10).await.unwrap(), Value::Null);
  }

  #[tokio::test]
  async fn test_movements_path_uses_lawsuit_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/v1/lawsuits/77/movements"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
      .expect(1)
      .mount(&server)
      .await;

    let client = client(&server, Arc::default());
    client.movements_page("77", 1, 100).await.unwrap();
  }

  #[tokio::test]
  async fn test_blank_lawsuit_id_never_reaches_network() {
    let server = MockServer::start().await;
    let client = client(&server, Arc::default());

    let err = client.movements_page(" ", 1, 100).await.unwrap_err();

    assert!(matches!(err, UpstreamError::InvalidRequest(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_body_is_resent_on_every_attempt() {
    let server = MockServer::start().await;
    let filter = json!({ "status": "active" });
    Mock::given(method("POST"))
      .and(path("/v1/lawsuits/search"))
      .and(body_json(&filter))
      .respond_with(ResponseTemplate::new(429))
      .up_to_n_times(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/v1/lawsuits/search"))
      .and(body_json(&filter))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
      .expect(1)
      .mount(&server)
      .await;

    let sleeper = Arc::new(RecordingSleeper::default());
    let client = client(&server, sleeper.clone());
    let value = client
      .request(Method::POST, "/lawsuits/search", &[], Some(&filter))
      .await
      .unwrap();

    assert_eq!(value, json!([{ "id": 1 }]));
    assert_eq!(sleeper.waits(), vec![Duration::from_secs(2)]);
  }
}
