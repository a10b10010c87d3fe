//! HTTP transport for GraphQL operations against the catalog.
//!
//! The transport owns retry/backoff behavior and status-code
//! classification. One logical request may issue several attempts, strictly
//! one at a time:
//!
//! - 5xx responses, request timeouts, and network failures are retried with
//!   exponential backoff (`retry_delay * 2^(attempt-1)`).
//! - 429 responses are retried with at least the server's `Retry-After`
//!   hint.
//! - A 401/403 triggers one immediate re-authentication: the cached token
//!   is cleared and the request is re-sent once without consuming retry
//!   budget. A second rejection surfaces an authentication error.
//! - Any other non-200 status, GraphQL-level `errors`, and a missing
//!   `data` field fail immediately without retrying.
//!
//! Exhausting the budget surfaces the last observed error unchanged.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use serde_json::{Value, json};

use partsgate_auth::TokenManager;
use partsgate_core::{Error, Result};

use crate::config::CatalogConfig;

/// Per-request overrides for timeout, retry policy, and headers.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the configured per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Overrides the configured retry budget.
    pub retry_attempts: Option<u32>,
    /// Overrides the configured base backoff delay.
    pub retry_delay: Option<Duration>,
    /// GraphQL operation name sent alongside the query.
    pub operation_name: Option<String>,
    /// Extra headers attached to every attempt of this request.
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt timeout for this request.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry budget for this request.
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Sets the base backoff delay for this request.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Sets the GraphQL operation name.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Adds an extra header to this request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Wire shape of a GraphQL response envelope.
#[derive(Debug, Deserialize)]
struct GraphQLEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQLErrorEntry>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorEntry {
    message: String,
}

/// Outcome of a single HTTP attempt.
enum AttemptOutcome {
    /// 200 with a usable `data` payload.
    Success(Value),
    /// Transient failure worth another attempt if budget remains.
    Retryable {
        error: Error,
        /// Server-mandated minimum delay before the next attempt.
        min_delay: Option<Duration>,
    },
    /// 401/403: the token may be stale, one immediate re-auth is allowed.
    AuthChallenge(Error),
    /// Non-retryable failure, surfaced as-is.
    Fatal(Error),
}

/// Sends GraphQL operations to the catalog with retries and
/// re-authentication.
pub struct GraphQLTransport {
    http_client: reqwest::Client,
    tokens: TokenManager,
    config: CatalogConfig,
}

impl GraphQLTransport {
    /// Creates a new transport for the configured endpoint.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(config: CatalogConfig, tokens: TokenManager) -> Self {
        let http_client = reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            tokens,
            config,
        }
    }

    /// Executes a GraphQL operation and returns its `data` payload.
    ///
    /// # Errors
    ///
    /// See the module documentation for the classification rules.
    pub async fn request(&self, query: &str, variables: Value) -> Result<Value> {
        self.request_with_options(query, variables, RequestOptions::default())
            .await
    }

    /// Executes a GraphQL operation with per-request overrides.
    ///
    /// # Errors
    ///
    /// See the module documentation for the classification rules.
    pub async fn request_with_options(
        &self,
        query: &str,
        variables: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        let timeout = options.timeout.unwrap_or_else(|| self.config.request_timeout());
        let retry_attempts = options.retry_attempts.unwrap_or(self.config.retry_attempts);
        let retry_delay = options.retry_delay.unwrap_or_else(|| self.config.retry_delay());

        let mut body = json!({
            "query": query,
            "variables": variables,
        });
        if let Some(name) = &options.operation_name {
            body["operationName"] = json!(name);
        }

        let mut attempt: u32 = 0;
        let mut auth_retried = false;

        loop {
            match self.attempt(&body, timeout, &options.headers).await {
                AttemptOutcome::Success(data) => return Ok(data),
                AttemptOutcome::Fatal(error) => return Err(error),
                AttemptOutcome::AuthChallenge(error) => {
                    if auth_retried {
                        return Err(error);
                    }
                    // One free retry with a fresh token; does not count
                    // against the retry budget and takes no backoff.
                    auth_retried = true;
                    self.tokens.clear_token().await;
                    tracing::debug!("Catalog rejected authorization, retrying with a fresh token");
                }
                AttemptOutcome::Retryable { error, min_delay } => {
                    if attempt >= retry_attempts {
                        return Err(error);
                    }
                    let mut delay = backoff_delay(attempt, retry_delay);
                    if let Some(min) = min_delay {
                        delay = delay.max(min);
                    }
                    tracing::warn!(
                        "Catalog request failed ({}), retrying in {:?} ({}/{} retries used)",
                        error,
                        delay,
                        attempt + 1,
                        retry_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Performs one HTTP attempt and classifies its outcome.
    async fn attempt(
        &self,
        body: &Value,
        timeout: Duration,
        headers: &[(String, String)],
    ) -> AttemptOutcome {
        // 1. Fresh authorization header for every attempt.
        let authorization = match self.tokens.authorization_header().await {
            Ok(header) => header,
            // Token endpoint outages are as transient as catalog 5xx;
            // credential rejections are not.
            Err(error @ Error::ExternalService { .. }) => {
                return AttemptOutcome::Retryable {
                    error,
                    min_delay: None,
                };
            }
            Err(error) => return AttemptOutcome::Fatal(error),
        };

        // 2. Send the request under its timeout.
        let mut request = self
            .http_client
            .post(&self.config.endpoint)
            .timeout(timeout)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return AttemptOutcome::Retryable {
                    error: Error::external_service(format!(
                        "catalog request timed out after {timeout:?}"
                    )),
                    min_delay: None,
                };
            }
            Err(e) => {
                return AttemptOutcome::Retryable {
                    error: Error::external_service(format!("catalog request failed: {e}")),
                    min_delay: None,
                };
            }
        };

        // 3. Classify the status code.
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return AttemptOutcome::AuthChallenge(Error::authentication(format!(
                "catalog rejected authorization (HTTP {status})"
            )));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let hint = retry_after_hint(response.headers());
            return AttemptOutcome::Retryable {
                error: Error::rate_limited(
                    "catalog rate limited the request (HTTP 429)",
                    hint.map(|d| d.as_millis() as u64),
                ),
                min_delay: hint,
            };
        }
        if status.is_server_error() {
            let body_text = response.text().await.unwrap_or_default();
            return AttemptOutcome::Retryable {
                error: Error::external_service(format!(
                    "catalog returned HTTP {status} - {body_text}"
                )),
                min_delay: None,
            };
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return AttemptOutcome::Fatal(Error::external_service(format!(
                "catalog returned HTTP {status} - {body_text}"
            )));
        }

        // 4. Decode the GraphQL envelope.
        let envelope: GraphQLEnvelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                return AttemptOutcome::Fatal(Error::external_service(format!(
                    "catalog returned an unreadable response body: {e}"
                )));
            }
        };

        if let Some(errors) = &envelope.errors
            && !errors.is_empty()
        {
            let joined = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return AttemptOutcome::Fatal(Error::external_service(format!(
                "GraphQL errors: {joined}"
            )));
        }

        match envelope.data {
            Some(data) if !data.is_null() => AttemptOutcome::Success(data),
            _ => AttemptOutcome::Fatal(Error::external_service(
                "catalog response had no data field",
            )),
        }
    }
}

/// Backoff before retry number `attempt + 1`: `base * 2^attempt`.
fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Parses an integral-seconds `Retry-After` header, ignoring other forms.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    use partsgate_auth::OAuthConfig;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_token_endpoint(server: &MockServer, expect: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .expect(expect)
            .mount(server)
            .await;
    }

    fn transport_for(server: &MockServer) -> GraphQLTransport {
        let config = CatalogConfig::new(format!("{}/graphql", server.uri()))
            .with_retry_delay_ms(5)
            .with_oauth(OAuthConfig::new(
                format!("{}/oauth/token", server.uri()),
                "catalog-api",
                "s3cret",
            ));
        let tokens = TokenManager::new(config.oauth.clone());
        GraphQLTransport::new(config, tokens)
    }

    fn data_body() -> serde_json::Value {
        serde_json::json!({
            "data": { "vehicle": { "vin": "WVWZZZ1JZXW000001" } }
        })
    }

    #[test]
    fn test_backoff_schedule_doubles_from_base() {
        let base = Duration::from_millis(1_000);
        assert_eq!(backoff_delay(0, base), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(1, base), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(4_000));
    }

    #[test]
    fn test_retry_after_hint_parses_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(2)));

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after_hint(&headers), None);

        assert_eq!(retry_after_hint(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_success_returns_data_payload() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(data_body()))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let data = transport
            .request("query { vehicle { vin } }", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(data["vehicle"]["vin"], "WVWZZZ1JZXW000001");
    }

    #[tokio::test]
    async fn test_retry_budget_is_exactly_attempts_plus_one() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let result = transport
            .request("query { parts { id } }", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(Error::ExternalService { .. })));
    }

    #[tokio::test]
    async fn test_first_401_retries_once_with_fresh_token() {
        let server = MockServer::start().await;
        // Initial token, then a second fetch after clear_token.
        mount_token_endpoint(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(data_body()))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let data = transport
            .request("query { vehicle { vin } }", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(data["vehicle"]["vin"], "WVWZZZ1JZXW000001");
    }

    #[tokio::test]
    async fn test_second_401_fails_without_third_attempt() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let result = transport
            .request("query { vehicle { vin } }", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(Error::Authentication { .. })));
    }

    #[tokio::test]
    async fn test_graphql_errors_fail_without_retry() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": [
                    { "message": "boom" },
                    { "message": "part not indexed" },
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let result = transport
            .request("query { parts { id } }", serde_json::json!({}))
            .await;
        match result {
            Err(Error::ExternalService { message }) => {
                assert!(message.contains("boom"), "message was: {message}");
                assert!(message.contains("part not indexed"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_data_fails_without_retry() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let result = transport
            .request("query { parts { id } }", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(Error::ExternalService { .. })));
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(400).set_body_string("malformed query"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let result = transport
            .request("query {", serde_json::json!({}))
            .await;
        match result {
            Err(Error::ExternalService { message }) => {
                assert!(message.contains("400"), "message was: {message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_after_budget() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let result = transport
            .request_with_options(
                "query { parts { id } }",
                serde_json::json!({}),
                RequestOptions::new().with_retry_attempts(1),
            )
            .await;
        assert!(matches!(result, Err(Error::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(data_body())
                    .set_delay(Duration::from_millis(250)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        let result = transport
            .request_with_options(
                "query { vehicle { vin } }",
                serde_json::json!({}),
                RequestOptions::new()
                    .with_timeout(Duration::from_millis(50))
                    .with_retry_attempts(1),
            )
            .await;
        match result {
            Err(Error::ExternalService { message }) => {
                assert!(message.contains("timed out"), "message was: {message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_extra_headers_and_operation_name_are_sent() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("x-request-id", "req-42"))
            .and(body_string_contains("VehicleByVin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(data_body()))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport_for(&server);
        transport
            .request_with_options(
                "query VehicleByVin($vin: String!) { vehicle(vin: $vin) { vin } }",
                serde_json::json!({ "vin": "WVWZZZ1JZXW000001" }),
                RequestOptions::new()
                    .with_operation_name("VehicleByVin")
                    .with_header("x-request-id", "req-42"),
            )
            .await
            .unwrap();
    }
}
