//! Typed entry point for catalog lookups.

use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use partsgate_auth::TokenManager;
use partsgate_core::{Error, Result};

use crate::config::CatalogConfig;
use crate::metrics::CatalogMetrics;
use crate::transport::{GraphQLTransport, RequestOptions};

/// Client for the parts catalog.
///
/// Wraps [`GraphQLTransport`] with typed decoding of the `data` payload and
/// rolling request metrics. Operation timings include every retry attempt
/// of the underlying exchange.
pub struct CatalogClient {
    transport: GraphQLTransport,
    metrics: Mutex<CatalogMetrics>,
}

impl CatalogClient {
    /// Creates a client, building its own token manager from the embedded
    /// OAuth section.
    #[must_use]
    pub fn new(config: CatalogConfig) -> Self {
        let tokens = TokenManager::new(config.oauth.clone());
        Self::with_token_manager(config, tokens)
    }

    /// Creates a client sharing an existing token manager.
    #[must_use]
    pub fn with_token_manager(config: CatalogConfig, tokens: TokenManager) -> Self {
        Self {
            transport: GraphQLTransport::new(config, tokens),
            metrics: Mutex::new(CatalogMetrics::new()),
        }
    }

    /// Executes a GraphQL operation and decodes `data` into `T`.
    ///
    /// # Errors
    ///
    /// Transport errors pass through unchanged; a `data` payload that does
    /// not match `T` maps to a validation error.
    pub async fn request<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        self.request_with_options(query, variables, RequestOptions::default())
            .await
    }

    /// Executes a GraphQL operation with per-request overrides and decodes
    /// `data` into `T`.
    ///
    /// # Errors
    ///
    /// Transport errors pass through unchanged; a `data` payload that does
    /// not match `T` maps to a validation error.
    pub async fn request_with_options<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        options: RequestOptions,
    ) -> Result<T> {
        let started = Instant::now();
        let outcome = self
            .transport
            .request_with_options(query, variables, options)
            .await
            .and_then(|data| {
                serde_json::from_value(data).map_err(|e| {
                    Error::validation(format!(
                        "catalog response did not match the expected shape: {e}"
                    ))
                })
            });
        self.record(started.elapsed(), outcome.is_ok()).await;
        outcome
    }

    /// Executes a GraphQL operation and returns the raw `data` payload.
    ///
    /// # Errors
    ///
    /// Transport errors pass through unchanged.
    pub async fn request_raw(&self, query: &str, variables: Value) -> Result<Value> {
        let started = Instant::now();
        let outcome = self.transport.request(query, variables).await;
        self.record(started.elapsed(), outcome.is_ok()).await;
        outcome
    }

    /// Returns a point-in-time snapshot of the rolling metrics.
    pub async fn metrics(&self) -> CatalogMetrics {
        self.metrics.lock().await.clone()
    }

    async fn record(&self, elapsed: std::time::Duration, success: bool) {
        let mut metrics = self.metrics.lock().await;
        metrics.record(elapsed, success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use partsgate_auth::OAuthConfig;

    #[derive(Debug, Deserialize)]
    struct VehicleData {
        vehicle: Vehicle,
    }

    #[derive(Debug, Deserialize)]
    struct Vehicle {
        vin: String,
        model: String,
    }

    async fn mount_token_endpoint(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
    }

    fn client_for(server: &MockServer) -> CatalogClient {
        let config = CatalogConfig::new(format!("{}/graphql", server.uri()))
            .with_retry_delay_ms(5)
            .with_oauth(OAuthConfig::new(
                format!("{}/oauth/token", server.uri()),
                "catalog-api",
                "s3cret",
            ));
        CatalogClient::new(config)
    }

    #[tokio::test]
    async fn test_typed_request_decodes_data() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "vehicle": { "vin": "WVWZZZ1JZXW000001", "model": "Golf IV" }
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let data: VehicleData = client
            .request("query { vehicle { vin model } }", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(data.vehicle.vin, "WVWZZZ1JZXW000001");
        assert_eq!(data.vehicle.model, "Golf IV");

        let metrics = client.metrics().await;
        assert_eq!(metrics.request_count, 1);
        assert_eq!(metrics.error_count, 0);
        assert!(metrics.last_request_time.is_some());
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_validation_error() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "vehicle": { "vin": 12345 } }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result: Result<VehicleData> = client
            .request("query { vehicle { vin model } }", serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let metrics = client.metrics().await;
        assert_eq!(metrics.request_count, 1);
        assert_eq!(metrics.error_count, 1);
    }

    #[tokio::test]
    async fn test_metrics_track_failures() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let first = client
            .request_raw("query { parts { id } }", serde_json::json!({}))
            .await;
        assert!(first.is_err());
        let second = client
            .request_raw("query { parts { id } }", serde_json::json!({}))
            .await;
        assert!(second.is_err());

        let metrics = client.metrics().await;
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 2);
        assert!(metrics.average_response_time_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_request_raw_returns_untyped_data() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "stockLevels": [1, 2, 3] }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let data = client
            .request_raw("query { stockLevels }", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(data["stockLevels"], serde_json::json!([1, 2, 3]));
    }
}
