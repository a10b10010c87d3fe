//! Access token acquisition and caching.
//!
//! This module owns the OAuth2 `client_credentials` exchange against the
//! catalog's token endpoint and keeps the resulting token cached until it
//! approaches expiry.
//!
//! # Single-flight refresh
//!
//! Refreshing is coalesced: when a refresh is already in flight, every other
//! caller joins it and observes the same outcome (one result or one failure)
//! instead of issuing its own HTTP request. The in-flight refresh is held as
//! a shared future; whichever caller finishes the await first clears the
//! slot so the next refresh starts fresh.
//!
//! # Expiry handling
//!
//! A cached token is served only while `now < expires_at - refresh_buffer`
//! (buffer default 60 seconds). Once the remaining lifetime drops to the
//! buffer, the next caller triggers a refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use partsgate_core::{Error, Result};

use crate::config::OAuthConfig;

/// A cached access token with its expiry metadata.
///
/// Replaced wholesale on each successful refresh, never mutated in place.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    /// The opaque access token.
    pub access_token: String,
    /// Token type used to build the authorization header, usually `Bearer`.
    pub token_type: String,
    /// Absolute instant after which the token is no longer accepted.
    pub expires_at: Instant,
    /// Refresh token, when the endpoint issues one.
    pub refresh_token: Option<String>,
    /// Scope granted by the endpoint, when echoed back.
    pub scope: Option<String>,
}

impl TokenInfo {
    /// Returns the `Authorization` header value for this token.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Returns `true` if the token is still usable at `now` given the
    /// refresh buffer, i.e. `now < expires_at - buffer`.
    #[must_use]
    pub fn is_valid_at(&self, now: Instant, buffer: Duration) -> bool {
        now + buffer < self.expires_at
    }

    fn is_valid(&self, buffer: Duration) -> bool {
        self.is_valid_at(Instant::now(), buffer)
    }

    fn from_response(response: TokenResponse) -> Result<Self> {
        if response.access_token.is_empty() {
            return Err(Error::authentication(
                "token endpoint response carried an empty access_token",
            ));
        }
        Ok(Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
            refresh_token: response.refresh_token,
            scope: response.scope,
        })
    }
}

/// Wire shape of the token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenInfo>>>;

/// Manages the access token for the catalog service.
///
/// The manager is cheap to clone; clones share the same cached token and
/// refresh state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    /// HTTP client for the token endpoint.
    http_client: reqwest::Client,
    /// Grant parameters and timing knobs.
    config: OAuthConfig,
    /// The current token, if any.
    cached: RwLock<Option<TokenInfo>>,
    /// The in-flight refresh, if one is outstanding.
    refresh_slot: Mutex<Option<RefreshFuture>>,
}

impl TokenManager {
    /// Creates a new token manager with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            inner: Arc::new(ManagerInner {
                http_client,
                config,
                cached: RwLock::new(None),
                refresh_slot: Mutex::new(None),
            }),
        }
    }

    /// Returns a valid access token, refreshing when needed.
    ///
    /// The cached token is returned while it has more than the refresh
    /// buffer of lifetime left; otherwise a refresh is performed (or an
    /// in-flight one joined).
    ///
    /// # Errors
    ///
    /// Returns an error if a refresh is needed and fails; see
    /// [`refresh_token`](Self::refresh_token).
    pub async fn get_valid_token(&self) -> Result<TokenInfo> {
        {
            let cached = self.inner.cached.read().await;
            if let Some(token) = cached.as_ref()
                && token.is_valid(self.inner.config.refresh_buffer())
            {
                return Ok(token.clone());
            }
        }

        self.refresh_token().await
    }

    /// Returns the `Authorization` header value for a valid token,
    /// e.g. `"Bearer abc"`.
    ///
    /// # Errors
    ///
    /// Returns an error if no valid token can be obtained.
    pub async fn authorization_header(&self) -> Result<String> {
        let token = self.get_valid_token().await?;
        Ok(token.authorization_header())
    }

    /// Fetches a fresh token, joining an in-flight refresh when one exists.
    ///
    /// Exactly one HTTP request is issued per outstanding refresh no matter
    /// how many callers are waiting on it; all of them observe the same
    /// result or the same failure.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] if the endpoint rejects the credentials
    ///   (401/403) or returns an empty `access_token`.
    /// - [`Error::Validation`] if a 2xx response body is not valid token JSON.
    /// - [`Error::ExternalService`] for any other HTTP or network failure.
    pub async fn refresh_token(&self) -> Result<TokenInfo> {
        let fut = {
            let mut slot = self.inner.refresh_slot.lock().await;
            if let Some(existing) = slot.as_ref() {
                tracing::debug!("Joining in-flight token refresh");
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let fut: RefreshFuture =
                    async move { inner.fetch_token().await }.boxed().shared();
                *slot = Some(fut.clone());
                fut
            }
        };

        let result = fut.clone().await;

        // First caller through clears the slot; later callers see either an
        // empty slot or a newer flight and leave it alone.
        {
            let mut slot = self.inner.refresh_slot.lock().await;
            if let Some(current) = slot.as_ref()
                && current.ptr_eq(&fut)
            {
                *slot = None;
            }
        }

        result
    }

    /// Discards the cached token, forcing the next [`get_valid_token`]
    /// call to refresh.
    ///
    /// Called by the transport after the catalog answers 401/403 with a
    /// token that was presumed valid.
    ///
    /// [`get_valid_token`]: Self::get_valid_token
    pub async fn clear_token(&self) {
        let mut cached = self.inner.cached.write().await;
        if cached.take().is_some() {
            tracing::debug!("Cached access token cleared");
        }
        drop(cached);

        // Also drop the in-flight marker: a refresh started before the
        // rejection was observed may resolve to the token that was just
        // rejected. Callers already joined on it keep their clones.
        let mut slot = self.inner.refresh_slot.lock().await;
        *slot = None;
    }
}

impl ManagerInner {
    /// Performs the `client_credentials` exchange and stores the result.
    async fn fetch_token(&self) -> Result<TokenInfo> {
        tracing::debug!("Requesting access token from {}", self.config.token_url);

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(scope) = self.config.scope.as_deref() {
            params.push(("scope", scope));
        }

        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Token endpoint request failed: {}", e);
                Error::external_service(format!("token endpoint request failed: {e}"))
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::authentication(format!(
                "token endpoint rejected client credentials (HTTP {status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::external_service(format!(
                "token endpoint returned HTTP {status} - {body}"
            )));
        }

        let payload: TokenResponse = response.json().await.map_err(|e| {
            Error::validation(format!("token endpoint returned malformed JSON: {e}"))
        })?;

        let token = TokenInfo::from_response(payload)?;
        tracing::debug!(
            "Access token refreshed, expires in {:?}",
            token.expires_at.saturating_duration_since(Instant::now())
        );

        {
            let mut cached = self.cached.write().await;
            *cached = Some(token.clone());
        }

        Ok(token)
    }
}
