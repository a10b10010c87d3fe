//! Configuration for the OAuth2 token manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use partsgate_core::{Error, Result};

/// Configuration for the client-credentials token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Token endpoint URL, e.g. `https://auth.example.com/oauth/token`.
    #[serde(default)]
    pub token_url: String,

    /// OAuth2 client identifier.
    #[serde(default)]
    pub client_id: String,

    /// OAuth2 client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Optional scope requested with the grant.
    #[serde(default)]
    pub scope: Option<String>,

    /// How long before expiry a token stops being served from cache.
    /// A refresh is triggered once remaining lifetime drops to this value.
    #[serde(default = "default_refresh_buffer_ms")]
    pub refresh_buffer_ms: u64,

    /// HTTP timeout for token endpoint requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_refresh_buffer_ms() -> u64 {
    60_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: None,
            refresh_buffer_ms: default_refresh_buffer_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl OAuthConfig {
    /// Creates a new configuration for the given endpoint and credentials.
    #[must_use]
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Default::default()
        }
    }

    /// Sets the requested scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the refresh buffer.
    #[must_use]
    pub fn with_refresh_buffer_ms(mut self, buffer: u64) -> Self {
        self.refresh_buffer_ms = buffer;
        self
    }

    /// Sets the token endpoint request timeout.
    #[must_use]
    pub fn with_request_timeout_ms(mut self, timeout: u64) -> Self {
        self.request_timeout_ms = timeout;
        self
    }

    /// Returns the refresh buffer as a [`Duration`].
    #[must_use]
    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_millis(self.refresh_buffer_ms)
    }

    /// Returns the request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the token URL is missing or unparsable,
    /// or if the client credentials are empty.
    pub fn validate(&self) -> Result<()> {
        if self.token_url.is_empty() {
            return Err(Error::validation("oauth.token_url must be set"));
        }
        url::Url::parse(&self.token_url)
            .map_err(|e| Error::validation(format!("oauth.token_url is not a valid URL: {e}")))?;
        if self.client_id.is_empty() {
            return Err(Error::validation("oauth.client_id must be set"));
        }
        if self.client_secret.is_empty() {
            return Err(Error::validation("oauth.client_secret must be set"));
        }
        Ok(())
    }
}
