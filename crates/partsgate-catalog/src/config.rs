//! Configuration for the catalog GraphQL client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use partsgate_auth::OAuthConfig;
use partsgate_core::{Error, Result};

/// Configuration for the catalog endpoint and its retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// GraphQL endpoint URL, e.g. `https://catalog.example.com/graphql`.
    #[serde(default)]
    pub endpoint: String,

    /// Per-attempt HTTP timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How many retries follow the initial attempt (total attempts are
    /// `retry_attempts + 1`).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Credentials for the catalog's token endpoint.
    #[serde(default)]
    pub oauth: OAuthConfig,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            oauth: OAuthConfig::default(),
        }
    }
}

impl CatalogConfig {
    /// Creates a new configuration for the given endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Sets the OAuth credentials.
    #[must_use]
    pub fn with_oauth(mut self, oauth: OAuthConfig) -> Self {
        self.oauth = oauth;
        self
    }

    /// Sets the per-attempt request timeout.
    #[must_use]
    pub fn with_request_timeout_ms(mut self, timeout: u64) -> Self {
        self.request_timeout_ms = timeout;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub fn with_retry_delay_ms(mut self, delay: u64) -> Self {
        self.retry_delay_ms = delay;
        self
    }

    /// Returns the per-attempt timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the base backoff delay as a [`Duration`].
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Validates the configuration, including the embedded OAuth section.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a missing/unparsable endpoint or
    /// invalid OAuth settings.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(Error::validation("catalog.endpoint must be set"));
        }
        url::Url::parse(&self.endpoint)
            .map_err(|e| Error::validation(format!("catalog.endpoint is not a valid URL: {e}")))?;
        self.oauth.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CatalogConfig::default();
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay_ms, 1_000);
    }

    #[test]
    fn test_config_builder() {
        let config = CatalogConfig::new("https://catalog.example.com/graphql")
            .with_request_timeout_ms(5_000)
            .with_retry_attempts(1)
            .with_retry_delay_ms(50);

        assert_eq!(config.endpoint, "https://catalog.example.com/graphql");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_attempts, 1);
        assert_eq!(config.retry_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_validate_requires_endpoint_and_oauth() {
        let config = CatalogConfig::default();
        assert!(config.validate().is_err());

        let config = CatalogConfig::new("https://catalog.example.com/graphql");
        // OAuth section still empty.
        assert!(config.validate().is_err());

        let config = config.with_oauth(OAuthConfig::new(
            "https://auth.example.com/token",
            "id",
            "secret",
        ));
        assert!(config.validate().is_ok());
    }
}
