//! Error types shared across the partsgate crates.
//!
//! Every failure surfaced to a caller maps onto one of these variants, each
//! with a stable machine-readable kind and a human-readable message. Messages
//! never contain credentials or query parameter values.

use std::fmt;

/// Errors produced by the token manager, the catalog transport, and the
/// database pool.
///
/// The enum is `Clone` so a single in-flight operation (for example a
/// single-flight token refresh) can hand the same failure to every caller
/// that joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Credentials were rejected, or the upstream confirmed an invalid token.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Description of the authentication failure.
        message: String,
    },

    /// An upstream service failed: network error, 5xx, timeout, or an
    /// error payload inside an otherwise successful response.
    #[error("External service error: {message}")]
    ExternalService {
        /// Description of the upstream failure, wrapping the original cause.
        message: String,
    },

    /// The upstream rate limiter rejected the request and the retry budget
    /// is exhausted.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Description of the rate-limit rejection.
        message: String,
        /// Server-provided retry hint, when one was sent.
        retry_after_ms: Option<u64>,
    },

    /// A database operation failed: connection, query, or pool setup.
    #[error("Database error: {message}")]
    Database {
        /// Description of the database failure.
        message: String,
    },

    /// The pool was destroyed; the operation can never succeed.
    #[error("Pool closed: {message}")]
    PoolClosed {
        /// Description of which operation hit the closed pool.
        message: String,
    },

    /// An acquire waited longer than its deadline for a free connection.
    #[error("Pool acquire timed out after {waited_ms} ms")]
    PoolTimeout {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// A malformed external response or a rejected configuration value.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what failed validation.
        message: String,
    },
}

impl Error {
    /// Creates a new `Authentication` error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a new `ExternalService` error.
    #[must_use]
    pub fn external_service(message: impl Into<String>) -> Self {
        Self::ExternalService {
            message: message.into(),
        }
    }

    /// Creates a new `RateLimited` error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_ms,
        }
    }

    /// Creates a new `Database` error.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Creates a new `PoolClosed` error.
    #[must_use]
    pub fn pool_closed(message: impl Into<String>) -> Self {
        Self::PoolClosed {
            message: message.into(),
        }
    }

    /// Creates a new `PoolTimeout` error.
    #[must_use]
    pub fn pool_timeout(waited_ms: u64) -> Self {
        Self::PoolTimeout { waited_ms }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns the stable machine-readable kind for this error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::ExternalService { .. } => "external_service",
            Self::RateLimited { .. } => "rate_limited",
            Self::Database { .. } => "database",
            Self::PoolClosed { .. } => "pool_closed",
            Self::PoolTimeout { .. } => "pool_timeout",
            Self::Validation { .. } => "validation",
        }
    }

    /// Returns `true` if this is an authentication failure.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` for transient failure classes.
    ///
    /// Transient here describes the class, not a promise: the transports
    /// apply their own per-status retry budgets before surfacing these.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ExternalService { .. } | Self::RateLimited { .. } | Self::PoolTimeout { .. }
        )
    }

    /// Returns `true` if this error came from pool lifecycle handling rather
    /// than a query itself.
    #[must_use]
    pub fn is_pool_error(&self) -> bool {
        matches!(self, Self::PoolClosed { .. } | Self::PoolTimeout { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::ExternalService { .. } => ErrorCategory::Upstream,
            Self::RateLimited { .. } => ErrorCategory::Upstream,
            Self::Database { .. } => ErrorCategory::Database,
            Self::PoolClosed { .. } => ErrorCategory::Pool,
            Self::PoolTimeout { .. } => ErrorCategory::Pool,
            Self::Validation { .. } => ErrorCategory::Validation,
        }
    }
}

/// Categories of resilience-layer errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credential and token failures.
    Authentication,
    /// Failures of the upstream catalog service.
    Upstream,
    /// Database connection and query failures.
    Database,
    /// Pool lifecycle failures (closed, acquire deadline).
    Pool,
    /// Malformed responses and rejected configuration.
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Upstream => write!(f, "upstream"),
            Self::Database => write!(f, "database"),
            Self::Pool => write!(f, "pool"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// Result type for resilience-layer operations.
pub type Result<T> = std::result::Result<T, Error>;
