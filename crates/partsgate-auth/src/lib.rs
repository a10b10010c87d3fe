//! OAuth2 client-credentials token management for the catalog service.
//!
//! Provides [`TokenManager`], which caches the current access token and
//! refreshes it single-flight: concurrent callers needing a refresh share
//! one HTTP exchange and one outcome.

pub mod config;
pub mod token;

pub use config::OAuthConfig;
pub use token::{TokenInfo, TokenManager};
