//! GraphQL client for the OAuth2-protected parts catalog.
//!
//! [`GraphQLTransport`] handles the wire concerns: bearer-token attachment,
//! retry with exponential backoff, and status-code classification.
//! [`CatalogClient`] is the typed facade callers use; it decodes response
//! payloads and keeps rolling request metrics.

pub mod client;
pub mod config;
pub mod metrics;
pub mod transport;

pub use client::CatalogClient;
pub use config::CatalogConfig;
pub use metrics::CatalogMetrics;
pub use transport::{GraphQLTransport, RequestOptions};
