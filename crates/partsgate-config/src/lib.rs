//! Application configuration: defaults, optional TOML file, environment
//! overrides.
//!
//! Sections come from the crates that consume them ([`CatalogConfig`] with
//! its embedded OAuth settings, [`DatabaseConfig`]); this crate layers them
//! into one [`AppConfig`] and validates the merged result. Environment
//! variables use the `PARTSGATE` prefix with `__` as the section separator,
//! e.g. `PARTSGATE__DATABASE__MAX=20` or
//! `PARTSGATE__CATALOG__OAUTH__CLIENT_SECRET=...`.

use serde::{Deserialize, Serialize};

use partsgate_catalog::CatalogConfig;
use partsgate_core::Result;
use partsgate_db::DatabaseConfig;

/// Merged configuration for a partsgate process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Catalog GraphQL endpoint, retry policy, and OAuth credentials.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Database connection and pool sizing.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self) -> Result<()> {
        self.catalog.validate()?;
        self.database.validate()?;
        Ok(())
    }
}

pub mod loader {
    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use partsgate_core::{Error, Result};

    use super::AppConfig;

    /// Default configuration file looked up when no path is given.
    const DEFAULT_FILE: &str = "partsgate.toml";

    /// Loads, merges, and validates the configuration.
    ///
    /// Layering, later sources winning: section defaults → TOML file (the
    /// given path, or `partsgate.toml` when present) → `PARTSGATE__`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a source cannot be parsed or the
    /// merged configuration is invalid.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig> {
        let mut builder = Config::builder();

        let file = match path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(DEFAULT_FILE),
        };
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }

        builder = builder.add_source(
            Environment::with_prefix("PARTSGATE")
                .try_parsing(true)
                .separator("__"),
        );

        let merged = builder
            .build()
            .map_err(|e| Error::validation(format!("config build error: {e}")))?;
        let app: AppConfig = merged
            .try_deserialize()
            .map_err(|e| Error::validation(format!("config deserialize error: {e}")))?;

        app.validate()?;
        Ok(app)
    }
}
