//! Configuration loading from files and environment variables

use crate::error::{Error, Result};
use config::{Config as ConfigLib, ConfigBuilder as LibConfigBuilder, Environment, File};
use std::path::Path;
use tracing::debug;

use super::defaults::*;
use super::{global_config_path, Config};

/// Helper to set a config default with consistent error mapping
fn set_config_default<T: Into<config::Value>>(
    builder: LibConfigBuilder<config::builder::DefaultState>,
    key: &str,
    value: T,
) -> Result<LibConfigBuilder<config::builder::DefaultState>> {
    builder
        .set_default(key, value)
        .map_err(|e| Error::config(format!("Failed to set {key} default: {e}")))
}

impl Config {
    /// Loads configuration from a TOML file with environment variable overrides
    ///
    /// Environment variables are prefixed with `DOCCONTROL_` and use double underscores
    /// for nested values. For example:
    /// - `DOCCONTROL_CONNECTION__PROVIDER=mock`
    /// - `DOCCONTROL_REPLICATION__FAIL_POINT=rsSyncApplyStop`
    ///
    /// `MONGODB_URI` overrides `connection.uri` when set.
    pub fn from_file(path: &Path) -> Result<Self> {
        let builder = ConfigLib::builder();

        // Section defaults (config crate doesn't apply serde defaults for missing sections)
        let builder = set_config_default(builder, "connection.provider", default_provider())?;
        let builder = set_config_default(builder, "connection.uri", default_uri())?;
        let builder =
            set_config_default(builder, "connection.collection", default_collection())?;
        let builder = set_config_default(
            builder,
            "connection.timeout_ms",
            default_timeout_ms() as i64,
        )?;
        let builder = set_config_default(builder, "replication.fail_point", default_fail_point())?;
        let mut builder = set_config_default(
            builder,
            "indexes.list_batch_size",
            default_list_batch_size() as i64,
        )?;

        // Add the config file if it exists
        if path.exists() {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        } else {
            debug!("No configuration file at {}; using defaults", path.display());
        }

        // Add environment variables with DOCCONTROL_ prefix
        builder = builder.add_source(
            Environment::with_prefix("DOCCONTROL")
                .separator("__")
                .try_parsing(true),
        );

        if let Ok(uri) = std::env::var("MONGODB_URI") {
            debug!("Connection uri overridden by MONGODB_URI");
            builder = builder
                .set_override("connection.uri", uri)
                .map_err(|e| Error::config(format!("Failed to set MONGODB_URI: {e}")))?;
        }

        let config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize config: {e}")))
    }

    /// Creates a config from a TOML string (useful for testing)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration
    ///
    /// Precedence (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. Config file (~/.doccontrol/config.toml or custom --config path)
    /// 3. Environment variables (DOCCONTROL_*, MONGODB_URI)
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => global_config_path()?,
        };
        Self::from_file(&path)
    }
}
