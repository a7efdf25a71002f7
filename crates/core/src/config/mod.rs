//! Configuration module for doccontrol
//!
//! This module provides configuration structures and loading mechanisms.
//! Configuration can be loaded from TOML files and/or environment variables.

mod defaults;
mod loading;


use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;

use defaults::*;

/// Returns the path to the global configuration file
///
/// The global config is stored at `~/.doccontrol/config.toml`.
pub fn global_config_path() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::config("Unable to determine home directory".to_string()))?;
    Ok(home_dir.join(".doccontrol").join("config.toml"))
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection and bootstrap configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Replication control configuration
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Index management configuration
    #[serde(default)]
    pub indexes: IndexesConfig,
}

/// How to reach the deployment and which collection to bind by default
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Executor provider: "mongodb" (default) or "mock"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Connection string
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database override; takes precedence over the database in the URI
    #[serde(default)]
    pub database: Option<String>,

    /// Database used when neither `database` nor the URI names one
    #[serde(default = "default_database")]
    pub default_database: String,

    /// Collection bound when none is given explicitly
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Write concern forwarded on index creation and removal
    #[serde(default)]
    pub write_concern: WriteConcern,

    /// Timeout in milliseconds for establishing connections and selecting servers
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            uri: default_uri(),
            database: None,
            default_database: default_database(),
            collection: default_collection(),
            write_concern: WriteConcern::default(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("provider", &self.provider)
            .field("uri", &redact_uri(&self.uri))
            .field("database", &self.database)
            .field("default_database", &self.default_database)
            .field("collection", &self.collection)
            .field("write_concern", &self.write_concern)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl ConnectionConfig {
    /// Resolve the database: explicit override, then the URI path, then the default
    pub fn database_name(&self) -> String {
        self.database
            .clone()
            .filter(|db| !db.is_empty())
            .or_else(|| database_from_uri(&self.uri))
            .unwrap_or_else(|| self.default_database.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Extracts the database named in the path of a connection string, if any
pub fn database_from_uri(uri: &str) -> Option<String> {
    let rest = uri.split_once("://").map(|(_, rest)| rest)?;
    let (_, path) = rest.split_once('/')?;
    let db = path.split('?').next().unwrap_or_default();
    (!db.is_empty()).then(|| db.to_string())
}

/// Replaces the password of a connection string with `***`
fn redact_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    match authority.rsplit_once('@') {
        Some((credentials, hosts)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{hosts}{}", &rest[authority_end..])
        }
        None => uri.to_string(),
    }
}

/// Acknowledgment requested from the server for writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Acknowledgment {
    /// Number of members that must acknowledge; 0 is unacknowledged
    Nodes(u32),
    /// "majority" or a custom tag set name
    Tag(String),
}

/// Write concern settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteConcern {
    /// Acknowledgment level; the server default applies when unset
    #[serde(default)]
    pub w: Option<Acknowledgment>,

    /// Require journal commit before acknowledging
    #[serde(default)]
    pub journal: Option<bool>,

    /// Time limit for the acknowledgment in milliseconds
    #[serde(default)]
    pub wtimeout_ms: Option<u64>,
}

impl WriteConcern {
    /// An explicitly acknowledged write concern (`w: 1`)
    pub fn acknowledged() -> Self {
        Self {
            w: Some(Acknowledgment::Nodes(1)),
            ..Self::default()
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        !matches!(self.w, Some(Acknowledgment::Nodes(0))) || self.journal == Some(true)
    }

    /// The `writeConcern` command field, or `None` to use the server default
    pub fn to_document(&self) -> Option<Value> {
        let mut doc = Map::new();
        match &self.w {
            Some(Acknowledgment::Nodes(n)) => {
                doc.insert("w".to_string(), json!(n));
            }
            Some(Acknowledgment::Tag(tag)) => {
                doc.insert("w".to_string(), json!(tag));
            }
            None => {}
        }
        if let Some(journal) = self.journal {
            doc.insert("j".to_string(), json!(journal));
        }
        if let Some(wtimeout) = self.wtimeout_ms {
            doc.insert("wtimeout".to_string(), json!(wtimeout));
        }
        (!doc.is_empty()).then_some(Value::Object(doc))
    }
}

/// Replication control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Fail point that suspends oplog application on a secondary
    #[serde(default = "default_fail_point")]
    pub fail_point: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            fail_point: default_fail_point(),
        }
    }
}

/// Index management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexesConfig {
    /// Batch size requested for `listIndexes` and `getMore`
    #[serde(default = "default_list_batch_size")]
    pub list_batch_size: u32,

    /// Server-side time limit for index commands
    #[serde(default)]
    pub max_time_ms: Option<u64>,
}

impl Default for IndexesConfig {
    fn default() -> Self {
        Self {
            list_batch_size: default_list_batch_size(),
            max_time_ms: None,
        }
    }
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !VALID_PROVIDERS.contains(&self.connection.provider.as_str()) {
            return Err(Error::config(format!(
                "Invalid connection provider '{}'. Must be one of: {:?}",
                self.connection.provider, VALID_PROVIDERS
            )));
        }

        if !(self.connection.uri.starts_with("mongodb://")
            || self.connection.uri.starts_with("mongodb+srv://"))
        {
            return Err(Error::config(format!(
                "Invalid connection uri '{}'. Must start with mongodb:// or mongodb+srv://",
                redact_uri(&self.connection.uri)
            )));
        }

        if self.connection.collection.is_empty() {
            return Err(Error::config(
                "connection.collection must not be empty".to_string(),
            ));
        }

        if self.connection.default_database.is_empty() {
            return Err(Error::config(
                "connection.default_database must not be empty".to_string(),
            ));
        }

        if self.connection.timeout_ms == 0 {
            return Err(Error::config(
                "connection.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.replication.fail_point.is_empty() {
            return Err(Error::config(
                "replication.fail_point must not be empty".to_string(),
            ));
        }

        if self.indexes.list_batch_size == 0 {
            return Err(Error::config(
                "indexes.list_batch_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
