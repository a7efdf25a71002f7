//! Index lifecycle management for one collection
//!
//! This module provides the trait for managing index lifecycle operations,
//! separate from document CRUD.

mod cursor;
mod manager;

pub use cursor::IndexCursor;
pub use manager::CollectionIndexManager;

use async_trait::async_trait;
use doccontrol_core::config::{IndexesConfig, WriteConcern};
use doccontrol_core::error::Result;
use doccontrol_core::index::{IndexKeys, IndexModel, IndexOptions};
use doccontrol_core::namespace::CollectionNamespace;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Settings fixed when an index manager is bound to a collection
#[derive(Debug, Clone, PartialEq)]
pub struct IndexManagerSettings {
    /// Forwarded on `createIndexes` and `dropIndexes`
    pub write_concern: WriteConcern,
    /// Server-side time limit (`maxTimeMS`)
    pub max_time: Option<Duration>,
    /// Batch size for `listIndexes` and `getMore`
    pub list_batch_size: u32,
}

impl Default for IndexManagerSettings {
    fn default() -> Self {
        Self::from_config(&IndexesConfig::default(), WriteConcern::default())
    }
}

impl IndexManagerSettings {
    pub fn from_config(config: &IndexesConfig, write_concern: WriteConcern) -> Self {
        Self {
            write_concern,
            max_time: config.max_time_ms.map(Duration::from_millis),
            list_batch_size: config.list_batch_size.max(1),
        }
    }
}

/// Trait for collection-scoped index lifecycle operations
///
/// Every operation is an independent request: nothing is queued or locked
/// between calls, and cancelling one only abandons the wait for its reply.
#[async_trait]
pub trait IndexManager: Send + Sync {
    /// The collection this manager is bound to
    fn namespace(&self) -> &CollectionNamespace;

    /// Settings fixed at construction
    fn settings(&self) -> &IndexManagerSettings;

    /// Create one index and return its name
    ///
    /// Creating an index identical to an existing one succeeds without change.
    async fn create_index(
        &self,
        keys: IndexKeys,
        options: IndexOptions,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Create several indexes in one command and return their names
    async fn create_indexes(
        &self,
        models: Vec<IndexModel>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;

    /// Drop the index with the given name
    async fn drop_index(&self, name: &str, cancel: &CancellationToken) -> Result<()>;

    /// Drop the single index whose key mapping equals `keys`
    async fn drop_index_by_keys(&self, keys: &IndexKeys, cancel: &CancellationToken) -> Result<()>;

    /// Drop every index on the collection
    async fn drop_all_indexes(&self, cancel: &CancellationToken) -> Result<()>;

    /// Start a fresh listing; calling again restarts from the beginning
    async fn list_indexes(&self, cancel: &CancellationToken) -> Result<IndexCursor>;

    /// Whether an index with the given name exists
    async fn index_exists(&self, name: &str, cancel: &CancellationToken) -> Result<bool> {
        let mut cursor = self.list_indexes(cancel).await?;
        while let Some(index) = cursor.next(cancel).await? {
            if index.name == name {
                cursor.close(cancel).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
