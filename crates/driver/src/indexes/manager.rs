//! Command-backed index manager

use super::{IndexCursor, IndexManager, IndexManagerSettings};
use async_trait::async_trait;
use doccontrol_core::error::{codes, Error, Result};
use doccontrol_core::executor::{with_cancellation, CommandExecutor};
use doccontrol_core::index::{IndexDescriptor, IndexKeys, IndexModel, IndexOptions};
use doccontrol_core::namespace::CollectionNamespace;
use doccontrol_core::server::CommandTarget;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Index manager that translates lifecycle intents into administrative commands
///
/// Holds no state beyond its binding; every call is a fresh round trip to the
/// primary.
#[derive(Clone)]
pub struct CollectionIndexManager {
    executor: Arc<dyn CommandExecutor>,
    namespace: CollectionNamespace,
    settings: IndexManagerSettings,
}

impl CollectionIndexManager {
    /// Bind a manager to `namespace`
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        namespace: CollectionNamespace,
        settings: IndexManagerSettings,
    ) -> Self {
        Self {
            executor,
            namespace,
            settings,
        }
    }

    async fn run(&self, command: Value, cancel: &CancellationToken) -> Result<Value> {
        debug!("Running {} on {}", command_name(&command), self.namespace);
        with_cancellation(
            cancel,
            self.executor.execute(
                self.namespace.database(),
                command,
                &CommandTarget::Primary,
                cancel,
            ),
        )
        .await
    }

    /// Adds the settings-derived fields shared by write commands
    fn with_write_options(&self, mut command: Map<String, Value>) -> Value {
        if let Some(write_concern) = self.settings.write_concern.to_document() {
            command.insert("writeConcern".to_string(), write_concern);
        }
        self.with_max_time(command)
    }

    fn with_max_time(&self, mut command: Map<String, Value>) -> Value {
        if let Some(max_time) = self.settings.max_time {
            command.insert(
                "maxTimeMS".to_string(),
                json!(u64::try_from(max_time.as_millis()).unwrap_or(u64::MAX)),
            );
        }
        Value::Object(command)
    }

    fn create_error(&self, err: Error) -> Error {
        match err {
            Error::Command { code, message, .. }
                if code == codes::INDEX_OPTIONS_CONFLICT
                    || code == codes::INDEX_KEY_SPECS_CONFLICT =>
            {
                Error::index_conflict(format!("{}: {message}", self.namespace))
            }
            Error::Command { code, message, .. } if code == codes::CANNOT_CREATE_INDEX => {
                Error::invalid_argument(message)
            }
            other => other,
        }
    }

    fn drop_error(&self, err: Error, name: &str) -> Error {
        match err.command_code() {
            Some(codes::INDEX_NOT_FOUND) | Some(codes::NAMESPACE_NOT_FOUND) => {
                Error::not_found(self.namespace.to_string(), name)
            }
            _ => err,
        }
    }
}

fn command_name(command: &Value) -> &str {
    command
        .as_object()
        .and_then(|map| map.keys().next())
        .map(String::as_str)
        .unwrap_or("command")
}

#[async_trait]
impl IndexManager for CollectionIndexManager {
    fn namespace(&self) -> &CollectionNamespace {
        &self.namespace
    }

    fn settings(&self) -> &IndexManagerSettings {
        &self.settings
    }

    async fn create_index(
        &self,
        keys: IndexKeys,
        options: IndexOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut names = self
            .create_indexes(vec![IndexModel::new(keys, options)], cancel)
            .await?;
        names
            .pop()
            .ok_or_else(|| Error::serialization("createIndexes returned no index name"))
    }

    async fn create_indexes(
        &self,
        models: Vec<IndexModel>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        if models.is_empty() {
            return Err(Error::invalid_argument(
                "At least one index model is required",
            ));
        }
        for model in &models {
            model.keys.validate()?;
        }

        let names: Vec<String> = models.iter().map(IndexModel::name).collect();
        let indexes: Vec<Value> = models.iter().map(IndexModel::to_document).collect();

        let mut command = Map::new();
        command.insert(
            "createIndexes".to_string(),
            json!(self.namespace.collection()),
        );
        command.insert("indexes".to_string(), Value::Array(indexes));
        let command = self.with_write_options(command);

        let reply = self
            .run(command, cancel)
            .await
            .map_err(|e| self.create_error(e))?;

        let before = reply.get("numIndexesBefore").and_then(Value::as_u64);
        let after = reply.get("numIndexesAfter").and_then(Value::as_u64);
        if before.is_some() && before == after {
            debug!("Indexes {:?} already exist on {}", names, self.namespace);
        } else {
            info!("Created indexes {:?} on {}", names, self.namespace);
        }

        Ok(names)
    }

    async fn drop_index(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("Index name must not be empty"));
        }
        if name == "*" {
            return Err(Error::invalid_argument(
                "Use drop_all_indexes to drop every index",
            ));
        }

        let mut command = Map::new();
        command.insert("dropIndexes".to_string(), json!(self.namespace.collection()));
        command.insert("index".to_string(), json!(name));
        let command = self.with_write_options(command);

        self.run(command, cancel)
            .await
            .map_err(|e| self.drop_error(e, name))?;

        info!("Dropped index '{}' on {}", name, self.namespace);
        Ok(())
    }

    async fn drop_index_by_keys(&self, keys: &IndexKeys, cancel: &CancellationToken) -> Result<()> {
        keys.validate()?;

        let matches: Vec<IndexDescriptor> = self
            .list_indexes(cancel)
            .await?
            .try_collect(cancel)
            .await?
            .into_iter()
            .filter(|index| index.matches_keys(keys))
            .collect();

        match matches.as_slice() {
            [index] => self.drop_index(&index.name, cancel).await,
            _ => Err(Error::AmbiguousOrNotFound {
                namespace: self.namespace.to_string(),
                keys: keys.to_string(),
                matches: matches.len(),
            }),
        }
    }

    async fn drop_all_indexes(&self, cancel: &CancellationToken) -> Result<()> {
        let mut command = Map::new();
        command.insert("dropIndexes".to_string(), json!(self.namespace.collection()));
        command.insert("index".to_string(), json!("*"));
        let command = self.with_write_options(command);

        match self.run(command, cancel).await {
            Ok(_) => {
                info!("Dropped all indexes on {}", self.namespace);
                Ok(())
            }
            Err(e) if e.command_code() == Some(codes::NAMESPACE_NOT_FOUND) => {
                debug!("{} does not exist; no indexes to drop", self.namespace);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_indexes(&self, cancel: &CancellationToken) -> Result<IndexCursor> {
        let mut command = Map::new();
        command.insert("listIndexes".to_string(), json!(self.namespace.collection()));
        command.insert(
            "cursor".to_string(),
            json!({ "batchSize": self.settings.list_batch_size }),
        );
        let command = self.with_max_time(command);

        let reply = match self.run(command, cancel).await {
            Ok(reply) => reply,
            Err(e) if e.command_code() == Some(codes::NAMESPACE_NOT_FOUND) => {
                debug!("{} does not exist; listing is empty", self.namespace);
                return Ok(IndexCursor::empty(
                    Arc::clone(&self.executor),
                    self.namespace.clone(),
                ));
            }
            Err(e) => return Err(e),
        };

        let (cursor_id, first_batch) = IndexCursor::parse_batch(&reply, "firstBatch")?;
        Ok(IndexCursor::new(
            Arc::clone(&self.executor),
            self.namespace.clone(),
            first_batch,
            cursor_id,
            self.settings.list_batch_size,
        ))
    }
}
