//! Explicit connection context for tests and tools
//!
//! A [`TestContext`] is built once from configuration and owns everything the
//! controllers need: the executor, the resolved database and collection, the
//! probed topology, and the effective write concern. Nothing is global; two
//! contexts can point at different deployments in the same process.

use crate::factory::create_command_executor;
use crate::indexes::{CollectionIndexManager, IndexManagerSettings};
use crate::replication::ReplicationController;
use crate::topology::{Topology, TopologyProbe};
use doccontrol_core::config::{Config, WriteConcern};
use doccontrol_core::error::{codes, Error, Result};
use doccontrol_core::executor::{with_cancellation, CommandExecutor};
use doccontrol_core::namespace::CollectionNamespace;
use doccontrol_core::server::CommandTarget;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection bootstrap shared by every controller
pub struct TestContext {
    executor: Arc<dyn CommandExecutor>,
    config: Config,
    namespace: CollectionNamespace,
    topology: Topology,
    write_concern: WriteConcern,
}

impl TestContext {
    /// Build the executor named by `config.connection.provider` and probe the deployment
    pub async fn connect(config: Config, cancel: &CancellationToken) -> Result<Self> {
        config.validate()?;
        let executor = create_command_executor(&config.connection).await?;
        Self::with_executor(executor, config, cancel).await
    }

    /// Bootstrap over an already-built executor
    pub async fn with_executor(
        executor: Arc<dyn CommandExecutor>,
        config: Config,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let namespace = CollectionNamespace::new(
            config.connection.database_name(),
            config.connection.collection.clone(),
        )?;

        let write_concern = if config.connection.write_concern.is_acknowledged() {
            config.connection.write_concern.clone()
        } else {
            warn!("Unacknowledged write concern configured; using w: 1 instead");
            WriteConcern::acknowledged()
        };

        let timeout = config.connection.timeout();
        let probe = TopologyProbe::probe(executor.as_ref(), cancel);
        let topology = tokio::time::timeout(timeout, probe)
            .await
            .map_err(|_| {
                Error::unreachable(format!(
                    "Topology probe did not complete within {}ms",
                    timeout.as_millis()
                ))
            })??;

        info!("Bound to {} on {}", namespace, topology);
        Ok(Self {
            executor,
            config,
            namespace,
            topology,
            write_concern,
        })
    }

    pub fn executor(&self) -> Arc<dyn CommandExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The database and collection the context was bound to
    pub fn namespace(&self) -> &CollectionNamespace {
        &self.namespace
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn is_replica_set(&self) -> bool {
        self.topology.is_replica_set()
    }

    /// Effective write concern; never unacknowledged
    pub fn write_concern(&self) -> &WriteConcern {
        &self.write_concern
    }

    /// Index manager for the bound collection
    pub fn index_manager(&self) -> CollectionIndexManager {
        self.index_manager_for(self.namespace.clone())
    }

    /// Index manager for another collection on the same deployment
    pub fn index_manager_for(&self, namespace: CollectionNamespace) -> CollectionIndexManager {
        CollectionIndexManager::new(
            Arc::clone(&self.executor),
            namespace,
            IndexManagerSettings::from_config(&self.config.indexes, self.write_concern.clone()),
        )
    }

    /// Replication controller restricted to the probed secondaries
    pub fn replication(&self) -> ReplicationController {
        ReplicationController::new(Arc::clone(&self.executor), &self.config.replication)
            .with_topology(self.topology.clone())
    }

    /// Drop the bound collection; a missing collection is not an error
    pub async fn teardown(&self, cancel: &CancellationToken) -> Result<()> {
        let mut command = Map::new();
        command.insert("drop".to_string(), json!(self.namespace.collection()));
        if let Some(write_concern) = self.write_concern.to_document() {
            command.insert("writeConcern".to_string(), write_concern);
        }
        let command = Value::Object(command);

        let result = with_cancellation(
            cancel,
            self.executor.execute(
                self.namespace.database(),
                command,
                &CommandTarget::Primary,
                cancel,
            ),
        )
        .await;

        match result {
            Ok(_) => {
                info!("Dropped {}", self.namespace);
                Ok(())
            }
            Err(e) if e.command_code() == Some(codes::NAMESPACE_NOT_FOUND) => {
                debug!("{} already absent", self.namespace);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("namespace", &self.namespace)
            .field("topology", &self.topology)
            .field("write_concern", &self.write_concern)
            .finish()
    }
}
