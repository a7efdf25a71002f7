//! Test utilities for driver integration tests

#![allow(dead_code)]

use doccontrol_core::config::Config;
use doccontrol_core::namespace::CollectionNamespace;
use doccontrol_core::server::ServerInstanceHandle;
use doccontrol_driver::{
    CollectionIndexManager, IndexManager, IndexManagerSettings, MockDeployment, TestContext,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const PRIMARY: &str = "node1:27017";
pub const SECONDARY: &str = "node2:27017";
pub const OTHER_SECONDARY: &str = "node3:27017";

/// Three-member replica set `rs0`; node1 is primary
pub fn replica_set() -> MockDeployment {
    MockDeployment::replica_set("rs0", &[PRIMARY, SECONDARY, OTHER_SECONDARY])
}

pub fn handle(address: &str) -> ServerInstanceHandle {
    address.parse().expect("valid address")
}

pub fn cancel() -> CancellationToken {
    CancellationToken::new()
}

/// Index manager bound to `db.collection` on `mock`
pub fn manager_for(mock: &MockDeployment, db: &str, collection: &str) -> CollectionIndexManager {
    manager_with_settings(mock, db, collection, IndexManagerSettings::default())
}

pub fn manager_with_settings(
    mock: &MockDeployment,
    db: &str,
    collection: &str,
    settings: IndexManagerSettings,
) -> CollectionIndexManager {
    let namespace = CollectionNamespace::new(db, collection).expect("valid namespace");
    CollectionIndexManager::new(Arc::new(mock.clone()), namespace, settings)
}

/// Bootstrap a context over `mock` with default configuration
pub async fn context_over(mock: &MockDeployment) -> TestContext {
    context_with_config(mock, Config::default()).await
}

pub async fn context_with_config(mock: &MockDeployment, config: Config) -> TestContext {
    TestContext::with_executor(Arc::new(mock.clone()), config, &cancel())
        .await
        .expect("Failed to bootstrap test context")
}

/// Names reported by a fresh listing, in server order
pub async fn listed_names(manager: &dyn IndexManager) -> Vec<String> {
    manager
        .list_indexes(&cancel())
        .await
        .expect("list")
        .try_collect(&cancel())
        .await
        .expect("collect")
        .into_iter()
        .map(|index| index.name)
        .collect()
}
