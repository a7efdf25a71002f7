mod common;

use common::{cancel, context_over, context_with_config, handle, replica_set, SECONDARY};
use doccontrol_core::config::{Acknowledgment, Config, WriteConcern};
use doccontrol_core::error::Error;
use doccontrol_core::index::{IndexKeys, IndexOptions};
use doccontrol_driver::{IndexManager, MockDeployment, TestContext, Topology};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_replica_set_topology() {
    let mock = replica_set();
    let context = context_over(&mock).await;

    assert!(context.is_replica_set());
    let topology = context.topology();
    assert_eq!(topology.set_name(), Some("rs0"));
    assert_eq!(topology.primary(), Some(&handle("node1:27017")));
    assert_eq!(
        topology.secondaries(),
        vec![handle("node2:27017"), handle("node3:27017")]
    );
}

#[tokio::test]
async fn test_standalone_topology() {
    let mock = MockDeployment::standalone("localhost:27017");
    let context = context_over(&mock).await;

    assert!(!context.is_replica_set());
    assert_eq!(context.topology(), &Topology::Standalone);
}

#[tokio::test]
async fn test_default_namespace() {
    let mock = replica_set();
    let context = context_over(&mock).await;
    assert_eq!(context.namespace().to_string(), "doccontrol_test.testcollection");
}

#[tokio::test]
async fn test_database_from_uri_path() {
    let mock = replica_set();
    let mut config = Config::default();
    config.connection.uri = "mongodb://node1:27017/shop?replicaSet=rs0".to_string();
    config.connection.collection = "orders".to_string();

    let context = context_with_config(&mock, config).await;
    assert_eq!(context.namespace().to_string(), "shop.orders");
}

#[tokio::test]
async fn test_unacknowledged_write_concern_is_upgraded() {
    let mock = replica_set();
    let mut config = Config::default();
    config.connection.write_concern = WriteConcern {
        w: Some(Acknowledgment::Nodes(0)),
        journal: None,
        wtimeout_ms: None,
    };

    let context = context_with_config(&mock, config).await;
    assert_eq!(context.write_concern(), &WriteConcern::acknowledged());

    context
        .index_manager()
        .create_index(IndexKeys::new().ascending("a"), IndexOptions::default(), &cancel())
        .await
        .expect("create");
    let record = mock
        .commands()
        .into_iter()
        .find(|record| record.command_name == "createIndexes")
        .expect("createIndexes sent");
    assert_eq!(record.command["writeConcern"]["w"], 1);
}

#[tokio::test]
async fn test_majority_write_concern_is_kept() {
    let mock = replica_set();
    let mut config = Config::default();
    config.connection.write_concern.w = Some(Acknowledgment::Tag("majority".to_string()));

    let context = context_with_config(&mock, config).await;
    assert_eq!(
        context.write_concern().w,
        Some(Acknowledgment::Tag("majority".to_string()))
    );
}

#[tokio::test]
async fn test_teardown_drops_collection_and_tolerates_missing() {
    let mock = replica_set();
    let context = context_over(&mock).await;
    let namespace = context.namespace().to_string();

    context
        .index_manager()
        .create_index(IndexKeys::new().ascending("a"), IndexOptions::default(), &cancel())
        .await
        .expect("create");
    assert!(mock.collection_exists(&namespace));

    context.teardown(&cancel()).await.expect("teardown");
    assert!(!mock.collection_exists(&namespace));

    context.teardown(&cancel()).await.expect("second teardown");
}

#[tokio::test]
async fn test_connect_with_mock_provider() {
    let mut config = Config::default();
    config.connection.provider = "mock".to_string();
    config.connection.uri = "mongodb://a:27017,b:27017/app?replicaSet=rs1".to_string();

    let context = TestContext::connect(config, &cancel()).await.expect("connect");
    assert!(context.is_replica_set());
    assert_eq!(context.namespace().database(), "app");
    assert_eq!(context.topology().secondaries(), vec![handle("b:27017")]);
}

#[tokio::test]
async fn test_connect_rejects_invalid_config() {
    let mut config = Config::default();
    config.connection.provider = "carrier-pigeon".to_string();

    let result = TestContext::connect(config, &cancel()).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn test_probe_times_out() {
    let mock = replica_set().with_latency(Duration::from_secs(60));
    let mut config = Config::default();
    config.connection.timeout_ms = 500;

    let result = TestContext::with_executor(Arc::new(mock), config, &cancel()).await;
    assert!(matches!(result, Err(Error::Unreachable(_))));
}

#[tokio::test]
async fn test_unreachable_primary_fails_probe() {
    let mock = MockDeployment::standalone("localhost:27017");
    mock.set_reachable(&handle("localhost:27017"), false);

    let result = TestContext::with_executor(Arc::new(mock), Config::default(), &cancel()).await;
    assert!(matches!(result, Err(Error::Unreachable(_))));
}

#[tokio::test]
async fn test_index_manager_for_other_collection() {
    let mock = replica_set();
    let context = context_over(&mock).await;
    let namespace = "doccontrol_test.other".parse().expect("namespace");

    let manager = context.index_manager_for(namespace);
    manager
        .create_index(IndexKeys::new().ascending("b"), IndexOptions::default(), &cancel())
        .await
        .expect("create");
    assert_eq!(mock.index_names("doccontrol_test.other"), vec!["b_1"]);
    assert_eq!(context.topology().secondaries()[0], handle(SECONDARY));
}
