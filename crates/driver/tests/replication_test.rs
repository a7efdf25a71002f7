mod common;

use common::{cancel, context_over, handle, replica_set, OTHER_SECONDARY, PRIMARY, SECONDARY};
use doccontrol_core::config::ReplicationConfig;
use doccontrol_core::error::Error;
use doccontrol_driver::{MockDeployment, MockFailure, ReplicationController};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const FAIL_POINT: &str = "rsSyncApplyStop";

fn controller(mock: &MockDeployment) -> ReplicationController {
    ReplicationController::new(Arc::new(mock.clone()), &ReplicationConfig::default())
}

fn fail_point_commands(mock: &MockDeployment) -> Vec<String> {
    mock.commands()
        .into_iter()
        .filter(|record| record.command_name == "configureFailPoint")
        .map(|record| {
            record.command["mode"]
                .as_str()
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_stop_then_release_leaves_fail_point_off() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);

    let mut guard = controller(&mock)
        .stop_replication(&secondary, &cancel())
        .await
        .expect("stop");
    assert_eq!(guard.secondary(), &secondary);
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "alwaysOn");

    guard.release(&cancel()).await.expect("release");
    assert!(guard.is_released());
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
    assert_eq!(fail_point_commands(&mock), vec!["alwaysOn", "off"]);
}

#[tokio::test]
async fn test_double_release_sends_one_resume() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);

    let mut guard = controller(&mock)
        .stop_replication(&secondary, &cancel())
        .await
        .expect("stop");
    guard.release(&cancel()).await.expect("first release");
    guard.release(&cancel()).await.expect("second release");
    drop(guard);

    assert_eq!(fail_point_commands(&mock), vec!["alwaysOn", "off"]);
}

#[tokio::test]
async fn test_fail_point_commands_are_pinned_to_the_secondary() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);

    let mut guard = controller(&mock)
        .stop_replication(&secondary, &cancel())
        .await
        .expect("stop");
    guard.release(&cancel()).await.expect("release");

    let records: Vec<_> = mock
        .commands()
        .into_iter()
        .filter(|record| record.command_name == "configureFailPoint")
        .collect();
    assert_eq!(records.len(), 2);
    for record in records {
        assert!(record.pinned);
        assert_eq!(record.address, secondary);
        assert_eq!(record.database, "admin");
    }
    assert_eq!(mock.active_pins(), 0);
    assert_eq!(mock.fail_point_mode(&handle(OTHER_SECONDARY), FAIL_POINT), "off");
}

#[tokio::test]
async fn test_enable_failure_returns_no_guard() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);
    mock.fail_next(
        "configureFailPoint",
        MockFailure::Command {
            code: 2,
            code_name: "BadValue".to_string(),
            message: "rejected".to_string(),
        },
    );

    let result = controller(&mock).stop_replication(&secondary, &cancel()).await;
    assert!(matches!(result, Err(Error::ReplicationControl(_))));
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
    assert_eq!(mock.active_pins(), 0);
}

#[tokio::test]
async fn test_release_failure_is_surfaced() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);

    let mut guard = controller(&mock)
        .stop_replication(&secondary, &cancel())
        .await
        .expect("stop");
    mock.fail_next(
        "configureFailPoint",
        MockFailure::Transport("connection reset".to_string()),
    );

    let result = guard.release(&cancel()).await;
    assert!(matches!(result, Err(Error::ReplicationControl(_))));
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "alwaysOn");

    // No retry on a second release
    guard.release(&cancel()).await.expect("no-op");
    assert_eq!(fail_point_commands(&mock), vec!["alwaysOn", "off"]);
}

#[tokio::test]
async fn test_unreachable_secondary() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);
    mock.set_reachable(&secondary, false);

    let result = controller(&mock).stop_replication(&secondary, &cancel()).await;
    assert!(matches!(result, Err(Error::ReplicationControl(_))));
    assert!(mock.commands().is_empty());
}

#[tokio::test]
async fn test_start_replication_is_idempotent() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);
    let controller = controller(&mock);

    controller
        .start_replication(&secondary, &cancel())
        .await
        .expect("first start");
    controller
        .start_replication(&secondary, &cancel())
        .await
        .expect("second start");
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
}

#[tokio::test]
async fn test_custom_fail_point_name() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);
    let config = ReplicationConfig {
        fail_point: "stopReplProducer".to_string(),
    };
    let controller = ReplicationController::new(Arc::new(mock.clone()), &config);
    assert_eq!(controller.fail_point(), "stopReplProducer");

    let _guard = controller
        .stop_replication(&secondary, &cancel())
        .await
        .expect("stop");
    assert_eq!(mock.fail_point_mode(&secondary, "stopReplProducer"), "alwaysOn");
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
}

#[tokio::test]
async fn test_with_replication_stopped_resumes_after_work() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);
    let observer = mock.clone();
    let observed = secondary.clone();

    let mode_during_work = controller(&mock)
        .with_replication_stopped(&secondary, &cancel(), || async move {
            Ok(observer.fail_point_mode(&observed, FAIL_POINT))
        })
        .await
        .expect("work");

    assert_eq!(mode_during_work, "alwaysOn");
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
}

#[tokio::test]
async fn test_with_replication_stopped_resumes_after_failed_work() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);

    let result: Result<(), Error> = controller(&mock)
        .with_replication_stopped(&secondary, &cancel(), || async {
            Err(Error::invalid_argument("work failed"))
        })
        .await;

    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
}

#[tokio::test]
async fn test_with_replication_stopped_prefers_release_error() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);
    let injector = mock.clone();

    let result = controller(&mock)
        .with_replication_stopped(&secondary, &cancel(), || async move {
            injector.fail_next(
                "configureFailPoint",
                MockFailure::Transport("connection reset".to_string()),
            );
            Ok(42)
        })
        .await;

    assert!(matches!(result, Err(Error::ReplicationControl(_))));
}

#[tokio::test]
async fn test_dropped_guard_resumes_in_background() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);

    let guard = controller(&mock)
        .stop_replication(&secondary, &cancel())
        .await
        .expect("stop");
    drop(guard);

    for _ in 0..50 {
        if mock.fail_point_mode(&secondary, FAIL_POINT) == "off" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
}

#[tokio::test]
async fn test_cancelled_release_keeps_guard_armed() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);

    let mut guard = controller(&mock)
        .stop_replication(&secondary, &cancel())
        .await
        .expect("stop");

    let cancelled = cancel();
    cancelled.cancel();
    let result = guard.release(&cancelled).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!guard.is_released());
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "alwaysOn");

    guard.release(&cancel()).await.expect("release");
    assert!(guard.is_released());
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
    assert_eq!(fail_point_commands(&mock), vec!["alwaysOn", "off"]);
}

#[tokio::test]
async fn test_guard_dropped_after_cancelled_release_still_resumes() {
    let mock = replica_set();
    let secondary = handle(SECONDARY);

    let mut guard = controller(&mock)
        .stop_replication(&secondary, &cancel())
        .await
        .expect("stop");
    let cancelled = cancel();
    cancelled.cancel();
    assert!(guard.release(&cancelled).await.is_err());
    drop(guard);

    for _ in 0..50 {
        if mock.fail_point_mode(&secondary, FAIL_POINT) == "off" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(mock.fail_point_mode(&secondary, FAIL_POINT), "off");
}

#[tokio::test]
async fn test_context_controller_rejects_non_secondaries() {
    let mock = replica_set();
    let context = context_over(&mock).await;
    let replication = context.replication();
    let commands_before = mock.commands().len();

    let primary = replication.stop_replication(&handle(PRIMARY), &cancel()).await;
    assert!(matches!(primary, Err(Error::ReplicationControl(_))));

    let stranger = replication
        .stop_replication(&handle("elsewhere:27017"), &cancel())
        .await;
    assert!(matches!(stranger, Err(Error::ReplicationControl(_))));
    assert_eq!(mock.commands().len(), commands_before);

    let mut guard = replication
        .stop_replication(&handle(SECONDARY), &cancel())
        .await
        .expect("stop known secondary");
    guard.release(&cancel()).await.expect("release");
}

#[tokio::test]
async fn test_standalone_has_no_secondaries_to_pause() {
    let mock = MockDeployment::standalone("localhost:27017");
    let context = context_over(&mock).await;

    let result = context
        .replication()
        .stop_replication(&handle("localhost:27017"), &cancel())
        .await;
    assert!(matches!(result, Err(Error::ReplicationControl(_))));
}
