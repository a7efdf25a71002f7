//! Pausing and resuming oplog application on secondaries
//!
//! Replication is paused by switching a server fail point (by default
//! `rsSyncApplyStop`) to `alwaysOn` on one secondary and resumed by switching
//! it back `off`. Both commands go to `admin` inside a pinned request so they
//! reach exactly the member that was named.
//!
//! [`ReplicationController::stop_replication`] only hands out a
//! [`ReplicationGuard`] once the secondary has confirmed the pause, so holding
//! a guard always means there is something to undo.

use crate::topology::Topology;
use doccontrol_core::config::ReplicationConfig;
use doccontrol_core::error::{Error, Result};
use doccontrol_core::executor::{CommandExecutor, PinnedRequest};
use doccontrol_core::server::{ReadPreference, ServerInstanceHandle};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Fail point modes used by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPointMode {
    Off,
    AlwaysOn,
}

impl FailPointMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::AlwaysOn => "alwaysOn",
        }
    }
}

impl fmt::Display for FailPointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ControllerInner {
    executor: Arc<dyn CommandExecutor>,
    fail_point: String,
    topology: Option<Topology>,
}

/// Issues fail-point commands against individual secondaries
///
/// Cheap to clone; clones share the executor.
#[derive(Clone)]
pub struct ReplicationController {
    inner: Arc<ControllerInner>,
}

impl ReplicationController {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: &ReplicationConfig) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                executor,
                fail_point: config.fail_point.clone(),
                topology: None,
            }),
        }
    }

    /// Reject targets that are not secondaries of `topology` before any command is sent
    pub fn with_topology(self, topology: Topology) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                executor: Arc::clone(&self.inner.executor),
                fail_point: self.inner.fail_point.clone(),
                topology: Some(topology),
            }),
        }
    }

    pub fn fail_point(&self) -> &str {
        &self.inner.fail_point
    }

    /// Pause oplog application on `secondary`
    ///
    /// Returns a guard only after the secondary acknowledged the fail point.
    pub async fn stop_replication(
        &self,
        secondary: &ServerInstanceHandle,
        cancel: &CancellationToken,
    ) -> Result<ReplicationGuard> {
        self.configure_fail_point(secondary, FailPointMode::AlwaysOn, cancel)
            .await?;
        info!("Replication paused on {}", secondary);
        Ok(ReplicationGuard {
            controller: self.clone(),
            secondary: secondary.clone(),
            released: false,
        })
    }

    /// Resume oplog application on `secondary`; harmless if it is not paused
    pub async fn start_replication(
        &self,
        secondary: &ServerInstanceHandle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.configure_fail_point(secondary, FailPointMode::Off, cancel)
            .await?;
        info!("Replication resumed on {}", secondary);
        Ok(())
    }

    /// Run `work` while `secondary` is paused, then resume it
    ///
    /// The resume is always attempted, even when `work` fails. If the resume
    /// itself fails, that error is returned in place of the work's result.
    pub async fn with_replication_stopped<F, Fut, T>(
        &self,
        secondary: &ServerInstanceHandle,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.stop_replication(secondary, cancel).await?;
        let outcome = work().await;

        // The caller's token may already be cancelled; the resume must still go out.
        match guard.release(&CancellationToken::new()).await {
            Ok(()) => outcome,
            Err(release_err) => {
                if let Err(work_err) = &outcome {
                    warn!(
                        "Work on paused {} failed before resume also failed: {}",
                        secondary, work_err
                    );
                }
                Err(release_err)
            }
        }
    }

    /// Set the controller's fail point on `secondary` to `mode`
    pub async fn configure_fail_point(
        &self,
        secondary: &ServerInstanceHandle,
        mode: FailPointMode,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(topology) = &self.inner.topology {
            if !topology.is_secondary(secondary) {
                return Err(Error::replication_control(format!(
                    "{secondary} is not a secondary of the {topology} deployment"
                )));
            }
        }

        let command = json!({
            "configureFailPoint": self.inner.fail_point,
            "mode": mode.as_str(),
        });
        debug!(
            "Setting fail point {} to {} on {}",
            self.inner.fail_point, mode, secondary
        );

        let result = async {
            let pinned =
                PinnedRequest::acquire(self.inner.executor.as_ref(), secondary, cancel).await?;
            pinned
                .run_command("admin", command, ReadPreference::Secondary, cancel)
                .await
        }
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => Err(Error::replication_control(format!(
                "Failed to set fail point {} to {} on {secondary}: {e}",
                self.inner.fail_point, mode
            ))),
        }
    }
}

impl fmt::Debug for ReplicationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationController")
            .field("fail_point", &self.inner.fail_point)
            .field("topology", &self.inner.topology)
            .finish()
    }
}

/// Proof that replication is paused on one secondary
///
/// Call [`ReplicationGuard::release`] to resume. A guard dropped without
/// being released schedules the resume on the current tokio runtime.
#[must_use = "dropping the guard resumes replication in the background"]
pub struct ReplicationGuard {
    controller: ReplicationController,
    secondary: ServerInstanceHandle,
    released: bool,
}

impl ReplicationGuard {
    pub fn secondary(&self) -> &ServerInstanceHandle {
        &self.secondary
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Resume replication on the guarded secondary
    ///
    /// Once a resume has been attempted, later calls return `Ok(())` without
    /// sending anything. A failed attempt is surfaced and not retried.
    ///
    /// A cancelled call does not count as an attempt: the guard stays
    /// unreleased, so a later `release` or the drop still resumes.
    pub async fn release(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.released {
            debug!("Guard for {} already released", self.secondary);
            return Ok(());
        }
        self.released = true;
        let result = self
            .controller
            .start_replication(&self.secondary, cancel)
            .await;
        if matches!(result, Err(Error::Cancelled)) {
            self.released = false;
        }
        result
    }
}

impl fmt::Debug for ReplicationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationGuard")
            .field("secondary", &self.secondary)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for ReplicationGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let controller = self.controller.clone();
        let secondary = self.secondary.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Replication guard for {} dropped without release; resuming in background",
                    secondary
                );
                handle.spawn(async move {
                    if let Err(e) = controller
                        .start_replication(&secondary, &CancellationToken::new())
                        .await
                    {
                        error!("Background resume of {} failed: {}", secondary, e);
                    }
                });
            }
            Err(_) => {
                error!(
                    "Replication guard for {} dropped outside a runtime; {} stays paused",
                    secondary, secondary
                );
            }
        }
    }
}
