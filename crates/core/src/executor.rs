//! Command execution seam
//!
//! The control surface never talks to the network itself. It issues command
//! documents through a [`CommandExecutor`], which owns connections, topology
//! discovery and the wire format.

use crate::error::{Error, Result};
use crate::server::{CommandTarget, ReadPreference, ServerInstanceHandle};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Capability to run an administrative command against a server
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command` against `database` on the member selected by `target`
    ///
    /// Returns the server's reply on success. A reply with `ok: 0` is reported
    /// as [`Error::Command`].
    async fn execute(
        &self,
        database: &str,
        command: Value,
        target: &CommandTarget,
        cancel: &CancellationToken,
    ) -> Result<Value>;

    /// Reserve `instance` for a sequence of commands
    ///
    /// The returned lease keeps the pin alive until it is dropped.
    async fn acquire_pin(&self, instance: &ServerInstanceHandle) -> Result<PinLease>;
}

/// Keeps a pin alive; releases it on drop
pub struct PinLease {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl PinLease {
    /// A lease with nothing to release
    pub fn detached() -> Self {
        Self { release: None }
    }

    /// A lease that runs `release` when dropped
    pub fn on_release(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for PinLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for PinLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinLease")
            .field("attached", &self.release.is_some())
            .finish()
    }
}

/// A request scope whose commands all reach the same server instance
pub struct PinnedRequest<'a> {
    executor: &'a dyn CommandExecutor,
    instance: ServerInstanceHandle,
    _lease: PinLease,
}

impl<'a> PinnedRequest<'a> {
    /// Acquire a pin on `instance` through `executor`
    pub async fn acquire(
        executor: &'a dyn CommandExecutor,
        instance: &ServerInstanceHandle,
        cancel: &CancellationToken,
    ) -> Result<PinnedRequest<'a>> {
        let lease = with_cancellation(cancel, executor.acquire_pin(instance)).await?;
        Ok(Self {
            executor,
            instance: instance.clone(),
            _lease: lease,
        })
    }

    pub fn instance(&self) -> &ServerInstanceHandle {
        &self.instance
    }

    /// Run a command on the pinned instance
    pub async fn run_command(
        &self,
        database: &str,
        command: Value,
        read_preference: ReadPreference,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let target = CommandTarget::Instance {
            instance: self.instance.clone(),
            read_preference,
        };
        with_cancellation(
            cancel,
            self.executor.execute(database, command, &target, cancel),
        )
        .await
    }
}

/// Race `fut` against `cancel`, returning [`Error::Cancelled`] if the token fires first
///
/// Cancellation only abandons the wait; whatever was already sent stays sent.
pub async fn with_cancellation<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Interprets the `ok` field of a command reply
pub fn check_reply(reply: Value) -> Result<Value> {
    let ok = match reply.get("ok") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) >= 1.0,
        Some(Value::Bool(b)) => *b,
        Some(_) => false,
        None => true,
    };
    if ok {
        return Ok(reply);
    }

    let code = reply
        .get("code")
        .and_then(Value::as_i64)
        .and_then(|c| i32::try_from(c).ok())
        .unwrap_or(0);
    let code_name = reply
        .get("codeName")
        .and_then(Value::as_str)
        .unwrap_or("UnknownError")
        .to_string();
    let message = reply
        .get("errmsg")
        .and_then(Value::as_str)
        .unwrap_or("command failed")
        .to_string();
    Err(Error::command(code, code_name, message))
}
