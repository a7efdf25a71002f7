//! Command handlers behind the `doccontrol` subcommands
//!
//! Each handler takes a bootstrapped [`TestContext`] and returns the lines to
//! print, so the binary stays a thin shell around them.

use crate::keys::parse_keys;
use anyhow::{Context, Result};
use doccontrol_core::executor::with_cancellation;
use doccontrol_core::index::{IndexDescriptor, IndexOptions};
use doccontrol_core::namespace::CollectionNamespace;
use doccontrol_core::server::ServerInstanceHandle;
use doccontrol_driver::{CollectionIndexManager, FailPointMode, IndexManager, TestContext};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Arguments of `indexes create`
#[derive(Debug, Clone, Default)]
pub struct CreateIndexArgs {
    /// `field[:direction]` arguments in key order
    pub keys: Vec<String>,
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
    pub hidden: bool,
    pub expire_after_seconds: Option<u64>,
    /// JSON document
    pub partial_filter: Option<String>,
}

/// What `indexes drop` removes
#[derive(Debug, Clone)]
pub enum DropTarget {
    Name(String),
    Keys(Vec<String>),
    All,
}

/// Resolve `--collection`: `db.coll`, a bare collection in the context's database, or the default
pub fn resolve_namespace(
    context: &TestContext,
    collection: Option<&str>,
) -> Result<CollectionNamespace> {
    match collection {
        None => Ok(context.namespace().clone()),
        Some(value) if value.contains('.') => value
            .parse()
            .with_context(|| format!("Invalid namespace '{value}'")),
        Some(value) => CollectionNamespace::new(context.namespace().database(), value)
            .with_context(|| format!("Invalid collection '{value}'")),
    }
}

fn manager(context: &TestContext, collection: Option<&str>) -> Result<CollectionIndexManager> {
    Ok(context.index_manager_for(resolve_namespace(context, collection)?))
}

fn format_index(index: &IndexDescriptor) -> String {
    let mut flags = Vec::new();
    if index.options.unique == Some(true) {
        flags.push("unique".to_string());
    }
    if index.options.sparse == Some(true) {
        flags.push("sparse".to_string());
    }
    if index.options.hidden == Some(true) {
        flags.push("hidden".to_string());
    }
    if let Some(seconds) = index.options.expire_after_seconds {
        flags.push(format!("ttl={seconds}s"));
    }
    if index.options.partial_filter_expression.is_some() {
        flags.push("partial".to_string());
    }

    if flags.is_empty() {
        format!("{}\t{}", index.name, index.keys)
    } else {
        format!("{}\t{}\t{}", index.name, index.keys, flags.join(","))
    }
}

/// `indexes list`
pub async fn list_indexes(
    context: &TestContext,
    collection: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let manager = manager(context, collection)?;
    let indexes = manager
        .list_indexes(cancel)
        .await?
        .try_collect(cancel)
        .await?;

    if indexes.is_empty() {
        return Ok(vec![format!("No indexes on {}", manager.namespace())]);
    }
    Ok(indexes.iter().map(format_index).collect())
}

/// `indexes create`
pub async fn create_index(
    context: &TestContext,
    collection: Option<&str>,
    args: CreateIndexArgs,
    cancel: &CancellationToken,
) -> Result<String> {
    let keys = parse_keys(&args.keys)?;

    let mut builder = IndexOptions::builder();
    if let Some(name) = args.name {
        builder.name(name);
    }
    if args.unique {
        builder.unique(true);
    }
    if args.sparse {
        builder.sparse(true);
    }
    if args.hidden {
        builder.hidden(true);
    }
    if let Some(seconds) = args.expire_after_seconds {
        builder.expire_after_seconds(seconds);
    }
    if let Some(filter) = args.partial_filter {
        let filter: serde_json::Value = serde_json::from_str(&filter)
            .with_context(|| format!("Partial filter is not valid JSON: {filter}"))?;
        builder.partial_filter_expression(filter);
    }
    let options = builder.build()?;

    let manager = manager(context, collection)?;
    let name = manager.create_index(keys, options, cancel).await?;
    Ok(format!("Index '{name}' ready on {}", manager.namespace()))
}

/// `indexes drop`
pub async fn drop_index(
    context: &TestContext,
    collection: Option<&str>,
    target: DropTarget,
    cancel: &CancellationToken,
) -> Result<String> {
    let manager = manager(context, collection)?;
    let namespace = manager.namespace().clone();
    match target {
        DropTarget::Name(name) => {
            manager.drop_index(&name, cancel).await?;
            Ok(format!("Dropped index '{name}' from {namespace}"))
        }
        DropTarget::Keys(args) => {
            let keys = parse_keys(&args)?;
            manager.drop_index_by_keys(&keys, cancel).await?;
            Ok(format!("Dropped index {keys} from {namespace}"))
        }
        DropTarget::All => {
            manager.drop_all_indexes(cancel).await?;
            Ok(format!("Dropped all indexes from {namespace}"))
        }
    }
}

fn parse_secondary(secondary: &str) -> Result<ServerInstanceHandle> {
    secondary
        .parse()
        .with_context(|| format!("Invalid secondary address '{secondary}'"))
}

/// `replication stop`
///
/// Leaves the secondary paused after the process exits; undo with `replication start`.
pub async fn stop_replication(
    context: &TestContext,
    secondary: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let secondary = parse_secondary(secondary)?;
    context
        .replication()
        .configure_fail_point(&secondary, FailPointMode::AlwaysOn, cancel)
        .await?;
    Ok(format!(
        "Replication paused on {secondary}; \
         run 'doccontrol replication start {secondary}' to resume"
    ))
}

/// `replication start`
pub async fn start_replication(
    context: &TestContext,
    secondary: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let secondary = parse_secondary(secondary)?;
    context
        .replication()
        .start_replication(&secondary, cancel)
        .await?;
    Ok(format!("Replication resumed on {secondary}"))
}

/// `replication pause-for`
///
/// Cancelling the wait cuts the pause short; the resume is still sent.
pub async fn pause_replication_for(
    context: &TestContext,
    secondary: &str,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<String> {
    let secondary = parse_secondary(secondary)?;
    info!("Pausing replication on {} for {:?}", secondary, duration);

    let waited = context
        .replication()
        .with_replication_stopped(&secondary, cancel, || async {
            let outcome = with_cancellation(cancel, async {
                tokio::time::sleep(duration).await;
                Ok(())
            })
            .await;
            Ok(outcome.is_ok())
        })
        .await?;

    if waited {
        Ok(format!(
            "Replication on {secondary} was paused for {}s and has resumed",
            duration.as_secs_f64()
        ))
    } else {
        Ok(format!(
            "Pause on {secondary} interrupted; replication has resumed"
        ))
    }
}

/// `topology`
pub fn describe_topology(context: &TestContext) -> Vec<String> {
    let topology = context.topology();
    let mut lines = vec![format!("Deployment: {topology}")];
    if let Some(primary) = topology.primary() {
        lines.push(format!("Primary: {primary}"));
    }
    for secondary in topology.secondaries() {
        lines.push(format!("Secondary: {secondary}"));
    }
    lines.push(format!("Namespace: {}", context.namespace()));
    lines
}
