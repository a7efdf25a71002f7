//! doccontrol CLI - index lifecycle and replication control
//!
//! This binary provides the command-line interface over the doccontrol library.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doccontrol::commands::{self, CreateIndexArgs, DropTarget};
use doccontrol_core::config::Config;
use doccontrol_driver::TestContext;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "doccontrol")]
#[command(about = "Index lifecycle and replication control for MongoDB deployments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Connection string; overrides configuration
    #[arg(long, value_name = "URI", global = true)]
    uri: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the indexes of a collection
    #[command(subcommand)]
    Indexes(IndexCommands),
    /// Pause or resume oplog application on a secondary
    #[command(subcommand)]
    Replication(ReplicationCommands),
    /// Show the deployment topology
    Topology,
}

#[derive(Args)]
struct CollectionArg {
    /// Collection as `db.collection` or a bare name in the configured database
    #[arg(long)]
    collection: Option<String>,
}

#[derive(Subcommand)]
enum IndexCommands {
    /// List indexes
    List {
        #[command(flatten)]
        target: CollectionArg,
    },
    /// Create an index from `field[:direction]` keys
    Create {
        #[command(flatten)]
        target: CollectionArg,
        /// Keys in order, e.g. `customerId` or `createdAt:-1`
        #[arg(required = true, value_name = "KEY")]
        keys: Vec<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        unique: bool,
        #[arg(long)]
        sparse: bool,
        #[arg(long)]
        hidden: bool,
        /// TTL in seconds
        #[arg(long, value_name = "SECONDS")]
        expire_after: Option<u64>,
        /// Partial filter expression as JSON
        #[arg(long, value_name = "JSON")]
        partial_filter: Option<String>,
    },
    /// Drop an index by name, by keys, or all of them
    Drop {
        #[command(flatten)]
        target: CollectionArg,
        /// Index name
        #[arg(conflicts_with_all = ["keys", "all"], required_unless_present_any = ["keys", "all"])]
        name: Option<String>,
        /// Drop the single index with these keys
        #[arg(long, num_args = 1.., value_name = "KEY", conflicts_with = "all")]
        keys: Vec<String>,
        /// Drop every index on the collection
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum ReplicationCommands {
    /// Pause oplog application; stays paused until `start`
    Stop {
        /// Secondary as `host:port`
        secondary: String,
    },
    /// Resume oplog application
    Start {
        /// Secondary as `host:port`
        secondary: String,
    },
    /// Pause oplog application for a fixed time, then resume
    PauseFor {
        /// Secondary as `host:port`
        secondary: String,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let config = load_config(cli.config.as_deref(), cli.uri)?;
    let context = TestContext::connect(config, &cancel)
        .await
        .context("Failed to connect to the deployment")?;

    let lines = run(cli.command, &context, &cancel).await?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Initialize logging system
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "doccontrol={level},doccontrol_core={level},doccontrol_driver={level}"
        ))
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted; cancelling");
                cancel.cancel();
            }
            Err(e) => debug!("Could not listen for Ctrl-C: {e}"),
        }
    });
}

fn load_config(config_path: Option<&Path>, uri: Option<String>) -> Result<Config> {
    let mut config = Config::load(config_path).context("Failed to load configuration")?;
    if let Some(uri) = uri {
        config.connection.uri = uri;
    }
    config.validate()?;
    Ok(config)
}

async fn run(
    command: Commands,
    context: &TestContext,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    match command {
        Commands::Indexes(IndexCommands::List { target }) => {
            commands::list_indexes(context, target.collection.as_deref(), cancel).await
        }
        Commands::Indexes(IndexCommands::Create {
            target,
            keys,
            name,
            unique,
            sparse,
            hidden,
            expire_after,
            partial_filter,
        }) => {
            let args = CreateIndexArgs {
                keys,
                name,
                unique,
                sparse,
                hidden,
                expire_after_seconds: expire_after,
                partial_filter,
            };
            commands::create_index(context, target.collection.as_deref(), args, cancel)
                .await
                .map(|line| vec![line])
        }
        Commands::Indexes(IndexCommands::Drop {
            target,
            name,
            keys,
            all,
        }) => {
            let drop_target = match (name, all) {
                (_, true) => DropTarget::All,
                (Some(name), false) => DropTarget::Name(name),
                (None, false) => DropTarget::Keys(keys),
            };
            commands::drop_index(context, target.collection.as_deref(), drop_target, cancel)
                .await
                .map(|line| vec![line])
        }
        Commands::Replication(ReplicationCommands::Stop { secondary }) => {
            commands::stop_replication(context, &secondary, cancel)
                .await
                .map(|line| vec![line])
        }
        Commands::Replication(ReplicationCommands::Start { secondary }) => {
            commands::start_replication(context, &secondary, cancel)
                .await
                .map(|line| vec![line])
        }
        Commands::Replication(ReplicationCommands::PauseFor { secondary, seconds }) => {
            commands::pause_replication_for(
                context,
                &secondary,
                Duration::from_secs(seconds),
                cancel,
            )
            .await
            .map(|line| vec![line])
        }
        Commands::Topology => Ok(commands::describe_topology(context)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_drop_requires_a_target() {
        assert!(Cli::try_parse_from(["doccontrol", "indexes", "drop"]).is_err());
        assert!(Cli::try_parse_from(["doccontrol", "indexes", "drop", "a_1"]).is_ok());
        assert!(Cli::try_parse_from(["doccontrol", "indexes", "drop", "--all"]).is_ok());
        assert!(
            Cli::try_parse_from(["doccontrol", "indexes", "drop", "--keys", "a:1", "b:-1"]).is_ok()
        );
    }

    #[test]
    fn test_create_requires_keys() {
        assert!(Cli::try_parse_from(["doccontrol", "indexes", "create"]).is_err());
        assert!(Cli::try_parse_from([
            "doccontrol",
            "indexes",
            "create",
            "customerId",
            "--unique",
            "--collection",
            "db.orders"
        ])
        .is_ok());
    }

    #[test]
    fn test_pause_for_defaults_to_ten_seconds() {
        let cli = Cli::try_parse_from(["doccontrol", "replication", "pause-for", "node2:27017"])
            .unwrap();
        match cli.command {
            Commands::Replication(ReplicationCommands::PauseFor { seconds, .. }) => {
                assert_eq!(seconds, 10)
            }
            _ => panic!("expected pause-for"),
        }
    }
}
