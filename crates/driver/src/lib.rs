#![deny(warnings)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Index lifecycle and replication control over a document database
//!
//! Everything here issues administrative commands through a
//! [`CommandExecutor`](doccontrol_core::CommandExecutor); the crate never opens
//! sockets itself unless the `mongodb` feature supplies a real executor.

mod context;
mod factory;
pub mod indexes;
pub mod mock;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod replication;
pub mod topology;

// Export factory functions
pub use factory::create_command_executor;

pub use context::TestContext;
pub use indexes::{CollectionIndexManager, IndexCursor, IndexManager, IndexManagerSettings};
pub use mock::{CommandRecord, MockDeployment, MockFailure};
#[cfg(feature = "mongodb")]
pub use mongo::MongoCommandExecutor;
pub use replication::{FailPointMode, ReplicationController, ReplicationGuard};
pub use topology::{Topology, TopologyProbe};
