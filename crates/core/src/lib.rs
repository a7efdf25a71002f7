//! Core types and traits for the doccontrol control surface
//!
//! This crate provides the foundational abstractions shared by the index and
//! replication controllers, including:
//!
//! - **Namespaces**: collection namespaces indexes are bound to
//! - **Index model**: typed key specifications, options and descriptors
//! - **Servers**: instance handles, read preferences and routing targets
//! - **Executor**: the command execution seam and pinned request scopes
//! - **Configuration**: system configuration management
//! - **Error handling**: unified error types
//!

pub mod config;
pub mod error;
pub mod executor;
pub mod index;
pub mod namespace;
pub mod server;

// Re-export main types for convenience
pub use config::{Config, ConnectionConfig, IndexesConfig, ReplicationConfig, WriteConcern};
pub use error::{Error, Result, ResultExt};
pub use executor::{with_cancellation, CommandExecutor, PinLease, PinnedRequest};
pub use index::{
    IndexDescriptor, IndexDirection, IndexKeys, IndexModel, IndexOptions, IndexOptionsBuilder,
};
pub use namespace::CollectionNamespace;
pub use server::{CommandTarget, MemberRole, ReadPreference, ServerInstanceHandle};

/// Version of the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Result, ResultExt};
    pub use crate::index::{IndexKeys, IndexOptions};
    pub use crate::namespace::CollectionNamespace;
}
