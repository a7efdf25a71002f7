use thiserror::Error;

/// Result type for doccontrol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for doccontrol operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed key specification, options, or other caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Drop target does not exist
    #[error("Index '{name}' not found on {namespace}")]
    NotFound { namespace: String, name: String },

    /// An index with the same name (or keys) exists with a different definition
    #[error("Index conflict: {0}")]
    IndexConflict(String),

    /// Drop-by-keys resolved to zero or several indexes
    #[error("Expected exactly one index with keys {keys} on {namespace}, found {matches}")]
    AmbiguousOrNotFound {
        namespace: String,
        keys: String,
        matches: usize,
    },

    /// The targeted server could not be reached or selected
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    /// Connection or command-execution failure below the command layer
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server rejected a command
    #[error("Command failed ({code_name} {code}): {message}")]
    Command {
        code: i32,
        code_name: String,
        message: String,
    },

    /// Fail-point toggle rejected or unreachable
    #[error("Replication control failure: {0}")]
    ReplicationControl(String),

    /// The caller cancelled the wait for a response
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed server response or document conversion failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Server error codes the control surface interprets
pub mod codes {
    pub const NAMESPACE_NOT_FOUND: i32 = 26;
    pub const INDEX_NOT_FOUND: i32 = 27;
    pub const CANNOT_CREATE_INDEX: i32 = 67;
    pub const INDEX_OPTIONS_CONFLICT: i32 = 85;
    pub const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
}

impl Error {
    /// Creates an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a not found error for an index name
    pub fn not_found(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Creates an index conflict error
    pub fn index_conflict(msg: impl Into<String>) -> Self {
        Self::IndexConflict(msg.into())
    }

    /// Creates an unreachable-server error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    /// Creates a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a server command error
    pub fn command(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            code,
            code_name: code_name.into(),
            message: message.into(),
        }
    }

    /// Creates a replication control error
    pub fn replication_control(msg: impl Into<String>) -> Self {
        Self::ReplicationControl(msg.into())
    }

    /// Creates a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Adds context to any error
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Server error code, if the server rejected the command
    pub fn command_code(&self) -> Option<i32> {
        match self {
            Self::Command { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for failures below the command layer (network, selection)
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Unreachable(_))
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::with_context(context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_only_for_command_errors() {
        let err = Error::command(codes::INDEX_NOT_FOUND, "IndexNotFound", "index not found");
        assert_eq!(err.command_code(), Some(27));
        assert_eq!(Error::Cancelled.command_code(), None);
    }

    #[test]
    fn test_transport_classification() {
        assert!(Error::transport("connection reset").is_transport());
        assert!(Error::unreachable("no suitable server").is_transport());
        assert!(!Error::invalid_argument("empty keys").is_transport());
    }

    #[test]
    fn test_ambiguous_message_names_match_count() {
        let err = Error::AmbiguousOrNotFound {
            namespace: "db.orders".to_string(),
            keys: "{ customerId: 1 }".to_string(),
            matches: 2,
        };
        assert!(err.to_string().contains("found 2"));
    }
}
