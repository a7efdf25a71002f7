//! Collection namespaces

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A (database, collection) pair identifying the target of index operations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionNamespace {
    database: String,
    collection: String,
}

impl CollectionNamespace {
    /// Create a namespace, rejecting empty or malformed names
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let database = database.into();
        let collection = collection.into();

        if database.is_empty() {
            return Err(Error::invalid_argument("Database name must not be empty"));
        }
        if database.contains(['.', ' ', '/', '\\', '$', '\0']) {
            return Err(Error::invalid_argument(format!(
                "Database name '{database}' contains an invalid character"
            )));
        }
        if collection.is_empty() {
            return Err(Error::invalid_argument("Collection name must not be empty"));
        }
        if collection.contains(['$', '\0']) {
            return Err(Error::invalid_argument(format!(
                "Collection name '{collection}' contains an invalid character"
            )));
        }

        Ok(Self {
            database,
            collection,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for CollectionNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl FromStr for CollectionNamespace {
    type Err = Error;

    /// Parses `db.collection`; the first `.` separates database from collection
    fn from_str(s: &str) -> Result<Self> {
        let (database, collection) = s.split_once('.').ok_or_else(|| {
            Error::invalid_argument(format!("Namespace '{s}' must have the form db.collection"))
        })?;
        Self::new(database, collection)
    }
}
