//! Typed index specifications
//!
//! Index keys are an ordered field-to-direction mapping, and index options are
//! a typed record validated when built. Both convert to and from the command
//! documents the server understands.

use crate::error::{Error, Result};
use crate::namespace::CollectionNamespace;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Sort or type directive for one indexed field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexDirection {
    Ascending,
    Descending,
    Text,
    Hashed,
    Geo2d,
    Geo2dSphere,
    /// Any other index type the server reports, kept verbatim
    Other(String),
}

impl IndexDirection {
    /// Value used in the `key` document
    pub fn to_value(&self) -> Value {
        match self {
            Self::Ascending => json!(1),
            Self::Descending => json!(-1),
            Self::Text => json!("text"),
            Self::Hashed => json!("hashed"),
            Self::Geo2d => json!("2d"),
            Self::Geo2dSphere => json!("2dsphere"),
            Self::Other(kind) => json!(kind),
        }
    }

    /// Parses a direction as stored server-side; numeric directions may be floats
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) if v > 0.0 => Ok(Self::Ascending),
                Some(v) if v < 0.0 => Ok(Self::Descending),
                _ => Err(Error::invalid_argument(format!(
                    "Index direction {n} must be non-zero"
                ))),
            },
            Value::String(s) => match s.as_str() {
                "text" => Ok(Self::Text),
                "hashed" => Ok(Self::Hashed),
                "2d" => Ok(Self::Geo2d),
                "2dsphere" => Ok(Self::Geo2dSphere),
                "" => Err(Error::invalid_argument("Index type must not be empty")),
                other => Ok(Self::Other(other.to_string())),
            },
            other => Err(Error::invalid_argument(format!(
                "Index direction must be a number or string, got {other}"
            ))),
        }
    }

    fn name_suffix(&self) -> &str {
        match self {
            Self::Ascending => "1",
            Self::Descending => "-1",
            Self::Text => "text",
            Self::Hashed => "hashed",
            Self::Geo2d => "2d",
            Self::Geo2dSphere => "2dsphere",
            Self::Other(kind) => kind.as_str(),
        }
    }
}

/// Ordered mapping from field name to [`IndexDirection`]
///
/// Equality is order-sensitive: `{a: 1, b: 1}` and `{b: 1, a: 1}` are distinct
/// indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKeys {
    fields: Vec<(String, IndexDirection)>,
}

impl IndexKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field with an explicit direction
    pub fn with(mut self, field: impl Into<String>, direction: IndexDirection) -> Self {
        self.fields.push((field.into(), direction));
        self
    }

    pub fn ascending(self, field: impl Into<String>) -> Self {
        self.with(field, IndexDirection::Ascending)
    }

    pub fn descending(self, field: impl Into<String>) -> Self {
        self.with(field, IndexDirection::Descending)
    }

    pub fn text(self, field: impl Into<String>) -> Self {
        self.with(field, IndexDirection::Text)
    }

    pub fn hashed(self, field: impl Into<String>) -> Self {
        self.with(field, IndexDirection::Hashed)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexDirection)> {
        self.fields.iter().map(|(f, d)| (f.as_str(), d))
    }

    /// Text fields, which the server folds into one `_fts`/`_ftsx` pair
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, d)| *d == IndexDirection::Text)
            .map(|(f, _)| f.as_str())
    }

    /// The key pattern as the server stores it
    ///
    /// Text fields collapse into `{_fts: "text", _ftsx: 1}` at the position of
    /// the first one; other fields keep their order.
    pub fn stored_form(&self) -> Self {
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut folded = false;
        for (field, direction) in &self.fields {
            if *direction != IndexDirection::Text {
                fields.push((field.clone(), direction.clone()));
            } else if !folded {
                fields.push(("_fts".to_string(), IndexDirection::Text));
                fields.push(("_ftsx".to_string(), IndexDirection::Ascending));
                folded = true;
            }
        }
        Self { fields }
    }

    /// Checks the mapping is usable as an index specification
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::invalid_argument(
                "Index key specification must contain at least one field",
            ));
        }

        let mut seen = HashSet::new();
        for (field, _) in &self.fields {
            if field.is_empty() {
                return Err(Error::invalid_argument("Index field names must not be empty"));
            }
            if !seen.insert(field.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "Field '{field}' appears more than once in the index key specification"
                )));
            }
        }
        Ok(())
    }

    /// Server naming convention: `field_direction` pairs joined with `_`
    pub fn default_name(&self) -> String {
        self.fields
            .iter()
            .map(|(field, direction)| format!("{field}_{}", direction.name_suffix()))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// The `key` document for a command
    pub fn to_document(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(field, direction)| (field.clone(), direction.to_value()))
            .collect();
        Value::Object(map)
    }

    /// Parses a `key` document, preserving field order
    pub fn from_document(doc: &Value) -> Result<Self> {
        let map = doc.as_object().ok_or_else(|| {
            Error::invalid_argument(format!(
                "Index key specification must be a document, got {doc}"
            ))
        })?;

        let fields = map
            .iter()
            .map(|(field, value)| Ok((field.clone(), IndexDirection::from_value(value)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { fields })
    }
}

impl fmt::Display for IndexKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (i, (field, direction)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {}", direction.to_value())?;
        }
        write!(f, " }}")
    }
}

/// Index creation options
///
/// Build with [`IndexOptionsBuilder`]; invalid combinations are rejected by
/// `build()` rather than by the server.
#[derive(Debug, Clone, Default, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct IndexOptions {
    /// Explicit index name; defaults to the key naming convention
    pub name: Option<String>,
    pub unique: Option<bool>,
    pub sparse: Option<bool>,
    /// TTL for documents indexed on a date field
    pub expire_after_seconds: Option<u64>,
    /// Only index documents matching this predicate
    pub partial_filter_expression: Option<Value>,
    pub hidden: Option<bool>,
}

impl IndexOptionsBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(Some(name)) = &self.name {
            if name.is_empty() {
                return Err("Index name must not be empty".to_string());
            }
            if name == "*" {
                return Err("'*' is reserved and cannot be used as an index name".to_string());
            }
        }
        if let Some(Some(filter)) = &self.partial_filter_expression {
            if !filter.is_object() {
                return Err("partialFilterExpression must be a document".to_string());
            }
        }
        Ok(())
    }
}

impl From<IndexOptionsBuilderError> for Error {
    fn from(err: IndexOptionsBuilderError) -> Self {
        Error::invalid_argument(err.to_string())
    }
}

impl IndexOptions {
    pub fn builder() -> IndexOptionsBuilder {
        IndexOptionsBuilder::default()
    }

    fn write_into(&self, doc: &mut Map<String, Value>) {
        if let Some(unique) = self.unique {
            doc.insert("unique".to_string(), json!(unique));
        }
        if let Some(sparse) = self.sparse {
            doc.insert("sparse".to_string(), json!(sparse));
        }
        if let Some(seconds) = self.expire_after_seconds {
            doc.insert("expireAfterSeconds".to_string(), json!(seconds));
        }
        if let Some(filter) = &self.partial_filter_expression {
            doc.insert("partialFilterExpression".to_string(), filter.clone());
        }
        if let Some(hidden) = self.hidden {
            doc.insert("hidden".to_string(), json!(hidden));
        }
    }

    /// Reads the options stored on an index document
    fn from_index_document(doc: &Map<String, Value>) -> Self {
        Self {
            name: doc.get("name").and_then(Value::as_str).map(str::to_string),
            unique: doc.get("unique").and_then(Value::as_bool),
            sparse: doc.get("sparse").and_then(Value::as_bool),
            expire_after_seconds: doc.get("expireAfterSeconds").and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            }),
            partial_filter_expression: doc.get("partialFilterExpression").cloned(),
            hidden: doc.get("hidden").and_then(Value::as_bool),
        }
    }
}

/// One index to create: keys plus options
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub keys: IndexKeys,
    pub options: IndexOptions,
}

impl IndexModel {
    pub fn new(keys: IndexKeys, options: IndexOptions) -> Self {
        Self { keys, options }
    }

    /// Explicit name if given, otherwise the conventional name
    pub fn name(&self) -> String {
        self.options
            .name
            .clone()
            .unwrap_or_else(|| self.keys.default_name())
    }

    /// Entry for the `indexes` array of `createIndexes`
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("key".to_string(), self.keys.to_document());
        doc.insert("name".to_string(), json!(self.name()));
        self.options.write_into(&mut doc);
        Value::Object(doc)
    }
}

impl From<IndexKeys> for IndexModel {
    fn from(keys: IndexKeys) -> Self {
        Self::new(keys, IndexOptions::default())
    }
}

/// An index as reported by the server
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    pub name: String,
    pub namespace: CollectionNamespace,
    pub keys: IndexKeys,
    pub options: IndexOptions,
    /// Index format version (`v`)
    pub version: Option<i64>,
    /// The full document as returned by `listIndexes`
    pub raw: Value,
}

impl IndexDescriptor {
    /// Parses a `listIndexes` entry
    ///
    /// Newer servers omit `ns`; `namespace` is used in that case.
    pub fn from_document(doc: Value, namespace: &CollectionNamespace) -> Result<Self> {
        let map = doc.as_object().ok_or_else(|| {
            Error::serialization(format!("Index entry must be a document, got {doc}"))
        })?;

        let name = map
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::serialization("Index entry is missing 'name'"))?
            .to_string();
        let keys = map
            .get("key")
            .ok_or_else(|| Error::serialization(format!("Index '{name}' is missing 'key'")))
            .and_then(IndexKeys::from_document)?;
        let namespace = match map.get("ns").and_then(Value::as_str) {
            Some(ns) => ns.parse()?,
            None => namespace.clone(),
        };
        let options = IndexOptions::from_index_document(map);
        let version = map.get("v").and_then(Value::as_i64);

        Ok(Self {
            name,
            namespace,
            keys,
            options,
            version,
            raw: doc,
        })
    }

    /// Whether this index was created from `keys`
    ///
    /// Text indexes are listed in their stored form, so the text fields are
    /// compared against the index's `weights` instead.
    pub fn matches_keys(&self, keys: &IndexKeys) -> bool {
        if self.keys == *keys {
            return true;
        }
        let text_fields: HashSet<&str> = keys.text_fields().collect();
        if text_fields.is_empty() || self.keys != keys.stored_form() {
            return false;
        }
        let weighted: HashSet<&str> = self
            .raw
            .get("weights")
            .and_then(Value::as_object)
            .map(|weights| weights.keys().map(String::as_str).collect())
            .unwrap_or_default();
        weighted == text_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_name_follows_server_convention() {
        let keys = IndexKeys::new().ascending("a").descending("b");
        assert_eq!(keys.default_name(), "a_1_b_-1");

        let keys = IndexKeys::new().text("body").hashed("tenant");
        assert_eq!(keys.default_name(), "body_text_tenant_hashed");

        let keys = IndexKeys::new().with("loc", IndexDirection::Geo2dSphere);
        assert_eq!(keys.default_name(), "loc_2dsphere");
    }

    #[test]
    fn test_key_document_preserves_field_order() {
        let keys = IndexKeys::new().descending("z").ascending("a");
        let doc = keys.to_document();
        let fields: Vec<&String> = doc.as_object().expect("object").keys().collect();
        assert_eq!(fields, vec!["z", "a"]);

        let parsed = IndexKeys::from_document(&doc).expect("parse");
        assert_eq!(parsed, keys);
    }

    #[test]
    fn test_key_order_matters_for_equality() {
        let ab = IndexKeys::new().ascending("a").ascending("b");
        let ba = IndexKeys::new().ascending("b").ascending("a");
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_validate_rejects_empty_and_duplicate_fields() {
        assert!(matches!(
            IndexKeys::new().validate(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(IndexKeys::new().ascending("").validate().is_err());
        assert!(IndexKeys::new()
            .ascending("a")
            .descending("a")
            .validate()
            .is_err());
        assert!(IndexKeys::new().ascending("a").validate().is_ok());
    }

    #[test]
    fn test_direction_parses_float_numbers() {
        assert_eq!(
            IndexDirection::from_value(&json!(1.0)).expect("asc"),
            IndexDirection::Ascending
        );
        assert_eq!(
            IndexDirection::from_value(&json!(-1)).expect("desc"),
            IndexDirection::Descending
        );
        assert!(IndexDirection::from_value(&json!(0)).is_err());
        assert!(IndexDirection::from_value(&json!("")).is_err());
    }

    #[test]
    fn test_unknown_index_type_is_kept() {
        let direction = IndexDirection::from_value(&json!("columnstore")).expect("kept");
        assert_eq!(direction, IndexDirection::Other("columnstore".to_string()));
        assert_eq!(direction.to_value(), json!("columnstore"));

        let keys = IndexKeys::from_document(&json!({ "pos": "geoHaystack", "kind": 1 }))
            .expect("parse");
        assert_eq!(keys.default_name(), "pos_geoHaystack_kind_1");
        assert_eq!(keys.to_string(), r#"{ pos: "geoHaystack", kind: 1 }"#);
    }

    #[test]
    fn test_stored_form_folds_text_fields() {
        let keys = IndexKeys::new()
            .ascending("tenant")
            .text("title")
            .text("body")
            .descending("at");
        assert_eq!(
            keys.stored_form().to_document(),
            json!({ "tenant": 1, "_fts": "text", "_ftsx": 1, "at": -1 })
        );

        let plain = IndexKeys::new().ascending("a");
        assert_eq!(plain.stored_form(), plain);
    }

    #[test]
    fn test_text_descriptor_matches_requested_keys() {
        let ns = CollectionNamespace::new("db", "posts").expect("namespace");
        let doc = json!({
            "v": 2,
            "key": { "_fts": "text", "_ftsx": 1 },
            "name": "body_text",
            "weights": { "body": 1 },
            "default_language": "english",
            "language_override": "language",
            "textIndexVersion": 3
        });
        let descriptor = IndexDescriptor::from_document(doc, &ns).expect("descriptor");

        assert!(descriptor.matches_keys(&IndexKeys::new().text("body")));
        assert!(!descriptor.matches_keys(&IndexKeys::new().text("title")));
        assert!(!descriptor.matches_keys(&IndexKeys::new().ascending("body")));
    }

    #[test]
    fn test_options_builder_validates() {
        let options = IndexOptions::builder()
            .unique(true)
            .name("by_customer")
            .build()
            .expect("valid options");
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.name.as_deref(), Some("by_customer"));

        assert!(IndexOptions::builder().name("").build().is_err());
        assert!(IndexOptions::builder().name("*").build().is_err());
        assert!(IndexOptions::builder()
            .partial_filter_expression(json!(5))
            .build()
            .is_err());
    }

    #[test]
    fn test_model_document_includes_options() {
        let options = IndexOptions::builder()
            .sparse(true)
            .expire_after_seconds(3600u64)
            .build()
            .expect("valid options");
        let model = IndexModel::new(IndexKeys::new().ascending("createdAt"), options);

        assert_eq!(
            model.to_document(),
            json!({
                "key": { "createdAt": 1 },
                "name": "createdAt_1",
                "sparse": true,
                "expireAfterSeconds": 3600
            })
        );
    }

    #[test]
    fn test_descriptor_falls_back_to_bound_namespace() {
        let ns = CollectionNamespace::new("db", "orders").expect("namespace");
        let doc = json!({
            "v": 2,
            "key": { "customerId": 1 },
            "name": "customerId_1",
            "unique": true
        });

        let descriptor = IndexDescriptor::from_document(doc, &ns).expect("descriptor");
        assert_eq!(descriptor.name, "customerId_1");
        assert_eq!(descriptor.namespace, ns);
        assert_eq!(descriptor.version, Some(2));
        assert_eq!(descriptor.options.unique, Some(true));
        assert_eq!(descriptor.keys, IndexKeys::new().ascending("customerId"));
    }

    #[test]
    fn test_descriptor_requires_name_and_key() {
        let ns = CollectionNamespace::new("db", "orders").expect("namespace");
        assert!(IndexDescriptor::from_document(json!({ "key": { "a": 1 } }), &ns).is_err());
        assert!(IndexDescriptor::from_document(json!({ "name": "a_1" }), &ns).is_err());
    }
}
