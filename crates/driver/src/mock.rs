//! In-memory deployment for testing
//!
//! `MockDeployment` implements [`CommandExecutor`] by interpreting the handful
//! of commands the control surface issues against an in-memory replica set or
//! standalone server. It records every command it receives so tests can assert
//! on routing and pinning.
//!
//! Unlike a real server it does not materialise the implicit `_id_` index.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use async_trait::async_trait;
use doccontrol_core::error::{codes, Error, Result};
use doccontrol_core::executor::{CommandExecutor, PinLease};
use doccontrol_core::server::{CommandTarget, MemberRole, ReadPreference, ServerInstanceHandle};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_BATCH_SIZE: usize = 101;
const CURSOR_NOT_FOUND: i32 = 43;
const BAD_VALUE: i32 = 2;
const COMMAND_NOT_FOUND: i32 = 59;
const NOT_WRITABLE_PRIMARY: i32 = 10107;

/// A command received by the mock, in arrival order
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub address: ServerInstanceHandle,
    pub database: String,
    pub command_name: String,
    pub command: Value,
    /// Whether a pin on `address` was held when the command arrived
    pub pinned: bool,
}

/// A failure to inject for the next command with a given name
#[derive(Debug, Clone)]
pub enum MockFailure {
    Command {
        code: i32,
        code_name: String,
        message: String,
    },
    Transport(String),
}

impl From<MockFailure> for Error {
    fn from(failure: MockFailure) -> Self {
        match failure {
            MockFailure::Command {
                code,
                code_name,
                message,
            } => Error::command(code, code_name, message),
            MockFailure::Transport(message) => Error::transport(message),
        }
    }
}

#[derive(Debug)]
struct MockNode {
    address: ServerInstanceHandle,
    role: MemberRole,
    reachable: bool,
    fail_points: HashMap<String, String>,
}

#[derive(Debug)]
struct MockCursor {
    namespace: String,
    remaining: VecDeque<Value>,
}

#[derive(Debug, Default)]
struct MockData {
    set_name: Option<String>,
    nodes: Vec<MockNode>,
    collections: HashMap<String, Vec<Value>>, // namespace -> index documents
    cursors: HashMap<i64, MockCursor>,
    next_cursor_id: i64,
    log: Vec<CommandRecord>,
    active_pins: HashMap<ServerInstanceHandle, usize>,
    pending_failures: HashMap<String, VecDeque<MockFailure>>,
}

/// In-memory replica set or standalone server
#[derive(Clone)]
pub struct MockDeployment {
    data: Arc<Mutex<MockData>>,
    latency: Option<Duration>,
}

impl MockDeployment {
    /// A replica set; the first member is the primary, the rest are secondaries
    pub fn replica_set(set_name: &str, members: &[&str]) -> Self {
        let nodes = members
            .iter()
            .enumerate()
            .map(|(i, address)| {
                let role = if i == 0 {
                    MemberRole::Primary
                } else {
                    MemberRole::Secondary
                };
                MockNode::new(parse_address(address), role)
            })
            .collect();

        Self::from_data(MockData {
            set_name: Some(set_name.to_string()),
            nodes,
            next_cursor_id: 1,
            ..MockData::default()
        })
    }

    /// A single standalone server
    pub fn standalone(address: &str) -> Self {
        Self::from_data(MockData {
            nodes: vec![MockNode::new(
                parse_address(address),
                MemberRole::Standalone,
            )],
            next_cursor_id: 1,
            ..MockData::default()
        })
    }

    /// Builds a deployment shaped like the one a connection string describes
    ///
    /// A `replicaSet` option yields a replica set over the listed hosts;
    /// otherwise the first host is a standalone server.
    pub fn from_uri(uri: &str) -> Self {
        let rest = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);
        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, query),
            None => (rest, ""),
        };
        let authority = authority.split('/').next().unwrap_or_default();
        let hosts = authority
            .rsplit_once('@')
            .map(|(_, hosts)| hosts)
            .unwrap_or(authority);
        let hosts: Vec<&str> = hosts.split(',').filter(|h| !h.is_empty()).collect();
        let hosts = if hosts.is_empty() {
            vec!["localhost:27017"]
        } else {
            hosts
        };

        let set_name = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.eq_ignore_ascii_case("replicaSet"))
            .map(|(_, value)| value.to_string());

        match set_name {
            Some(set_name) => Self::replica_set(&set_name, &hosts),
            None => Self::standalone(hosts[0]),
        }
    }

    fn from_data(data: MockData) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            latency: None,
        }
    }

    /// Delay every command by `latency` before it is applied
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Address of the current primary, if any
    pub fn primary(&self) -> Option<ServerInstanceHandle> {
        self.data
            .lock()
            .unwrap()
            .nodes
            .iter()
            .find(|n| n.role == MemberRole::Primary)
            .map(|n| n.address.clone())
    }

    /// Addresses of all secondaries
    pub fn secondaries(&self) -> Vec<ServerInstanceHandle> {
        self.data
            .lock()
            .unwrap()
            .nodes
            .iter()
            .filter(|n| n.role == MemberRole::Secondary)
            .map(|n| n.address.clone())
            .collect()
    }

    /// Current mode of a fail point on one member; `off` if never configured
    pub fn fail_point_mode(&self, address: &ServerInstanceHandle, fail_point: &str) -> String {
        self.data
            .lock()
            .unwrap()
            .nodes
            .iter()
            .find(|n| &n.address == address)
            .and_then(|n| n.fail_points.get(fail_point).cloned())
            .unwrap_or_else(|| "off".to_string())
    }

    /// Mark a member reachable or unreachable
    pub fn set_reachable(&self, address: &ServerInstanceHandle, reachable: bool) {
        let mut data = self.data.lock().unwrap();
        if let Some(node) = data.nodes.iter_mut().find(|n| &n.address == address) {
            node.reachable = reachable;
        }
    }

    /// Fail the next command named `command_name` with `failure`
    pub fn fail_next(&self, command_name: &str, failure: MockFailure) {
        self.data
            .lock()
            .unwrap()
            .pending_failures
            .entry(command_name.to_string())
            .or_default()
            .push_back(failure);
    }

    /// All commands received so far
    pub fn commands(&self) -> Vec<CommandRecord> {
        self.data.lock().unwrap().log.clone()
    }

    /// Number of commands received with the given name
    pub fn command_count(&self, command_name: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|r| r.command_name == command_name)
            .count()
    }

    /// Number of pins currently held across all members
    pub fn active_pins(&self) -> usize {
        self.data.lock().unwrap().active_pins.values().sum()
    }

    /// Number of server-side cursors still open
    pub fn open_cursors(&self) -> usize {
        self.data.lock().unwrap().cursors.len()
    }

    /// Names of the indexes stored for `namespace` (`db.collection`)
    pub fn index_names(&self, namespace: &str) -> Vec<String> {
        self.data
            .lock()
            .unwrap()
            .collections
            .get(namespace)
            .map(|indexes| {
                indexes
                    .iter()
                    .filter_map(|doc| doc.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a collection exists
    pub fn collection_exists(&self, namespace: &str) -> bool {
        self.data
            .lock()
            .unwrap()
            .collections
            .contains_key(namespace)
    }

    /// Clear collections, cursors and the command log (for test cleanup)
    pub fn clear(&self) {
        let mut data = self.data.lock().unwrap();
        data.collections.clear();
        data.cursors.clear();
        data.log.clear();
        data.pending_failures.clear();
    }
}

impl MockNode {
    fn new(address: ServerInstanceHandle, role: MemberRole) -> Self {
        Self {
            address,
            role,
            reachable: true,
            fail_points: HashMap::new(),
        }
    }
}

fn parse_address(address: &str) -> ServerInstanceHandle {
    address
        .parse()
        .unwrap_or_else(|_| ServerInstanceHandle::new(address, 27017))
}

fn command_error(code: i32, code_name: &str, message: impl Into<String>) -> Error {
    Error::command(code, code_name, message)
}

impl MockData {
    fn select(&self, target: &CommandTarget) -> Result<usize> {
        match target {
            CommandTarget::Primary => self.select_by_preference(ReadPreference::Primary),
            CommandTarget::ReadPreference(preference) => self.select_by_preference(*preference),
            CommandTarget::Instance {
                instance,
                read_preference,
            } => {
                let index = self
                    .nodes
                    .iter()
                    .position(|n| &n.address == instance)
                    .ok_or_else(|| {
                        Error::unreachable(format!("{instance} is not a member of the deployment"))
                    })?;
                let node = &self.nodes[index];
                if !node.reachable {
                    return Err(Error::unreachable(format!("{instance} is unreachable")));
                }
                if !read_preference.accepts(node.role) {
                    return Err(Error::unreachable(format!(
                        "{instance} is {:?}, which does not satisfy read preference \
                         {read_preference:?}",
                        node.role
                    )));
                }
                Ok(index)
            }
        }
    }

    fn select_by_preference(&self, preference: ReadPreference) -> Result<usize> {
        let prefers_secondary = matches!(
            preference,
            ReadPreference::Secondary | ReadPreference::SecondaryPreferred
        );
        let eligible = |n: &&MockNode| n.reachable && preference.accepts(n.role);

        let preferred = if prefers_secondary {
            self.nodes
                .iter()
                .filter(eligible)
                .find(|n| n.role == MemberRole::Secondary)
        } else {
            self.nodes
                .iter()
                .filter(eligible)
                .find(|n| matches!(n.role, MemberRole::Primary | MemberRole::Standalone))
        };

        preferred
            .or_else(|| self.nodes.iter().find(eligible))
            .and_then(|n| self.nodes.iter().position(|m| m.address == n.address))
            .ok_or_else(|| {
                Error::unreachable(format!(
                    "No reachable member satisfies read preference {preference:?}"
                ))
            })
    }

    fn is_writable(&self, node: usize) -> bool {
        matches!(
            self.nodes[node].role,
            MemberRole::Primary | MemberRole::Standalone
        )
    }

    fn dispatch(
        &mut self,
        node: usize,
        database: &str,
        name: &str,
        command: &Map<String, Value>,
    ) -> Result<Value> {
        match name {
            "isMaster" | "ismaster" | "hello" => Ok(self.is_master(node)),
            "ping" => Ok(json!({ "ok": 1 })),
            "configureFailPoint" => self.configure_fail_point(node, command),
            "createIndexes" => {
                self.require_writable(node)?;
                self.create_indexes(database, command)
            }
            "dropIndexes" => {
                self.require_writable(node)?;
                self.drop_indexes(database, command)
            }
            "listIndexes" => self.list_indexes(database, command),
            "getMore" => self.get_more(command),
            "killCursors" => self.kill_cursors(command),
            "drop" => {
                self.require_writable(node)?;
                self.drop_collection(database, command)
            }
            other => Err(command_error(
                COMMAND_NOT_FOUND,
                "CommandNotFound",
                format!("no such command: '{other}'"),
            )),
        }
    }

    fn require_writable(&self, node: usize) -> Result<()> {
        if self.is_writable(node) {
            Ok(())
        } else {
            Err(command_error(
                NOT_WRITABLE_PRIMARY,
                "NotWritablePrimary",
                "not primary",
            ))
        }
    }

    fn is_master(&self, node: usize) -> Value {
        let me = &self.nodes[node];
        let mut reply = json!({
            "ismaster": self.is_writable(node),
            "secondary": me.role == MemberRole::Secondary,
            "me": me.address.to_string(),
            "maxWireVersion": 17,
            "ok": 1
        });

        if let (Some(set_name), Some(map)) = (&self.set_name, reply.as_object_mut()) {
            let hosts: Vec<String> = self.nodes.iter().map(|n| n.address.to_string()).collect();
            map.insert("setName".to_string(), json!(set_name));
            map.insert("hosts".to_string(), json!(hosts));
            if let Some(primary) = self.nodes.iter().find(|n| n.role == MemberRole::Primary) {
                map.insert("primary".to_string(), json!(primary.address.to_string()));
            }
        }
        reply
    }

    fn configure_fail_point(&mut self, node: usize, command: &Map<String, Value>) -> Result<Value> {
        let fail_point = command
            .get("configureFailPoint")
            .and_then(Value::as_str)
            .ok_or_else(|| command_error(BAD_VALUE, "BadValue", "fail point name required"))?;
        let mode = command
            .get("mode")
            .and_then(Value::as_str)
            .filter(|mode| matches!(*mode, "off" | "alwaysOn"))
            .ok_or_else(|| {
                command_error(BAD_VALUE, "BadValue", "mode must be 'off' or 'alwaysOn'")
            })?;

        self.nodes[node]
            .fail_points
            .insert(fail_point.to_string(), mode.to_string());
        Ok(json!({ "count": 0, "ok": 1 }))
    }

    fn create_indexes(&mut self, database: &str, command: &Map<String, Value>) -> Result<Value> {
        let namespace = namespace_of(database, command, "createIndexes")?;
        let specs = command
            .get("indexes")
            .and_then(Value::as_array)
            .filter(|specs| !specs.is_empty())
            .ok_or_else(|| {
                command_error(BAD_VALUE, "BadValue", "Must specify at least one index to create")
            })?;

        let existing = self.collections.get(&namespace).cloned().unwrap_or_default();
        let before = existing.len();
        let mut pending: Vec<Value> = Vec::new();

        for spec in specs {
            let (name, requested) = index_identity(spec)?;
            let (key, _) = stored_key_pattern(requested);
            let key = &key;
            let stored = stored_index(spec);

            let same_name = existing
                .iter()
                .chain(pending.iter())
                .find(|doc| doc.get("name").and_then(Value::as_str) == Some(name));
            if let Some(doc) = same_name {
                let doc_key = doc.get("key").unwrap_or(&Value::Null);
                if !same_keys(doc_key, key) {
                    return Err(command_error(
                        codes::INDEX_KEY_SPECS_CONFLICT,
                        "IndexKeySpecsConflict",
                        format!(
                            "An existing index has the same name as the requested index. \
                             Requested index: {spec}, existing index: {doc}"
                        ),
                    ));
                }
                if !same_options(doc, &stored) {
                    return Err(command_error(
                        codes::INDEX_OPTIONS_CONFLICT,
                        "IndexOptionsConflict",
                        format!("Index with name: {name} already exists with different options"),
                    ));
                }
                continue;
            }

            let same_definition = existing.iter().chain(pending.iter()).find(|doc| {
                same_keys(doc.get("key").unwrap_or(&Value::Null), key)
                    && same_options(doc, &stored)
            });
            if let Some(doc) = same_definition {
                let other = doc.get("name").and_then(Value::as_str).unwrap_or_default();
                return Err(command_error(
                    codes::INDEX_OPTIONS_CONFLICT,
                    "IndexOptionsConflict",
                    format!("Index already exists with a different name: {other}"),
                ));
            }

            pending.push(stored);
        }

        let created_collection = !self.collections.contains_key(&namespace);
        let indexes = self.collections.entry(namespace).or_default();
        let mut reply = json!({
            "createdCollectionAutomatically": created_collection,
            "numIndexesBefore": before,
            "numIndexesAfter": before + pending.len(),
            "ok": 1
        });
        if pending.is_empty() {
            if let Some(map) = reply.as_object_mut() {
                map.insert("note".to_string(), json!("all indexes already exist"));
            }
        }
        indexes.extend(pending);
        Ok(reply)
    }

    fn drop_indexes(&mut self, database: &str, command: &Map<String, Value>) -> Result<Value> {
        let namespace = namespace_of(database, command, "dropIndexes")?;
        let indexes = self.collections.get_mut(&namespace).ok_or_else(|| {
            command_error(
                codes::NAMESPACE_NOT_FOUND,
                "NamespaceNotFound",
                format!("ns not found {namespace}"),
            )
        })?;
        let was = indexes.len();

        match command.get("index") {
            Some(Value::String(name)) if name == "*" => indexes.clear(),
            Some(Value::String(name)) => {
                let position = indexes
                    .iter()
                    .position(|doc| doc.get("name").and_then(Value::as_str) == Some(name.as_str()))
                    .ok_or_else(|| {
                        command_error(
                            codes::INDEX_NOT_FOUND,
                            "IndexNotFound",
                            format!("index not found with name [{name}]"),
                        )
                    })?;
                indexes.remove(position);
            }
            Some(key @ Value::Object(_)) => {
                let matches: Vec<usize> = indexes
                    .iter()
                    .enumerate()
                    .filter(|(_, doc)| same_keys(doc.get("key").unwrap_or(&Value::Null), key))
                    .map(|(i, _)| i)
                    .collect();
                match matches.as_slice() {
                    [] => {
                        return Err(command_error(
                            codes::INDEX_NOT_FOUND,
                            "IndexNotFound",
                            format!("can't find index with key: {key}"),
                        ))
                    }
                    [position] => {
                        indexes.remove(*position);
                    }
                    _ => {
                        return Err(command_error(
                            BAD_VALUE,
                            "AmbiguousIndexKeyPattern",
                            format!("{} indexes found for key: {key}", matches.len()),
                        ))
                    }
                }
            }
            _ => {
                return Err(command_error(
                    BAD_VALUE,
                    "BadValue",
                    "index must be a name or key pattern",
                ))
            }
        }

        Ok(json!({ "nIndexesWas": was, "ok": 1 }))
    }

    fn list_indexes(&mut self, database: &str, command: &Map<String, Value>) -> Result<Value> {
        let namespace = namespace_of(database, command, "listIndexes")?;
        let indexes = self.collections.get(&namespace).ok_or_else(|| {
            command_error(
                codes::NAMESPACE_NOT_FOUND,
                "NamespaceNotFound",
                format!("ns does not exist: {namespace}"),
            )
        })?;

        let batch_size = command
            .get("cursor")
            .and_then(|c| c.get("batchSize"))
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let mut remaining: VecDeque<Value> = indexes.iter().cloned().collect();
        let first_batch: Vec<Value> = drain_batch(&mut remaining, batch_size);
        let cursor_id = self.register_cursor(&namespace, remaining);

        Ok(json!({
            "cursor": { "id": cursor_id, "ns": namespace, "firstBatch": first_batch },
            "ok": 1
        }))
    }

    fn get_more(&mut self, command: &Map<String, Value>) -> Result<Value> {
        let cursor_id = command
            .get("getMore")
            .and_then(Value::as_i64)
            .ok_or_else(|| command_error(BAD_VALUE, "BadValue", "getMore requires a cursor id"))?;
        let batch_size = command
            .get("batchSize")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let cursor = self.cursors.get_mut(&cursor_id).ok_or_else(|| {
            command_error(
                CURSOR_NOT_FOUND,
                "CursorNotFound",
                format!("cursor id {cursor_id} not found"),
            )
        })?;
        let next_batch = drain_batch(&mut cursor.remaining, batch_size);
        let namespace = cursor.namespace.clone();
        let next_id = if cursor.remaining.is_empty() {
            self.cursors.remove(&cursor_id);
            0
        } else {
            cursor_id
        };

        Ok(json!({
            "cursor": { "id": next_id, "ns": namespace, "nextBatch": next_batch },
            "ok": 1
        }))
    }

    fn kill_cursors(&mut self, command: &Map<String, Value>) -> Result<Value> {
        let ids: Vec<i64> = command
            .get("cursors")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();

        let (killed, not_found): (Vec<i64>, Vec<i64>) = ids
            .into_iter()
            .partition(|id| self.cursors.remove(id).is_some());

        Ok(json!({ "cursorsKilled": killed, "cursorsNotFound": not_found, "ok": 1 }))
    }

    fn drop_collection(&mut self, database: &str, command: &Map<String, Value>) -> Result<Value> {
        let namespace = namespace_of(database, command, "drop")?;
        let indexes = self.collections.remove(&namespace).ok_or_else(|| {
            command_error(
                codes::NAMESPACE_NOT_FOUND,
                "NamespaceNotFound",
                "ns not found",
            )
        })?;
        self.cursors.retain(|_, cursor| cursor.namespace != namespace);
        Ok(json!({ "ns": namespace, "nIndexesWas": indexes.len(), "ok": 1 }))
    }

    fn register_cursor(&mut self, namespace: &str, remaining: VecDeque<Value>) -> i64 {
        if remaining.is_empty() {
            return 0;
        }
        let id = self.next_cursor_id;
        self.next_cursor_id += 1;
        self.cursors.insert(
            id,
            MockCursor {
                namespace: namespace.to_string(),
                remaining,
            },
        );
        id
    }
}

fn namespace_of(database: &str, command: &Map<String, Value>, field: &str) -> Result<String> {
    let collection = command
        .get(field)
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            command_error(
                BAD_VALUE,
                "InvalidNamespace",
                format!("{field} requires a collection name"),
            )
        })?;
    Ok(format!("{database}.{collection}"))
}

fn index_identity(spec: &Value) -> Result<(&str, &Value)> {
    let name = spec
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            command_error(
                codes::CANNOT_CREATE_INDEX,
                "CannotCreateIndex",
                "index specification must have a name",
            )
        })?;
    let key = spec
        .get("key")
        .filter(|k| k.as_object().is_some_and(|k| !k.is_empty()))
        .ok_or_else(|| {
            command_error(
                codes::CANNOT_CREATE_INDEX,
                "CannotCreateIndex",
                format!("index '{name}' must have a non-empty key pattern"),
            )
        })?;
    Ok((name, key))
}

/// The document as stored server-side: version first, then the spec
///
/// Text indexes get the server's stored key pattern and text defaults.
fn stored_index(spec: &Value) -> Value {
    let mut doc = Map::new();
    doc.insert("v".to_string(), json!(2));
    let Some(map) = spec.as_object() else {
        return Value::Object(doc);
    };
    for (field, value) in map {
        if field != "key" {
            doc.insert(field.clone(), value.clone());
            continue;
        }
        let (key, weights) = stored_key_pattern(value);
        doc.insert("key".to_string(), key);
        if let Some(weights) = weights {
            doc.insert("weights".to_string(), Value::Object(weights));
            doc.insert("default_language".to_string(), json!("english"));
            doc.insert("language_override".to_string(), json!("language"));
            doc.insert("textIndexVersion".to_string(), json!(3));
        }
    }
    Value::Object(doc)
}

/// Folds `"text"` fields into `_fts`/`_ftsx`, returning their weights
fn stored_key_pattern(key: &Value) -> (Value, Option<Map<String, Value>>) {
    let Some(fields) = key.as_object() else {
        return (key.clone(), None);
    };

    let mut pattern = Map::new();
    let mut weights = Map::new();
    for (field, direction) in fields {
        if direction.as_str() == Some("text") {
            if weights.is_empty() {
                pattern.insert("_fts".to_string(), json!("text"));
                pattern.insert("_ftsx".to_string(), json!(1));
            }
            weights.insert(field.clone(), json!(1));
        } else {
            pattern.insert(field.clone(), direction.clone());
        }
    }

    if weights.is_empty() {
        (Value::Object(pattern), None)
    } else {
        (Value::Object(pattern), Some(weights))
    }
}

/// Order-sensitive key pattern comparison
fn same_keys(a: &Value, b: &Value) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(a), Some(b)) => a.len() == b.len() && a.iter().eq(b.iter()),
        _ => false,
    }
}

/// Compares everything but identity and version fields
fn same_options(a: &Value, b: &Value) -> bool {
    let options = |doc: &Value| -> Map<String, Value> {
        doc.as_object()
            .map(|map| {
                map.iter()
                    .filter(|(field, _)| !matches!(field.as_str(), "v" | "key" | "name" | "ns"))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    };
    options(a) == options(b)
}

fn drain_batch(remaining: &mut VecDeque<Value>, batch_size: usize) -> Vec<Value> {
    let take = batch_size.max(1).min(remaining.len());
    remaining.drain(..take).collect()
}

#[async_trait]
impl CommandExecutor for MockDeployment {
    async fn execute(
        &self,
        database: &str,
        command: Value,
        target: &CommandTarget,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        if let Some(latency) = self.latency {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }

        let map = command
            .as_object()
            .ok_or_else(|| Error::invalid_argument("Command must be a document"))?;
        let name = map
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| Error::invalid_argument("Command must not be empty"))?;

        let mut data = self.data.lock().unwrap();
        let node = data.select(target)?;
        let address = data.nodes[node].address.clone();
        let pinned = data.active_pins.get(&address).copied().unwrap_or(0) > 0;
        data.log.push(CommandRecord {
            address,
            database: database.to_string(),
            command_name: name.clone(),
            command: command.clone(),
            pinned,
        });

        if let Some(failure) = data
            .pending_failures
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure.into());
        }

        data.dispatch(node, database, &name, map)
    }

    async fn acquire_pin(&self, instance: &ServerInstanceHandle) -> Result<PinLease> {
        let mut data = self.data.lock().unwrap();
        let node = data
            .nodes
            .iter()
            .find(|n| &n.address == instance)
            .ok_or_else(|| {
                Error::unreachable(format!("{instance} is not a member of the deployment"))
            })?;
        if !node.reachable {
            return Err(Error::unreachable(format!("{instance} is unreachable")));
        }

        *data.active_pins.entry(instance.clone()).or_default() += 1;

        let shared = Arc::clone(&self.data);
        let instance = instance.clone();
        Ok(PinLease::on_release(move || {
            if let Ok(mut data) = shared.lock() {
                if let Some(count) = data.active_pins.get_mut(&instance) {
                    *count = count.saturating_sub(1);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn test_from_uri_builds_replica_set() {
        let mock =
            MockDeployment::from_uri("mongodb://user:pw@a:27017,b:27018,c:27019/db?replicaSet=rs0");
        assert_eq!(mock.primary(), Some(ServerInstanceHandle::new("a", 27017)));
        assert_eq!(mock.secondaries().len(), 2);
    }

    #[test]
    fn test_from_uri_without_set_is_standalone() {
        let mock = MockDeployment::from_uri("mongodb://localhost:27017");
        assert_eq!(mock.primary(), None);
        assert!(mock.secondaries().is_empty());
    }

    #[tokio::test]
    async fn test_instance_target_must_satisfy_read_preference() {
        let mock = MockDeployment::replica_set("rs0", &["a:1", "b:2"]);
        let target = CommandTarget::Instance {
            instance: ServerInstanceHandle::new("a", 1),
            read_preference: ReadPreference::Secondary,
        };
        let result = mock
            .execute("admin", json!({ "ping": 1 }), &target, &cancel())
            .await;
        assert!(matches!(result, Err(Error::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_writes_rejected_on_secondary() {
        let mock = MockDeployment::replica_set("rs0", &["a:1", "b:2"]);
        let target = CommandTarget::ReadPreference(ReadPreference::Secondary);
        let result = mock
            .execute(
                "db",
                json!({ "createIndexes": "c", "indexes": [{ "key": { "a": 1 }, "name": "a_1" }] }),
                &target,
                &cancel(),
            )
            .await;
        assert_eq!(result.err().and_then(|e| e.command_code()), Some(10107));
    }

    #[tokio::test]
    async fn test_same_keys_with_different_options_coexist() {
        let mock = MockDeployment::standalone("localhost:27017");
        let create = |name: &str, filter: Value| {
            json!({
                "createIndexes": "c",
                "indexes": [{ "key": { "a": 1 }, "name": name, "partialFilterExpression": filter }]
            })
        };
        let primary = CommandTarget::Primary;
        mock.execute("db", create("a_active", json!({ "active": true })), &primary, &cancel())
            .await
            .expect("first index");
        mock.execute("db", create("a_archived", json!({ "archived": true })), &primary, &cancel())
            .await
            .expect("second index");

        assert_eq!(mock.index_names("db.c"), vec!["a_active", "a_archived"]);
    }

    #[tokio::test]
    async fn test_pin_lease_tracks_active_pins() {
        let mock = MockDeployment::replica_set("rs0", &["a:1", "b:2"]);
        let secondary = ServerInstanceHandle::new("b", 2);
        let lease = mock.acquire_pin(&secondary).await.expect("pin");
        assert_eq!(mock.active_pins(), 1);
        drop(lease);
        assert_eq!(mock.active_pins(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let mock = MockDeployment::standalone("localhost:27017");
        mock.fail_next("ping", MockFailure::Transport("connection reset".to_string()));

        let first = mock
            .execute("admin", json!({ "ping": 1 }), &CommandTarget::Primary, &cancel())
            .await;
        assert!(matches!(first, Err(Error::Transport(_))));

        let second = mock
            .execute("admin", json!({ "ping": 1 }), &CommandTarget::Primary, &cancel())
            .await;
        assert!(second.is_ok());
    }
}
