#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
//! Shared DTOs for the TeamCity REST API.
//!
//! TeamCity answers collection requests with an envelope of the form
//! `{"count": N, "<item>": [...]}` and omits the item array entirely when the
//! collection is empty. Items stay untyped (`Record`) because the set of
//! fields depends on the `fields=` parameter of the request; the renderer
//! picks columns by name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single REST item as returned by the server.
pub type Record = Map<String, Value>;

/// Errors raised while decoding REST payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The payload was not a JSON object.
    #[error("expected a JSON object for {context}")]
    NotAnObject {
        /// What was being decoded.
        context: String,
    },
    /// The item field was present but not an array.
    #[error("field '{key}' is not an array")]
    NotAnArray {
        /// Envelope key holding the items.
        key: String,
    },
    /// An array element was not a JSON object.
    #[error("element {index} of '{key}' is not an object")]
    ItemNotAnObject {
        /// Envelope key holding the items.
        key: String,
        /// Zero-based position of the offending element.
        index: usize,
    },
}

/// Kinds of resources the CLI queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Finished or running builds.
    Build,
    /// Builds waiting in the queue.
    QueuedBuild,
    /// Build configurations.
    BuildType,
    /// VCS changes.
    Change,
    /// Projects.
    Project,
    /// Server-level information.
    Server,
    /// Users.
    User,
    /// Build agents.
    Agent,
    /// Server plugins.
    Plugin,
    /// Name/value parameters attached to a build.
    Property,
}

impl ResourceKind {
    /// Path of the collection relative to the REST root.
    #[must_use]
    pub const fn collection_path(self) -> &'static str {
        match self {
            Self::Build => "builds",
            Self::QueuedBuild => "buildQueue",
            Self::BuildType => "buildTypes",
            Self::Change => "changes",
            Self::Project => "projects",
            Self::Server => "server",
            Self::User => "users",
            Self::Agent => "agents",
            Self::Plugin => "server/plugins",
            Self::Property => "properties",
        }
    }

    /// Envelope key under which items of this kind are listed.
    #[must_use]
    pub const fn item_key(self) -> &'static str {
        match self {
            Self::Build | Self::QueuedBuild => "build",
            Self::BuildType => "buildType",
            Self::Change => "change",
            Self::Project => "project",
            Self::Server => "server",
            Self::User => "user",
            Self::Agent => "agent",
            Self::Plugin => "plugin",
            Self::Property => "property",
        }
    }

    /// Locator dimension used to address a single item by identifier.
    #[must_use]
    pub const fn id_dimension(self) -> &'static str {
        match self {
            Self::User => "username",
            _ => "id",
        }
    }

    /// Path segment addressing one item below its collection, e.g. `id:42`.
    ///
    /// The identifier is not escaped; it must be appended as a single path
    /// segment so characters such as `#` or `/` stay part of the id.
    #[must_use]
    pub fn item_locator(self, id: &str) -> String {
        format!("{}:{}", self.id_dimension(), id.trim())
    }
}

/// Ordered page of records decoded from a collection envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    records: Vec<Record>,
    #[serde(skip)]
    reported_count: Option<u64>,
}

impl ResultSet {
    /// Build a result set from already decoded records.
    #[must_use]
    pub const fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            reported_count: None,
        }
    }

    /// Decode a TeamCity collection envelope.
    ///
    /// A missing item array is an empty page.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload or any item is not a JSON object, or
    /// when the item field is not an array.
    pub fn from_envelope(value: Value, item_key: &str) -> Result<Self, ModelError> {
        let Value::Object(mut envelope) = value else {
            return Err(ModelError::NotAnObject {
                context: format!("'{item_key}' collection"),
            });
        };
        let reported_count = envelope.get("count").and_then(Value::as_u64);
        let records = match envelope.remove(item_key) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Value::Object(record) => Ok(record),
                    _ => Err(ModelError::ItemNotAnObject {
                        key: item_key.to_string(),
                        index,
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(ModelError::NotAnArray {
                    key: item_key.to_string(),
                });
            }
        };
        Ok(Self {
            records,
            reported_count,
        })
    }

    /// Number of records in this page.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// `count` as reported by the server, when the envelope carried one.
    #[must_use]
    pub const fn reported_count(&self) -> Option<u64> {
        self.reported_count
    }

    /// Records in server order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Mutable access for deriving extra columns.
    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    /// Keep only records matching the predicate.
    pub fn retain(&mut self, predicate: impl FnMut(&Record) -> bool) {
        self.records.retain(predicate);
    }

    /// Consume the set, yielding its records.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Decode a single item response.
///
/// # Errors
///
/// Returns an error when the payload is not a JSON object.
pub fn record_from_value(value: Value, context: &str) -> Result<Record, ModelError> {
    match value {
        Value::Object(record) => Ok(record),
        _ => Err(ModelError::NotAnObject {
            context: context.to_string(),
        }),
    }
}

/// Resolve a dotted path (`triggered.user.username`) inside a record.
#[must_use]
pub fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let first = segments.next()?;
    segments.try_fold(record.get(first)?, |current, segment| current.get(segment))
}

/// Copy the value at `path` into a top-level `column`, or `fallback` when the
/// path does not resolve to a non-null value.
pub fn derive_column(record: &mut Record, column: &str, path: &str, fallback: Option<&str>) {
    let value = lookup(record, path).filter(|value| !value.is_null()).cloned();
    match (value, fallback) {
        (Some(value), _) => {
            record.insert(column.to_string(), value);
        }
        (None, Some(fallback)) => {
            record.insert(column.to_string(), Value::String(fallback.to_string()));
        }
        (None, None) => {}
    }
}

/// Payload for `POST buildQueue`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBuildRequest {
    /// Build configuration to queue.
    pub build_type: IdRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Logical branch name; server default branch when absent.
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Free-form comment attached to the build.
    pub comment: Option<Comment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Custom build parameters.
    pub properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Agent the build must run on.
    pub agent: Option<IdRef>,
}

impl TriggerBuildRequest {
    /// Start a request for the given build configuration.
    #[must_use]
    pub fn new(build_type_id: impl Into<String>) -> Self {
        Self {
            build_type: IdRef {
                id: build_type_id.into(),
            },
            branch_name: None,
            comment: None,
            properties: None,
            agent: None,
        }
    }

    /// Attach custom parameters; an empty list leaves the field unset.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<(String, String)>) -> Self {
        if parameters.is_empty() {
            self.properties = None;
        } else {
            self.properties = Some(Properties {
                property: parameters
                    .into_iter()
                    .map(|(name, value)| Property { name, value })
                    .collect(),
            });
        }
        self
    }
}

/// Reference to an entity by identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRef {
    /// Entity identifier.
    pub id: String,
}

/// Build comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    /// Comment body.
    pub text: String,
}

/// Parameter list wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Properties {
    /// Individual parameters.
    pub property: Vec<Property>,
}

/// Single name/value parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Property {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

/// Aggregate agent counters derived from an unfiltered agent listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentStatistics {
    /// All agents known to the server.
    pub total: usize,
    /// Agents currently connected.
    pub connected: usize,
    /// Agents not connected.
    pub disconnected: usize,
    /// Agents enabled for builds.
    pub enabled: usize,
    /// Agents authorized by an administrator.
    pub authorized: usize,
    /// Connected agents running a build.
    pub busy: usize,
    /// Connected, enabled, authorized agents with no running build.
    pub idle: usize,
}

impl AgentStatistics {
    /// Tally counters from agent records carrying `connected`, `enabled`,
    /// `authorized` and an optional `build` field.
    #[must_use]
    pub fn from_agents(agents: &ResultSet) -> Self {
        let flag = |record: &Record, key: &str| {
            record.get(key).and_then(Value::as_bool).unwrap_or(false)
        };
        agents
            .records()
            .iter()
            .fold(Self::default(), |mut stats, agent| {
                let connected = flag(agent, "connected");
                let enabled = flag(agent, "enabled");
                let authorized = flag(agent, "authorized");
                let running = agent.get("build").is_some_and(|build| !build.is_null());
                stats.total += 1;
                if connected {
                    stats.connected += 1;
                } else {
                    stats.disconnected += 1;
                }
                if enabled {
                    stats.enabled += 1;
                }
                if authorized {
                    stats.authorized += 1;
                }
                if connected && running {
                    stats.busy += 1;
                } else if connected && enabled && authorized {
                    stats.idle += 1;
                }
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        record_from_value(value, "test").expect("object")
    }

    #[test]
    fn item_locator_uses_username_for_users() {
        assert_eq!(ResourceKind::User.item_locator("jdoe"), "username:jdoe");
        assert_eq!(ResourceKind::Build.item_locator(" 42 "), "id:42");
        assert_eq!(ResourceKind::QueuedBuild.item_locator("a#b"), "id:a#b");
    }

    #[test]
    fn lookup_walks_nested_objects() {
        let build = record(json!({
            "id": 1,
            "triggered": {"type": "user", "user": {"username": "jdoe"}}
        }));
        assert_eq!(
            lookup(&build, "triggered.user.username"),
            Some(&json!("jdoe"))
        );
        assert_eq!(lookup(&build, "triggered.vcs.name"), None);
        assert_eq!(lookup(&build, "id"), Some(&json!(1)));
    }

    #[test]
    fn lookup_prefers_literal_dotted_keys() {
        let item = record(json!({"a.b": "flat", "a": {"b": "nested"}}));
        assert_eq!(lookup(&item, "a.b"), Some(&json!("flat")));
    }

    #[test]
    fn derive_column_applies_fallback() {
        let mut build = record(json!({"triggered": {"type": "schedule"}}));
        derive_column(&mut build, "user", "triggered.user.username", Some("N/A"));
        assert_eq!(build.get("user"), Some(&json!("N/A")));

        let mut agent = record(json!({"pool": {"name": "Default"}}));
        derive_column(&mut agent, "pool", "pool.name", None);
        assert_eq!(agent.get("pool"), Some(&json!("Default")));

        let mut idle = record(json!({"build": null}));
        derive_column(&mut idle, "build_type", "build.buildTypeId", None);
        assert!(!idle.contains_key("build_type"));
    }

    #[test]
    fn trigger_request_omits_empty_fields() {
        let request = TriggerBuildRequest::new("Proj_Build").with_parameters(Vec::new());
        let encoded = serde_json::to_value(&request).expect("serialize");
        assert_eq!(encoded, json!({"buildType": {"id": "Proj_Build"}}));
    }

    #[test]
    fn agent_statistics_tally_states() {
        let agents = ResultSet::new(vec![
            record(json!({"connected": true, "enabled": true, "authorized": true})),
            record(json!({"connected": true, "enabled": true, "authorized": true, "build": {"id": 5}})),
            record(json!({"connected": false, "enabled": true, "authorized": true})),
            record(json!({"connected": true, "enabled": false, "authorized": false})),
        ]);
        let stats = AgentStatistics::from_agents(&agents);
        assert_eq!(
            stats,
            AgentStatistics {
                total: 4,
                connected: 3,
                disconnected: 1,
                enabled: 3,
                authorized: 3,
                busy: 1,
                idle: 1,
            }
        );
    }
}
