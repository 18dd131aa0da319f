//! Tool registry.
//!
//! Turns the operation catalog a backend publishes ([`SchemaSource`]) into
//! the list of [`Tool`]s advertised to clients, and maps tool names back to
//! the backend's internal ids.
//!
//! Derivation runs under a writer lock and publishes a new immutable
//! [`ToolSnapshot`] when it finishes; readers keep whichever snapshot they
//! loaded, so a `tools/call` never observes a half-built catalog.
//!
//! # Examples
//!
//! ```rust
//! use mcp_core::registry::{OperationDef, OperationGroup, SchemaSource, ToolFilter, ToolRegistry};
//!
//! let source = SchemaSource::from_groups(vec![OperationGroup::new(
//!     "read",
//!     vec![OperationDef::new("Drive.list"), OperationDef::new("drive/list")],
//! )]);
//!
//! let registry = ToolRegistry::new();
//! let tools = registry.derive_tools(&source, &ToolFilter::default());
//! let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
//! assert_eq!(names, vec!["drive-list", "drive-list-1"]);
//! assert_eq!(registry.resolve("drive-list-1").unwrap().internal_id, "drive/list");
//! ```

mod filter;
mod naming;
mod schema;

pub use filter::{FilterPattern, ToolFilter};
pub use naming::slugify;
pub use schema::{dereference, empty_object_schema, normalize_object_schema, ref_key};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::messages::Tool;
use naming::NameCache;

/// Operation catalog published by a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSource {
    /// Operations grouped the way the backend declares them
    #[serde(default)]
    pub groups: Vec<OperationGroup>,

    /// Shared schema definitions that `$ref`s point into
    #[serde(default)]
    pub definitions: Map<String, Value>,
}

impl SchemaSource {
    /// A source without shared definitions.
    pub fn from_groups(groups: Vec<OperationGroup>) -> Self {
        Self {
            groups,
            definitions: Map::new(),
        }
    }

    /// Every operation, in group order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationDef> {
        self.groups.iter().flat_map(|group| group.operations.iter())
    }
}

/// A named group of operations, e.g. "read" or "write".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationGroup {
    /// Group label
    pub name: String,

    /// Operations in declaration order
    #[serde(default)]
    pub operations: Vec<OperationDef>,
}

impl OperationGroup {
    /// Create a group.
    pub fn new(name: impl Into<String>, operations: Vec<OperationDef>) -> Self {
        Self {
            name: name.into(),
            operations,
        }
    }
}

/// One operation as the backend describes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDef {
    /// Backend key used to invoke the operation
    #[serde(default, alias = "id")]
    pub internal_id: String,

    /// Explicit tool name, used verbatim when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Display title; slugified into the name when no explicit name exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// What the operation does
    #[serde(default)]
    pub description: String,

    /// Parameter schema, possibly holding `$ref`s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    /// Result schema, possibly holding `$ref`s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// Internal operations are never exposed
    #[serde(default)]
    pub internal: bool,

    /// Set on placeholder entries that only point elsewhere
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Namespace of the owning application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_namespace: Option<String>,
}

impl OperationDef {
    /// An operation with only an internal id.
    pub fn new(internal_id: impl Into<String>) -> Self {
        Self {
            internal_id: internal_id.into(),
            ..Default::default()
        }
    }

    /// Placeholders carry a `$ref` or no id and cannot be invoked.
    pub fn is_placeholder(&self) -> bool {
        self.reference.is_some() || self.internal_id.is_empty()
    }

    fn candidate_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let slug = slugify(self.title.as_deref().unwrap_or(&self.internal_id));
        if slug.is_empty() {
            slugify(&self.internal_id)
        } else {
            slug
        }
    }
}

/// Immutable result of one derivation.
#[derive(Debug)]
pub struct ToolSnapshot {
    tools: Vec<Tool>,
    by_name: HashMap<String, usize>,
    derived_at: DateTime<Utc>,
}

impl ToolSnapshot {
    fn new(tools: Vec<Tool>) -> Self {
        let by_name = tools
            .iter()
            .enumerate()
            .map(|(index, tool)| (tool.name.clone(), index))
            .collect();
        Self {
            tools,
            by_name,
            derived_at: Utc::now(),
        }
    }

    /// Tools in derivation order.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Tool by advertised name.
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.by_name.get(name).map(|&index| &self.tools[index])
    }

    /// When this snapshot was published.
    pub fn derived_at(&self) -> DateTime<Utc> {
        self.derived_at
    }

    /// Number of tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the snapshot holds no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Catalog state owned by one server.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    names: Mutex<NameCache>,
    snapshot: RwLock<Option<Arc<ToolSnapshot>>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the tool list from `source`, publish it as the current
    /// snapshot and return it.
    ///
    /// Names given to an internal id stay stable across calls.
    pub fn derive_tools(&self, source: &SchemaSource, filter: &ToolFilter) -> Vec<Tool> {
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());

        let mut tools = Vec::new();
        let mut skipped = 0usize;
        for operation in source.operations() {
            if operation.is_placeholder() || operation.internal {
                skipped += 1;
                continue;
            }

            let input_schema = operation
                .input_schema
                .as_ref()
                .map(|schema| dereference(schema, &source.definitions));
            let output_schema = operation
                .output_schema
                .as_ref()
                .map(|schema| dereference(schema, &source.definitions));

            let name = names.assign(&operation.internal_id, &operation.candidate_name());
            tools.push(Tool {
                name,
                title: operation.title.clone(),
                description: operation.description.clone(),
                input_schema: normalize_object_schema(input_schema.unwrap_or(Value::Null)),
                output_schema: output_schema.map(normalize_object_schema),
                app_namespace: operation.app_namespace.clone(),
                internal_id: operation.internal_id.clone(),
            });
        }

        let before = tools.len();
        tools.retain(|tool| filter.allows(&tool.name));
        tracing::debug!(
            derived = before,
            exposed = tools.len(),
            skipped,
            "tool catalog derived"
        );

        let snapshot = Arc::new(ToolSnapshot::new(tools));
        if let Ok(mut current) = self.snapshot.write() {
            *current = Some(snapshot.clone());
        }
        snapshot.tools().to_vec()
    }

    /// The last published snapshot, if any derivation has run.
    pub fn snapshot(&self) -> Option<Arc<ToolSnapshot>> {
        self.snapshot.read().ok().and_then(|current| current.clone())
    }

    /// Map an advertised name back to its tool in the last snapshot.
    pub fn resolve(&self, name: &str) -> Option<Tool> {
        self.snapshot()
            .and_then(|snapshot| snapshot.get(name).cloned())
    }
}
