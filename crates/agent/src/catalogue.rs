//! Versioned snapshot of discovered tools.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use proto::{DiscoveryError, RawTool, ToolDefinition};
use serde::Deserialize;
use serde_json::{Value, json};
use tools::ToolProvider;
use tracing::{debug, info, warn};

use crate::adapter::{InvocationAdapter, invocation_error};
use crate::schema::{ParameterMap, normalize_schema};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// What to do when a listing contains the same tool name twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Fail discovery.
    #[default]
    Reject,
    /// Keep the entry listed last.
    LastWins,
}

/// Knobs applied while building a catalogue
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryOptions {
    pub collisions: CollisionPolicy,
    /// Build adapters that enforce required parameters and fill defaults.
    pub strict_arguments: bool,
}

/// Immutable description of one discovered tool
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: ParameterMap,
    /// Schema as listed by the server, forwarded to the chat provider.
    pub input_schema: Value,
}

#[derive(Debug)]
struct CatalogueEntry {
    descriptor: ToolDescriptor,
    adapter: InvocationAdapter,
}

/// All tools from one discovery pass, with their adapters
///
/// A catalogue is never mutated; re-discovery produces a new one.
#[derive(Debug)]
pub struct Catalogue {
    version: u64,
    discovered_at: DateTime<Utc>,
    entries: BTreeMap<String, CatalogueEntry>,
}

impl Catalogue {
    /// Lists tools once and builds a descriptor and adapter for each.
    ///
    /// A failed listing fails the whole pass; no partial catalogue exists.
    pub async fn discover(
        provider: &Arc<dyn ToolProvider>,
        options: DiscoveryOptions,
    ) -> Result<Self, DiscoveryError> {
        let tools = provider
            .list_tools()
            .await
            .map_err(DiscoveryError::ListFailed)?;
        Self::from_listing(tools, provider, options)
    }

    /// Builds a catalogue from an already-fetched listing.
    pub fn from_listing(
        tools: Vec<RawTool>,
        provider: &Arc<dyn ToolProvider>,
        options: DiscoveryOptions,
    ) -> Result<Self, DiscoveryError> {
        let mut entries = BTreeMap::new();

        for tool in tools {
            let parameters = normalize_schema(&tool.input_schema);
            debug!(
                tool = %tool.name,
                parameters = parameters.len(),
                "Normalized tool schema"
            );

            let mut adapter = InvocationAdapter::new(&tool.name, provider);
            if options.strict_arguments {
                adapter = adapter.strict(parameters.clone());
            }
            let entry = CatalogueEntry {
                descriptor: ToolDescriptor {
                    name: tool.name.clone(),
                    description: tool.description.unwrap_or_default(),
                    parameters,
                    input_schema: tool.input_schema,
                },
                adapter,
            };

            match entries.entry(tool.name) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                Entry::Occupied(mut slot) => match options.collisions {
                    CollisionPolicy::Reject => {
                        return Err(DiscoveryError::DuplicateTool(slot.key().clone()));
                    }
                    CollisionPolicy::LastWins => {
                        warn!(tool = %slot.key(), "Duplicate tool name; keeping the last listing");
                        slot.insert(entry);
                    }
                },
            }
        }

        let catalogue = Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            discovered_at: Utc::now(),
            entries,
        };
        info!(
            version = catalogue.version,
            tools = catalogue.len(),
            "Tool catalogue built"
        );
        Ok(catalogue)
    }

    /// A catalogue with no tools.
    pub fn empty() -> Self {
        Self {
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            discovered_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Process-unique, increasing snapshot number.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    pub fn adapter(&self, name: &str) -> Option<&InvocationAdapter> {
        self.entries.get(name).map(|e| &e.adapter)
    }

    /// Tool names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    /// Tool advertisements for the chat provider.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors()
            .map(|d| ToolDefinition {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: function_parameters(&d.input_schema),
            })
            .collect()
    }

    /// `{tool -> {parameter -> descriptor}}` as used by the binding rules.
    pub fn parameter_table(&self) -> BTreeMap<&str, &ParameterMap> {
        self.entries
            .iter()
            .map(|(name, e)| (name.as_str(), &e.descriptor.parameters))
            .collect()
    }

    /// Pretty-printed [`parameter_table`](Self::parameter_table).
    pub fn parameter_table_json(&self) -> String {
        serde_json::to_string_pretty(&self.parameter_table()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Invokes a tool by name. Unknown names come back as error text.
    pub async fn invoke(&self, name: &str, arguments: Value) -> String {
        match self.adapter(name) {
            Some(adapter) => adapter.invoke(arguments).await,
            None => {
                warn!(tool = %name, "Model requested an unknown tool");
                invocation_error(name, proto::ToolError::NotFound(name.to_string()))
            }
        }
    }
}

// Function-calling APIs want an object schema even for parameterless tools.
fn function_parameters(schema: &Value) -> Value {
    match schema {
        Value::Object(map) if !map.is_empty() => {
            let mut map = map.clone();
            map.entry("type").or_insert_with(|| json!("object"));
            Value::Object(map)
        }
        _ => json!({"type": "object", "properties": {}}),
    }
}
