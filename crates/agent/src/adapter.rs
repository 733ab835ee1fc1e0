//! Per-tool invocation adapter.

use std::sync::{Arc, Weak};

use proto::CallToolResult;
use serde_json::{Map, Value};
use tools::ToolProvider;
use tracing::{debug, info, warn};

use crate::schema::{ParameterMap, apply_defaults, missing_required};

/// Wraps one remote tool as a callable that always answers with text.
///
/// The adapter holds only a weak reference to the shared connection; once the
/// owner drops it, invocations report a closed connection instead of keeping
/// the server alive.
#[derive(Clone)]
pub struct InvocationAdapter {
    tool_name: String,
    provider: Weak<dyn ToolProvider>,
    parameters: ParameterMap,
    strict: bool,
}

impl std::fmt::Debug for InvocationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationAdapter")
            .field("tool_name", &self.tool_name)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl InvocationAdapter {
    /// Binds an adapter to `tool_name` on the shared provider.
    pub fn new(tool_name: impl Into<String>, provider: &Arc<dyn ToolProvider>) -> Self {
        Self {
            tool_name: tool_name.into(),
            provider: Arc::downgrade(provider),
            parameters: ParameterMap::new(),
            strict: false,
        }
    }

    /// Enforces required parameters and fills defaults before calling out.
    pub fn strict(mut self, parameters: ParameterMap) -> Self {
        self.parameters = parameters;
        self.strict = true;
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Runs the tool once and returns its text, or an error description.
    ///
    /// Never fails: transport faults, remote errors and malformed argument
    /// payloads all come back as `Error invoking tool <name>: <message>`.
    pub async fn invoke(&self, raw_arguments: Value) -> String {
        let mut arguments = match coerce_arguments(raw_arguments) {
            Ok(arguments) => arguments,
            Err(message) => return self.failure(message),
        };

        if self.strict {
            let missing = missing_required(&self.parameters, &arguments);
            if !missing.is_empty() {
                return self.failure(format!(
                    "missing required parameter(s): {}",
                    missing.join(", ")
                ));
            }
            let filled = apply_defaults(&self.parameters, &mut arguments);
            if !filled.is_empty() {
                debug!(tool = %self.tool_name, ?filled, "Applied parameter defaults");
            }
        }

        let Some(provider) = self.provider.upgrade() else {
            return self.failure("tool server connection has been released");
        };

        let rendered = Value::Object(arguments.clone());
        info!(tool = %self.tool_name, args = %rendered, "Invoking tool");

        match provider.call_tool(&self.tool_name, arguments).await {
            Ok(result) => flatten_content(&self.tool_name, &result),
            Err(e) => {
                warn!(tool = %self.tool_name, "Tool invocation failed: {e}");
                self.failure(e)
            }
        }
    }

    fn failure(&self, message: impl std::fmt::Display) -> String {
        invocation_error(&self.tool_name, message)
    }
}

/// Text reported to the model when a call fails.
pub fn invocation_error(tool_name: &str, message: impl std::fmt::Display) -> String {
    format!("Error invoking tool {tool_name}: {message}")
}

/// Reduces a call result to the text handed back to the model.
///
/// Text blocks are joined with newlines in their original order; other block
/// kinds are ignored. Without any text block a fixed notice is returned.
pub fn flatten_content(tool_name: &str, result: &CallToolResult) -> String {
    result
        .joined_text()
        .unwrap_or_else(|| format!("Tool '{tool_name}' executed but returned no content."))
}

/// Turns model-supplied arguments into an arguments object.
///
/// `null` and blank strings mean "no arguments". A string is parsed as JSON
/// text since some providers pass arguments through undecoded.
fn coerce_arguments(raw: Value) -> Result<Map<String, Value>, String> {
    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!(
                "arguments must be a JSON object, got {}",
                kind_of(&other)
            )),
            Err(e) => Err(format!("invalid arguments payload: {e}")),
        },
        other => Err(format!(
            "arguments must be a JSON object, got {}",
            kind_of(&other)
        )),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
