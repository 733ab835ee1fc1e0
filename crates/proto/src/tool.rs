use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back with the result.
    pub id: String,
    /// Tool name as advertised in the catalogue.
    pub name: String,
    /// Loosely-typed arguments. Usually an object; a string when the
    /// provider's raw argument text was not valid JSON.
    pub arguments: Value,
}

/// Tool advertisement handed to a chat provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// One entry of a remote tool listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Parameter schema exactly as the server declared it.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl RawTool {
    /// Builds a listing entry, mostly for tests and in-process providers.
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// A single part of a tool call result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(default)]
        data: String,
        #[serde(default, rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        #[serde(default)]
        data: String,
        #[serde(default, rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        #[serde(default)]
        resource: Value,
    },
    ResourceLink {
        #[serde(default)]
        uri: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Any block kind this client does not model.
    #[serde(other)]
    Other,
}

impl ContentBlock {
    /// Shorthand for a text block.
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Returns the text payload of a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Result of a remote tool call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Successful result made of the given blocks.
    pub fn success(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Text blocks in order, joined with newlines. `None` when there are none.
    pub fn joined_text(&self) -> Option<String> {
        let parts: Vec<&str> = self.content.iter().filter_map(ContentBlock::as_text).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}
