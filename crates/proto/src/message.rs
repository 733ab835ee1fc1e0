use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Caller-visible identifier of a conversation thread
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Creates a new random thread identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the raw thread identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message authored by an end user.
    User,
    /// Message authored by the assistant/agent.
    Assistant,
    /// System-level instruction message.
    System,
    /// Tool execution result message.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(crate::error::ProtoError::InvalidRole(other.to_string())),
        }
    }
}

/// One tool call made while answering a turn, with the text it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Provider-assigned call id.
    pub call_id: String,
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Arguments exactly as the model supplied them.
    pub arguments: Value,
    /// Flattened adapter output.
    pub output: String,
}

/// A completed prompt/response exchange on a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn id.
    pub id: String,
    /// User prompt text.
    pub prompt: String,
    /// Final assistant text.
    pub response: String,
    /// Tool calls made while producing the response, in call order.
    pub tool_calls: Vec<ToolInvocation>,
    /// When the prompt was accepted.
    pub started_at: DateTime<Utc>,
    /// When the response was produced.
    pub finished_at: DateTime<Utc>,
}

impl Turn {
    /// Creates a turn that started at `started_at` and finishes now.
    pub fn new(
        prompt: impl Into<String>,
        response: impl Into<String>,
        tool_calls: Vec<ToolInvocation>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            response: response.into(),
            tool_calls,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
