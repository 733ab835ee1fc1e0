//! Chat provider abstraction shared by the agent runtime.

use async_trait::async_trait;
use proto::{LlmError, ToolCall, ToolDefinition};
use serde_json::Value;

/// Represents a message in a chat history
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Semantic role of this message.
    pub role: proto::Role,
    /// Human-readable text content.
    pub content: String,
    /// Tool call id when this is a tool result.
    pub tool_call_id: Option<String>,
    /// Tool name when this is a tool result.
    pub tool_name: Option<String>,
    /// Tool calls requested by assistant messages.
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    fn with_role(role: proto::Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
            tool_calls: None,
        }
    }

    /// Creates a system-role message with the given content.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(proto::Role::System, content)
    }

    /// Creates a user-role message with the given content.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(proto::Role::User, content)
    }

    /// Creates an assistant-role message with the given content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(proto::Role::Assistant, content)
    }

    /// Creates an assistant message that only requests tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(proto::Role::Assistant, "")
        }
    }

    /// Creates a tool-result message linking a call id, tool name, and output content.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::with_role(proto::Role::Tool, content)
        }
    }
}

/// Request to the LLM
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Full chat history including system/user/assistant/tool messages.
    pub messages: Vec<ChatMessage>,
    /// Available tools schema.
    pub tools: Vec<ToolDefinition>,
    /// Target model id.
    pub model: String,
}

/// Token usage reported by the LLM for a single call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Number of tokens in the prompt / input.
    pub prompt_tokens: u32,
    /// Number of tokens in the generated output.
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Accumulates another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Response from the LLM
#[derive(Debug)]
pub enum ChatResponse {
    /// Final assistant text response.
    Text(String, TokenUsage),
    /// Assistant requested one or more tool calls.
    ToolCalls(Vec<ToolCall>, TokenUsage),
}

/// LLM provider trait
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends a chat request to the provider and returns either text or tool calls.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Parses tool call argument text.
///
/// Blank text means no arguments. Text that is not valid JSON is kept as a
/// string so the invocation adapter can report the decoding failure.
pub fn parse_tool_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}
