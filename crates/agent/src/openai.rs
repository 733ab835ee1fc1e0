//! OpenAI-compatible Chat Completions provider.
//!
//! Works against any endpoint that speaks the `/chat/completions` dialect,
//! including Gemini's OpenAI compatibility layer.

use async_trait::async_trait;
use proto::{LlmError, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, TokenUsage, parse_tool_arguments};

// ── Request types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

fn function_kind() -> String {
    "function".to_string()
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ── Provider ───────────────────────────────────────────────────────────────────

/// Chat Completions provider over plain HTTP.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: Option<u32>,
}

impl OpenAiCompatProvider {
    /// Creates a provider for `base_url` (the part before `/chat/completions`).
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            max_tokens: None,
        }
    }

    /// Caps completion length on every request.
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = CompletionRequest {
            model: &req.model,
            messages: req.messages.iter().map(convert_message).collect(),
            tools: req.tools.iter().map(convert_tool).collect(),
            max_tokens: self.max_tokens,
        };

        let url = self.endpoint();
        debug!(
            model = %req.model,
            messages = %body.messages.len(),
            tools = %body.tools.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(status = %status.as_u16(), "Chat completion response received");

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: CompletionResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::InvalidResponse(format!(
                "Deserialization error: {e}; body: {}",
                text.chars().take(200).collect::<String>()
            ))
        })?;

        into_chat_response(parsed)
    }
}

// ── Conversion helpers ─────────────────────────────────────────────────────────

fn convert_message(msg: &ChatMessage) -> WireMessage {
    let role = match msg.role {
        proto::Role::System => "system",
        proto::Role::User => "user",
        proto::Role::Assistant => "assistant",
        proto::Role::Tool => "tool",
    };

    let tool_calls: Vec<WireToolCall> = msg
        .tool_calls
        .iter()
        .flatten()
        .map(|tc| WireToolCall {
            id: tc.id.clone(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: tc.name.clone(),
                arguments: match &tc.arguments {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                },
            },
        })
        .collect();

    // Assistant turns that only call tools carry no content field.
    let content = if tool_calls.is_empty() || !msg.content.is_empty() {
        Some(msg.content.clone())
    } else {
        None
    };

    WireMessage {
        role,
        content,
        tool_call_id: msg.tool_call_id.clone(),
        tool_calls,
    }
}

fn convert_tool(t: &ToolDefinition) -> WireTool {
    WireTool {
        kind: "function",
        function: WireFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        },
    }
}

fn into_chat_response(parsed: CompletionResponse) -> Result<ChatResponse, LlmError> {
    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

    let calls = choice.message.tool_calls.unwrap_or_default();
    if !calls.is_empty() {
        let tool_calls = calls
            .into_iter()
            .map(|call| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{}", Uuid::new_v4().simple())
                } else {
                    call.id
                },
                name: call.function.name,
                arguments: parse_tool_arguments(&call.function.arguments),
            })
            .collect();
        return Ok(ChatResponse::ToolCalls(tool_calls, usage));
    }

    Ok(ChatResponse::Text(
        choice.message.content.unwrap_or_default(),
        usage,
    ))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;

    fn request_with_tool() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::system("rules"), ChatMessage::user("Get customer 12345")],
            tools: vec![ToolDefinition {
                name: "GetCustomer".to_string(),
                description: "Fetch one customer".to_string(),
                parameters: json!({"type": "object", "properties": {"customerId": {"type": "integer"}}}),
            }],
            model: "gemini-2.5-flash".to_string(),
        }
    }

    // ── conversion tests ───────────────────────────────────────────────────────

    #[test]
    fn endpoint_joins_base_url_without_double_slash() {
        let p = OpenAiCompatProvider::new("k", "https://generativelanguage.googleapis.com/v1beta/openai/");
        assert_eq!(
            p.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );
    }

    #[test]
    fn assistant_tool_call_message_omits_content_and_keeps_raw_arguments() {
        let msg = ChatMessage::assistant_tool_calls(vec![
            ToolCall {
                id: "a".to_string(),
                name: "GetFactorial".to_string(),
                arguments: json!({"number": 5}),
            },
            ToolCall {
                id: "b".to_string(),
                name: "GetFactorial".to_string(),
                arguments: Value::String("{broken".to_string()),
            },
        ]);
        let wire = serde_json::to_value(convert_message(&msg)).expect("serialize");

        assert_eq!(wire["role"], "assistant");
        assert!(wire.get("content").is_none());
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"number\":5}");
        assert_eq!(wire["tool_calls"][1]["function"]["arguments"], "{broken");
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let wire = serde_json::to_value(convert_message(&ChatMessage::tool_result(
            "call-1",
            "GetCustomer",
            "Alice",
        )))
        .expect("serialize");
        assert_eq!(wire, json!({"role": "tool", "content": "Alice", "tool_call_id": "call-1"}));
    }

    // ── HTTP tests ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn text_response_is_returned_with_usage() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/openai/chat/completions")
                .header("authorization", "Bearer test-key")
                .body_contains("\"model\":\"gemini-2.5-flash\"")
                .body_contains("\"name\":\"GetCustomer\"");
            then.status(200).json_body(json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            }));
        });

        let provider =
            OpenAiCompatProvider::new("test-key", format!("{}/v1beta/openai/", server.base_url()));
        let response = provider.chat(request_with_tool()).await.expect("chat succeeds");

        mock.assert();
        match response {
            ChatResponse::Text(text, usage) => {
                assert_eq!(text, "Hello");
                assert_eq!(usage.prompt_tokens, 12);
                assert_eq!(usage.completion_tokens, 3);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_calls_are_parsed_and_bad_arguments_kept_raw() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call-1", "type": "function",
                         "function": {"name": "GetCustomer", "arguments": "{\"customerId\":12345}"}},
                        {"id": "", "type": "function",
                         "function": {"name": "GetCustomer", "arguments": "{oops"}}
                    ]
                }}]
            }));
        });

        let provider = OpenAiCompatProvider::new("k", server.base_url());
        let response = provider.chat(request_with_tool()).await.expect("chat succeeds");

        let ChatResponse::ToolCalls(calls, _) = response else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call-1");
        assert_eq!(calls[0].arguments, json!({"customerId": 12345}));
        assert!(calls[1].id.starts_with("call_"));
        assert_eq!(calls[1].arguments, Value::String("{oops".to_string()));
    }

    #[tokio::test]
    async fn non_success_status_surfaces_status_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).body("{\"error\":{\"message\":\"quota exceeded\"}}");
        });

        let provider = OpenAiCompatProvider::new("k", server.base_url());
        let err = provider
            .chat(request_with_tool())
            .await
            .expect_err("429 should fail");

        match &err {
            LlmError::Upstream { status, body } => {
                assert_eq!(*status, 429);
                assert!(body.contains("quota exceeded"));
            }
            other => panic!("unexpected error variant: {other}"),
        }
        assert!(err.to_string().starts_with("API Error: 429 - "));
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body("not json");
        });

        let provider = OpenAiCompatProvider::new("k", server.base_url());
        let err = provider
            .chat(request_with_tool())
            .await
            .expect_err("bad body");
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn empty_choices_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({"choices": []}));
        });

        let provider = OpenAiCompatProvider::new("k", server.base_url()).with_max_tokens(Some(256));
        let err = provider
            .chat(request_with_tool())
            .await
            .expect_err("no choices");
        assert_eq!(err.to_string(), "Invalid response from LLM: response has no choices");
    }
}
