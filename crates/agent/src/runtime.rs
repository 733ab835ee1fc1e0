//! Tool-calling loop that answers one message on top of a thread's history.

use std::sync::Arc;

use chrono::Utc;
use proto::{LlmError, ToolCall, ToolInvocation, Turn};
use tracing::{debug, info, warn};

use crate::{
    catalogue::Catalogue,
    instructions::build_instructions,
    llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, TokenUsage},
};

pub const DEFAULT_AGENT_NAME: &str = "DatabaseRetrievalAgent";
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
pub const DEFAULT_HISTORY_WINDOW: usize = 40;
const MAX_TOOL_RESULT_CHARS: usize = 16_000;

/// Maximum total character size of conversation context sent to the LLM.
/// Roughly 150K tokens (1 token ≈ 4 chars), leaving room for the response.
const MAX_CONTEXT_CHARS: usize = 600_000;

/// Static agent parameters
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub name: String,
    pub model: String,
    pub max_tool_rounds: usize,
    /// Number of most recent turns replayed to the model.
    pub history_window: usize,
}

impl AgentSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.to_string(),
            model: model.into(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// A chat model bound to one catalogue snapshot and its instructions
pub struct Agent {
    settings: AgentSettings,
    llm: Arc<dyn LlmProvider>,
    catalogue: Arc<Catalogue>,
    instructions: String,
}

impl Agent {
    /// Creates an agent whose instructions embed the catalogue's parameter table.
    pub fn new(llm: Arc<dyn LlmProvider>, catalogue: Arc<Catalogue>, settings: AgentSettings) -> Self {
        let instructions = build_instructions(&catalogue);
        Self {
            settings,
            llm,
            catalogue,
            instructions,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        &self.catalogue
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Answers `message` given the prior turns of a thread.
    ///
    /// Tool calls requested by the model are executed through the catalogue's
    /// adapters, one at a time in the order requested. The returned turn is
    /// not recorded anywhere; the caller owns the history.
    pub async fn run(&self, history: &[Turn], message: &str) -> Result<Turn, proto::Error> {
        let started_at = Utc::now();
        let history = trim_history(history, self.settings.history_window);

        let mut messages = history_to_chat_messages(&self.instructions, history);
        messages.push(ChatMessage::user(message));

        // Truncate history if it exceeds the context budget.
        truncate_messages_to_fit(&mut messages);

        let tool_defs = self.catalogue.definitions();
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut total_usage = TokenUsage::default();
        let mut round = 0;

        loop {
            if round >= self.settings.max_tool_rounds {
                warn!(
                    agent = %self.settings.name,
                    "Max tool rounds ({}) reached",
                    self.settings.max_tool_rounds
                );
                return Err(LlmError::MaxToolRoundsExceeded.into());
            }

            let req = ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                model: self.settings.model.clone(),
            };
            debug!(round, catalogue = self.catalogue.version(), "LLM call");
            let t0 = std::time::Instant::now();
            let response = self.llm.chat(req).await?;
            debug!(elapsed_ms = %t0.elapsed().as_millis(), round, "LLM response received");

            match response {
                ChatResponse::Text(text, usage) => {
                    total_usage.add(&usage);
                    info!(
                        agent = %self.settings.name,
                        tool_calls = invocations.len(),
                        prompt_tokens = total_usage.prompt_tokens,
                        completion_tokens = total_usage.completion_tokens,
                        "Agent final response: {text:.50}"
                    );
                    return Ok(Turn::new(message, text, invocations, started_at));
                }

                ChatResponse::ToolCalls(tool_calls, usage) => {
                    debug!(
                        "Tool calls requested: {:?}",
                        tool_calls.iter().map(|tc| &tc.name).collect::<Vec<_>>()
                    );
                    total_usage.add(&usage);
                    messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));

                    for tc in tool_calls {
                        let output = self.catalogue.invoke(&tc.name, tc.arguments.clone()).await;
                        let llm_output = truncate_tool_result(&output, MAX_TOOL_RESULT_CHARS);
                        messages.push(ChatMessage::tool_result(&tc.id, &tc.name, llm_output));
                        invocations.push(ToolInvocation {
                            call_id: tc.id,
                            tool_name: tc.name,
                            arguments: tc.arguments,
                            output,
                        });
                    }
                    round += 1;
                }
            }
        }
    }
}

/// Keeps the most recent `window` turns.
fn trim_history(history: &[Turn], window: usize) -> &[Turn] {
    let start = history.len().saturating_sub(window);
    &history[start..]
}

/// Replays recorded turns as model input after the system instructions.
///
/// Each turn becomes its prompt, the tool calls it made with their outputs,
/// and the final answer, so the model sees what it already looked up.
fn history_to_chat_messages(instructions: &str, history: &[Turn]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = vec![ChatMessage::system(instructions)];
    for turn in history {
        messages.push(ChatMessage::user(&turn.prompt));
        if !turn.tool_calls.is_empty() {
            let calls = turn
                .tool_calls
                .iter()
                .map(|inv| ToolCall {
                    id: inv.call_id.clone(),
                    name: inv.tool_name.clone(),
                    arguments: inv.arguments.clone(),
                })
                .collect();
            messages.push(ChatMessage::assistant_tool_calls(calls));
            for inv in &turn.tool_calls {
                let content = truncate_tool_result(&inv.output, MAX_TOOL_RESULT_CHARS);
                messages.push(ChatMessage::tool_result(&inv.call_id, &inv.tool_name, content));
            }
        }
        messages.push(ChatMessage::assistant(&turn.response));
    }
    messages
}

/// Truncates a tool result to at most `max_chars` characters.
/// If the result is longer, it appends a note with how many characters were cut.
fn truncate_tool_result(output: &str, max_chars: usize) -> String {
    let total_chars = output.chars().count();
    if total_chars <= max_chars {
        return output.to_string();
    }

    let kept = output.chars().take(max_chars).collect::<String>();
    let cut = total_chars - max_chars;
    format!("{kept}\n...[output truncated: {cut} chars omitted]")
}

/// Estimates the character count of a single [`ChatMessage`] for context
/// size budgeting. Counts `content` plus serialized tool call arguments.
fn estimate_message_chars(msg: &ChatMessage) -> usize {
    let mut chars = msg.content.len();
    if let Some(calls) = &msg.tool_calls {
        for tc in calls {
            chars += tc.name.len();
            chars += tc.arguments.to_string().len();
        }
    }
    chars
}

/// Truncates conversation messages so total context stays within
/// [`MAX_CONTEXT_CHARS`]. The system message (first) and the most recent
/// messages are always preserved; the oldest middle messages are dropped
/// when the budget is exceeded.
fn truncate_messages_to_fit(messages: &mut Vec<ChatMessage>) {
    truncate_messages_to_budget(messages, MAX_CONTEXT_CHARS);
}

fn truncate_messages_to_budget(messages: &mut Vec<ChatMessage>, budget: usize) {
    let total: usize = messages.iter().map(estimate_message_chars).sum();
    if total <= budget {
        return;
    }

    const MIN_KEEP_TAIL: usize = 4;
    let keep_tail = MIN_KEEP_TAIL.min(messages.len().saturating_sub(1));
    let keep_head: usize = 1; // instructions

    if messages.len() <= keep_head + keep_tail {
        return;
    }

    let head_chars: usize = messages[..keep_head]
        .iter()
        .map(estimate_message_chars)
        .sum();
    let tail_chars: usize = messages[messages.len() - keep_tail..]
        .iter()
        .map(estimate_message_chars)
        .sum();

    let remaining_budget = budget.saturating_sub(head_chars + tail_chars);

    // Keep the newest middle messages that still fit.
    let middle = &messages[keep_head..messages.len() - keep_tail];
    let mut keep_from_middle: usize = 0;
    let mut middle_chars: usize = 0;

    for msg in middle.iter().rev() {
        let c = estimate_message_chars(msg);
        if middle_chars + c > remaining_budget {
            break;
        }
        middle_chars += c;
        keep_from_middle += 1;
    }

    let mut drop_count = middle.len() - keep_from_middle;
    // A tool result must not lose the assistant message that requested it.
    while drop_count < middle.len() && messages[keep_head + drop_count].role == proto::Role::Tool {
        drop_count += 1;
    }

    if drop_count > 0 {
        warn!(
            "Conversation context too large ({total} chars > {budget}); \
             dropping {drop_count} oldest messages to fit"
        );
        messages.drain(keep_head..keep_head + drop_count);
    }
}
