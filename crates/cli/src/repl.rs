//! Interactive chat loop.

use std::future::Future;
use std::sync::Arc;

use agent::{Catalogue, ThreadManager, describe_failure};
use proto::{Error, ThreadId};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PROMPT: &str = "toolbridge> ";
const TOOL_USAGE: &str = "Usage: tool <name> [jsonArguments]";
const SWITCH_USAGE: &str = "Usage: /switch <id>";

const HELP: &str = "\
Commands:
  <message>                  ask the agent
  tool <name> [json]         call a tool directly
  /tools                     list discovered tools and their parameters
  /new [id]                  start a new thread (named when an id is given)
  /switch <id>               continue a named thread
  /reset                     start over with a fresh anonymous thread
  /refresh                   re-discover tools for threads created afterwards
  /threads                   list named threads
  /help                      show this help
  /quit, /exit, exit         leave
Ctrl-C cancels the running turn.";

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Quit,
    Help,
    Tools,
    NewThread(Option<String>),
    Switch(String),
    Reset,
    Refresh,
    Threads,
    /// Manual invocation; `arguments` is `Null` when absent or not valid JSON.
    Tool { name: String, arguments: Value },
    Usage(&'static str),
    Unknown(String),
    Message(String),
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_line(raw: &str) -> Option<ReplCommand> {
    let line = normalize_input_line(raw)?;
    if is_quit_command(&line) {
        return Some(ReplCommand::Quit);
    }

    if line == "tool" || line.starts_with("tool ") {
        return Some(parse_tool_command(&line["tool".len()..]));
    }

    let Some(command) = line.strip_prefix('/') else {
        return Some(ReplCommand::Message(line));
    };
    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let argument = (!rest.is_empty()).then(|| rest.to_string());

    let parsed = match name {
        "help" => ReplCommand::Help,
        "tools" => ReplCommand::Tools,
        "new" => ReplCommand::NewThread(argument),
        "switch" => match argument {
            Some(id) => ReplCommand::Switch(id),
            None => ReplCommand::Usage(SWITCH_USAGE),
        },
        "reset" => ReplCommand::Reset,
        "refresh" => ReplCommand::Refresh,
        "threads" => ReplCommand::Threads,
        _ => ReplCommand::Unknown(line.clone()),
    };
    Some(parsed)
}

fn parse_tool_command(rest: &str) -> ReplCommand {
    let rest = rest.trim();
    if rest.is_empty() {
        return ReplCommand::Usage(TOOL_USAGE);
    }
    let (name, json) = match rest.split_once(char::is_whitespace) {
        Some((name, json)) => (name, json.trim()),
        None => (rest, ""),
    };
    let arguments = if json.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(json).unwrap_or_else(|e| {
            warn!(tool = %name, "Ignoring invalid JSON arguments: {e}");
            Value::Null
        })
    };
    ReplCommand::Tool {
        name: name.to_string(),
        arguments,
    }
}

/// Trims one input line, dropping empty input.
fn normalize_input_line(raw: &str) -> Option<String> {
    let line = raw.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

/// Returns true when input requests REPL termination.
fn is_quit_command(line: &str) -> bool {
    line == "/quit" || line == "/exit" || line == "exit"
}

/// Drives a [`ThreadManager`] from line-based input
pub struct Repl {
    manager: Arc<ThreadManager>,
    interrupt: Arc<Notify>,
}

impl Repl {
    /// `interrupt` cancels whatever operation is running when notified.
    pub fn new(manager: Arc<ThreadManager>, interrupt: Arc<Notify>) -> Self {
        Self { manager, interrupt }
    }

    /// Reads commands until a quit word or end of input.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        write_flush(&mut output, PROMPT).await?;

        while let Some(line) = lines.next_line().await? {
            let Some(command) = parse_line(&line) else {
                write_flush(&mut output, PROMPT).await?;
                continue;
            };
            if command == ReplCommand::Quit {
                break;
            }

            let reply = self.execute(command).await;
            write_flush(&mut output, &format!("{reply}\n\n{PROMPT}")).await?;
        }

        info!("Chat session ended");
        Ok(())
    }

    /// Runs one command and returns the text to show.
    pub async fn execute(&self, command: ReplCommand) -> String {
        let manager = &self.manager;
        match command {
            ReplCommand::Quit => String::new(),
            ReplCommand::Help => HELP.to_string(),
            ReplCommand::Usage(usage) => usage.to_string(),
            ReplCommand::Unknown(line) => format!("Unknown command: {line}. Type /help for commands."),
            ReplCommand::Message(text) => {
                self.guarded(|cancel| async move { manager.send(&text, &cancel).await })
                    .await
                    .unwrap_or_else(|e| describe_failure(&e))
            }
            ReplCommand::Tool { name, arguments } => {
                self.guarded(|cancel| async move {
                    manager.invoke_tool(&name, arguments, &cancel).await
                })
                .await
                .unwrap_or_else(|e| describe_failure(&e))
            }
            ReplCommand::Tools => {
                let listing = self
                    .guarded(|cancel| async move { manager.catalogue(&cancel).await })
                    .await;
                match listing {
                    Ok(catalogue) => render_catalogue(&catalogue),
                    Err(e) => describe_failure(&e),
                }
            }
            ReplCommand::NewThread(id) => {
                let id = id.map(ThreadId::from);
                let created = self
                    .guarded(|cancel| async move { manager.new_thread(id, &cancel).await })
                    .await;
                match created {
                    Ok(thread) => match thread.id() {
                        Some(id) => format!("Started thread {id}"),
                        None => "Started a new anonymous thread".to_string(),
                    },
                    Err(e) => describe_failure(&e),
                }
            }
            ReplCommand::Switch(id) => {
                let id = ThreadId::from(id);
                if manager.switch_to(&id) {
                    format!("Switched to thread {id}")
                } else {
                    format!("Unknown thread: {id}")
                }
            }
            ReplCommand::Reset => self
                .guarded(|cancel| async move { manager.reset_current(&cancel).await })
                .await
                .map(|_| "Conversation reset".to_string())
                .unwrap_or_else(|e| describe_failure(&e)),
            ReplCommand::Refresh => self
                .guarded(|cancel| async move { manager.refresh(&cancel).await })
                .await
                .map(|catalogue| {
                    format!(
                        "Discovered {} tools (catalogue v{}). New threads will use them.",
                        catalogue.len(),
                        catalogue.version()
                    )
                })
                .unwrap_or_else(|e| describe_failure(&e)),
            ReplCommand::Threads => {
                let ids = manager.thread_ids();
                if ids.is_empty() {
                    return "No named threads".to_string();
                }
                let current = manager.current_thread_id();
                ids.iter()
                    .map(|id| {
                        let marker = if current.as_ref() == Some(id) { "*" } else { " " };
                        format!("{marker} {id}")
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }

    /// Runs `work` with a fresh cancellation token tripped by the interrupt.
    async fn guarded<T, F, Fut>(&self, work: F) -> Result<T, Error>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let cancel = CancellationToken::new();
        let work = work(cancel.clone());
        tokio::pin!(work);
        tokio::select! {
            result = &mut work => result,
            _ = self.interrupt.notified() => {
                info!("Interrupted; cancelling current operation");
                cancel.cancel();
                work.await
            }
        }
    }
}

/// Tool names with descriptions, then the parameter table the agent sees.
pub fn render_catalogue(catalogue: &Catalogue) -> String {
    if catalogue.is_empty() {
        return "No tools discovered".to_string();
    }
    let mut out = format!("{} tools (catalogue v{}):\n", catalogue.len(), catalogue.version());
    for descriptor in catalogue.descriptors() {
        if descriptor.description.is_empty() {
            out.push_str(&format!("  {}\n", descriptor.name));
        } else {
            out.push_str(&format!("  {}: {}\n", descriptor.name, descriptor.description));
        }
    }
    out.push_str("\nParameters:\n");
    out.push_str(&catalogue.parameter_table_json());
    out
}

async fn write_flush<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> std::io::Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agent::{
        AgentSettings, Backend, ChatRequest, ChatResponse, DiscoveryOptions, LlmProvider,
        SessionOptions, TokenUsage,
    };
    use async_trait::async_trait;
    use proto::{CallToolResult, ContentBlock, LlmError, RawTool, ToolError};
    use serde_json::{Map, json};
    use tools::ToolProvider;

    use super::*;

    struct FactorialServer;

    #[async_trait]
    impl ToolProvider for FactorialServer {
        async fn list_tools(&self) -> Result<Vec<RawTool>, ToolError> {
            Ok(vec![RawTool::new(
                "GetFactorial",
                "Computes n!",
                json!({"properties": {"number": {"type": "integer"}}, "required": ["number"]}),
            )])
        }

        async fn call_tool(
            &self,
            _name: &str,
            arguments: Map<String, Value>,
        ) -> Result<CallToolResult, ToolError> {
            let n = arguments.get("number").and_then(Value::as_u64).unwrap_or(0);
            let result: u64 = (1..=n).product();
            Ok(CallToolResult::success(vec![ContentBlock::text(result.to_string())]))
        }
    }

    /// Echoes the last message, or stalls when asked to.
    struct EchoLlm;

    #[async_trait]
    impl LlmProvider for EchoLlm {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
            let last = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if last == "stall" {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(ChatResponse::Text(format!("echo: {last}"), TokenUsage::default()))
        }
    }

    struct TestBackend;

    #[async_trait]
    impl Backend for TestBackend {
        async fn connect_tools(&self) -> Result<Arc<dyn ToolProvider>, Error> {
            Ok(Arc::new(FactorialServer))
        }

        async fn chat_client(&self) -> Result<Arc<dyn LlmProvider>, Error> {
            Ok(Arc::new(EchoLlm))
        }
    }

    fn repl() -> (Repl, Arc<Notify>) {
        let manager = Arc::new(ThreadManager::new(
            Arc::new(TestBackend),
            SessionOptions {
                agent: AgentSettings::new("m"),
                discovery: DiscoveryOptions::default(),
            },
        ));
        let interrupt = Arc::new(Notify::new());
        (Repl::new(manager, Arc::clone(&interrupt)), interrupt)
    }

    #[test]
    fn parse_line_trims_and_filters_empty() {
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(
            parse_line("  hello there "),
            Some(ReplCommand::Message("hello there".to_string()))
        );
    }

    #[test]
    fn quit_words_are_detected() {
        for word in ["/quit", "/exit", "exit", "  exit  "] {
            assert_eq!(parse_line(word), Some(ReplCommand::Quit));
        }
        assert_eq!(
            parse_line("exit now"),
            Some(ReplCommand::Message("exit now".to_string()))
        );
    }

    #[test]
    fn tool_command_parses_name_and_json_arguments() {
        assert_eq!(
            parse_line(r#"tool GetFactorial {"number": 5}"#),
            Some(ReplCommand::Tool {
                name: "GetFactorial".to_string(),
                arguments: json!({"number": 5}),
            })
        );
        assert_eq!(
            parse_line("tool GetRandomNumber"),
            Some(ReplCommand::Tool {
                name: "GetRandomNumber".to_string(),
                arguments: Value::Null,
            })
        );
        assert_eq!(
            parse_line("tool GetFactorial {not json"),
            Some(ReplCommand::Tool {
                name: "GetFactorial".to_string(),
                arguments: Value::Null,
            })
        );
        assert_eq!(parse_line("tool"), Some(ReplCommand::Usage(TOOL_USAGE)));
        assert_eq!(
            parse_line("tools are great"),
            Some(ReplCommand::Message("tools are great".to_string()))
        );
    }

    #[test]
    fn slash_commands_parse_with_optional_arguments() {
        assert_eq!(parse_line("/new"), Some(ReplCommand::NewThread(None)));
        assert_eq!(
            parse_line("/new  sales "),
            Some(ReplCommand::NewThread(Some("sales".to_string())))
        );
        assert_eq!(
            parse_line("/switch sales"),
            Some(ReplCommand::Switch("sales".to_string()))
        );
        assert_eq!(parse_line("/switch"), Some(ReplCommand::Usage(SWITCH_USAGE)));
        assert_eq!(parse_line("/threads"), Some(ReplCommand::Threads));
        assert_eq!(parse_line("/refresh"), Some(ReplCommand::Refresh));
        assert_eq!(parse_line("/reset"), Some(ReplCommand::Reset));
        assert_eq!(parse_line("/tools"), Some(ReplCommand::Tools));
        assert_eq!(
            parse_line("/frobnicate x"),
            Some(ReplCommand::Unknown("/frobnicate x".to_string()))
        );
    }

    #[tokio::test]
    async fn run_answers_messages_and_stops_at_quit() {
        let (repl, _) = repl();
        let input: &[u8] = b"hello\n\ntool GetFactorial {\"number\": 5}\nexit\nnever read\n";
        let mut output = Vec::new();
        repl.run(input, &mut output).await.expect("repl runs");

        let text = String::from_utf8(output).expect("utf8");
        assert!(text.starts_with(PROMPT));
        assert!(text.contains("echo: hello\n\n"));
        assert!(text.contains("120\n\n"));
        assert!(!text.contains("never read"));
    }

    #[tokio::test]
    async fn thread_commands_report_state() {
        let (repl, _) = repl();
        assert_eq!(
            repl.execute(ReplCommand::NewThread(Some("a".to_string()))).await,
            "Started thread a"
        );
        assert_eq!(
            repl.execute(ReplCommand::NewThread(Some("b".to_string()))).await,
            "Started thread b"
        );
        assert_eq!(repl.execute(ReplCommand::Threads).await, "  a\n* b");
        assert_eq!(
            repl.execute(ReplCommand::Switch("zzz".to_string())).await,
            "Unknown thread: zzz"
        );
        assert_eq!(
            repl.execute(ReplCommand::Switch("a".to_string())).await,
            "Switched to thread a"
        );
        assert_eq!(repl.execute(ReplCommand::Reset).await, "Conversation reset");
        assert_eq!(repl.execute(ReplCommand::Threads).await, "  a\n  b");
    }

    #[tokio::test]
    async fn tools_command_lists_parameters() {
        let (repl, _) = repl();
        let listing = repl.execute(ReplCommand::Tools).await;
        assert!(listing.contains("GetFactorial"));
        assert!(listing.contains("\"isRequired\": true"));
    }

    #[tokio::test]
    async fn interrupt_cancels_running_turn() {
        let (repl, interrupt) = repl();
        repl.execute(ReplCommand::Reset).await;

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupt.notify_waiters();
        });
        let reply = repl
            .execute(ReplCommand::Message("stall".to_string()))
            .await;
        trigger.await.expect("trigger");
        assert_eq!(reply, "Operation cancelled");

        let after = repl.execute(ReplCommand::Message("again".to_string())).await;
        assert_eq!(after, "echo: again");
    }
}
