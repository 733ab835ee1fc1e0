//! End-to-end flow: JSON-RPC tool server, catalogue, agent loop, and threads.

use std::collections::VecDeque;
use std::sync::Arc;

use agent::{
    AgentSettings, Backend, ChatRequest, ChatResponse, DiscoveryOptions, LlmProvider,
    SessionOptions, ThreadManager, TokenUsage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use proto::{Error, LlmError, Role, ToolCall};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio_util::sync::CancellationToken;
use tools::{McpClient, McpClientOptions, ToolProvider};

/// Minimal line-delimited JSON-RPC tool server with one customer tool.
async fn serve_customers(input: DuplexStream, mut output: DuplexStream, calls: Arc<Mutex<Vec<Value>>>) {
    let mut lines = BufReader::new(input).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let message: Value = serde_json::from_str(&line).expect("client sent json");
        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        let result = match message["method"].as_str() {
            Some("initialize") => json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "customers", "version": "1.0.0"}
            }),
            Some("tools/list") => json!({
                "tools": [{
                    "name": "GetCustomer",
                    "description": "Fetch one customer by id",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "customerId": {"type": "integer", "description": "The customer ID"},
                            "includeOrders": {
                                "type": "boolean",
                                "description": "Include order history",
                                "default": false
                            }
                        },
                        "required": ["customerId"]
                    }
                }]
            }),
            Some("tools/call") => {
                let arguments = message["params"]["arguments"].clone();
                calls.lock().push(arguments.clone());
                json!({
                    "content": [
                        {"type": "text", "text": format!("Customer {}: Alice", arguments["customerId"])},
                        {"type": "text", "text": format!("orders included: {}", arguments["includeOrders"])}
                    ]
                })
            }
            _ => json!({}),
        };
        let mut reply = json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string();
        reply.push('\n');
        if output.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

struct InProcessBackend {
    llm: Arc<ScriptedLlm>,
    calls: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Backend for InProcessBackend {
    async fn connect_tools(&self) -> Result<Arc<dyn ToolProvider>, Error> {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_customers(server_in, server_out, Arc::clone(&self.calls)));

        let client = McpClient::connect(client_in, client_out, McpClientOptions::default());
        client.initialize().await?;
        Ok(Arc::new(client))
    }

    async fn chat_client(&self) -> Result<Arc<dyn LlmProvider>, Error> {
        Ok(self.llm.clone())
    }
}

struct ScriptedLlm {
    replies: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from(replies)),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().push(req);
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))
    }
}

fn text(reply: &str) -> ChatResponse {
    ChatResponse::Text(reply.to_string(), TokenUsage::default())
}

fn get_customer(id: &str, arguments: Value) -> ChatResponse {
    ChatResponse::ToolCalls(
        vec![ToolCall {
            id: id.to_string(),
            name: "GetCustomer".to_string(),
            arguments,
        }],
        TokenUsage::default(),
    )
}

fn manager(llm: Arc<ScriptedLlm>, strict: bool) -> (ThreadManager, Arc<Mutex<Vec<Value>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let backend = InProcessBackend {
        llm,
        calls: Arc::clone(&calls),
    };
    let options = SessionOptions {
        agent: AgentSettings::new("test-model"),
        discovery: DiscoveryOptions {
            strict_arguments: strict,
            ..DiscoveryOptions::default()
        },
    };
    (ThreadManager::new(Arc::new(backend), options), calls)
}

#[tokio::test]
async fn customer_lookup_binds_values_to_listed_parameter_names() {
    let llm = ScriptedLlm::new(vec![
        get_customer("call-1", json!({"customerId": 12345, "includeOrders": false})),
        text("Customer 12345 is Alice."),
    ]);
    let (manager, calls) = manager(Arc::clone(&llm), false);
    let cancel = CancellationToken::new();

    let answer = manager
        .send("Get customer 12345", &cancel)
        .await
        .expect("turn succeeds");
    assert_eq!(answer, "Customer 12345 is Alice.");
    assert_eq!(
        calls.lock().as_slice(),
        &[json!({"customerId": 12345, "includeOrders": false})]
    );

    let requests = llm.requests.lock();
    let system = &requests[0].messages[0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("AVAILABLE TOOLS AND THEIR PARAMETERS:"));
    assert!(system.content.contains("\"customerId\""));
    assert!(system.content.contains("\"isRequired\": true"));
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "GetCustomer");

    let tool_result = requests[1].messages.last().expect("tool result");
    assert_eq!(tool_result.role, Role::Tool);
    assert_eq!(
        tool_result.content,
        "Customer 12345: Alice\norders included: false"
    );
    drop(requests);

    manager.dispose().await;
}

#[tokio::test]
async fn strict_arguments_fill_defaults_and_stop_missing_required_calls() {
    let llm = ScriptedLlm::new(vec![
        get_customer("call-1", json!({})),
        text("Please provide the customer ID to retrieve."),
        get_customer("call-2", json!({"customerId": 7})),
        text("Customer 7 is Alice."),
    ]);
    let (manager, calls) = manager(Arc::clone(&llm), true);
    let cancel = CancellationToken::new();

    let first = manager
        .send("Get customer with orders", &cancel)
        .await
        .expect("first turn");
    assert_eq!(first, "Please provide the customer ID to retrieve.");
    assert!(calls.lock().is_empty());

    let second = manager.send("It's 7", &cancel).await.expect("second turn");
    assert_eq!(second, "Customer 7 is Alice.");
    assert_eq!(
        calls.lock().as_slice(),
        &[json!({"customerId": 7, "includeOrders": false})]
    );

    let requests = llm.requests.lock();
    assert_eq!(
        requests[1].messages.last().map(|m| m.content.as_str()),
        Some("Error invoking tool GetCustomer: missing required parameter(s): customerId")
    );
    drop(requests);

    manager.dispose().await;
}

#[tokio::test]
async fn manual_invocation_and_refresh_share_one_connection() {
    let llm = ScriptedLlm::new(Vec::new());
    let (manager, calls) = manager(llm, false);
    let cancel = CancellationToken::new();

    let output = manager
        .invoke_tool("GetCustomer", json!("{\"customerId\": 1}"), &cancel)
        .await
        .expect("manual call");
    assert_eq!(output, "Customer 1: Alice\norders included: null");

    let before = manager.catalogue(&cancel).await.expect("catalogue");
    let after = manager.refresh(&cancel).await.expect("refresh");
    assert!(after.version() > before.version());
    assert_eq!(after.names(), vec!["GetCustomer"]);
    assert_eq!(calls.lock().len(), 1);

    let missing = manager
        .invoke_tool("DeleteCustomer", json!({}), &cancel)
        .await
        .expect("unknown tools still answer with text");
    assert_eq!(
        missing,
        "Error invoking tool DeleteCustomer: Tool not found: DeleteCustomer"
    );

    manager.dispose().await;
}
