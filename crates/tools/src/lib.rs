//! Tool server side of the bridge.
//!
//! The agent crate consumes remote tools only through [`ToolProvider`]. This
//! crate supplies the production implementation, an MCP client speaking
//! newline-delimited JSON-RPC over a child process's stdio, plus the rules
//! for turning a server path into a launch command.

pub mod command;
pub mod jsonrpc;
pub mod mcp;

pub use command::ServerCommand;
pub use mcp::{McpClient, McpClientOptions};

use async_trait::async_trait;
use proto::{CallToolResult, RawTool, ToolError};
use serde_json::{Map, Value};

/// Source of a tool catalogue and a call-tool operation
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Lists every tool the server currently exposes.
    async fn list_tools(&self) -> Result<Vec<RawTool>, ToolError>;

    /// Invokes one tool by name with an arguments object.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, ToolError>;

    /// Releases the underlying connection. Calling it twice is harmless.
    async fn shutdown(&self) -> Result<(), ToolError> {
        Ok(())
    }
}
