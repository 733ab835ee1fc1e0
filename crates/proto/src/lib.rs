//! Shared types for the tool bridge.
//!
//! This crate defines the serializable tool listing/call shapes, thread and
//! turn records, and the strongly-typed error enums shared across the
//! workspace.

pub mod error;
pub mod message;
pub mod tool;

/// Re-export of all error types.
pub use error::*;
/// Re-export of conversation identity and turn types.
pub use message::{Role, ThreadId, ToolInvocation, Turn};
/// Re-export of tool listing, call, and result types.
pub use tool::{CallToolResult, ContentBlock, RawTool, ToolCall, ToolDefinition};
