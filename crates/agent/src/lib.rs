//! Tool catalogue, invocation adapters, and the agent runtime built on them.
//!
//! The flow is: a [`ToolProvider`](tools::ToolProvider) lists raw tools, the
//! [`Catalogue`] normalizes their schemas and wraps each one in an
//! [`InvocationAdapter`], [`build_instructions`] turns the catalogue into the
//! system prompt, and the [`ThreadManager`] drives conversations through an
//! [`Agent`].

pub mod adapter;
pub mod catalogue;
pub mod instructions;
pub mod llm;
pub mod openai;
pub mod runtime;
pub mod schema;
pub mod session;
pub mod thread;

/// Per-tool invocation adapter.
pub use adapter::InvocationAdapter;
/// Discovered tool set and discovery options.
pub use catalogue::{Catalogue, CollisionPolicy, DiscoveryOptions, ToolDescriptor};
/// System prompt assembly.
pub use instructions::build_instructions;
/// Chat request/response models and provider interfaces.
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, TokenUsage};
/// OpenAI-compatible chat completions provider.
pub use openai::OpenAiCompatProvider;
/// Main runtime orchestration loop.
pub use runtime::{Agent, AgentSettings};
/// Normalized parameter descriptors.
pub use schema::{DefaultValue, ParameterDescriptor, ParameterMap, normalize_schema};
/// Lazy initialization and thread bookkeeping.
pub use session::{Backend, SessionOptions, ThreadManager, describe_failure};
pub use thread::Thread;
