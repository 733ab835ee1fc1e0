use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Tool catalogue could not be built.
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Chat completion provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool transport error raised outside discovery and invocation adapters.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),

    /// The caller's cancellation signal fired before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// The owning service was disposed.
    #[error("Service has been disposed")]
    Disposed,
}

impl Error {
    /// Returns `true` for the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Errors raised while talking to the tool server process.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server process could not be started.
    #[error("Failed to spawn tool server: {0}")]
    Spawn(String),

    /// Pipe read/write failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed its output stream or the client was shut down.
    #[error("Tool server connection closed")]
    Closed,

    /// A frame could not be encoded or decoded.
    #[error("Malformed message: {0}")]
    Codec(String),

    /// The server answered with a JSON-RPC error object.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Tool execution errors
#[derive(Debug, Error)]
pub enum ToolError {
    /// Requested tool is unknown.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// The tool ran and reported a failure.
    #[error("{0}")]
    Remote(String),

    /// The call never reached the tool or its answer never came back.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Tool exceeded allowed execution time.
    #[error("Timeout after {0}s")]
    Timeout(u64),

    /// Tool call arguments are invalid.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Catalogue construction errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The tool server could not be reached or refused the handshake.
    #[error("Failed to connect to tool server: {0}")]
    Connect(#[source] ToolError),

    /// The listing call failed; no partial catalogue is produced.
    #[error("Tool listing failed: {0}")]
    ListFailed(#[source] ToolError),

    /// Two listed tools share a name.
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),
}

/// LLM provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// The endpoint answered with a non-success status.
    #[error("API Error: {status} - {body}")]
    Upstream { status: u16, body: String },

    /// The request never produced an HTTP response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Runtime exceeded configured tool-call rounds.
    #[error("Max tool rounds exceeded")]
    MaxToolRoundsExceeded,

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid role string value.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Generic serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
