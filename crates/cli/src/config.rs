use std::path::{Path, PathBuf};
use std::time::Duration;

use agent::runtime::{DEFAULT_AGENT_NAME, DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_TOOL_ROUNDS};
use agent::{AgentSettings, CollisionPolicy, DiscoveryOptions, SessionOptions};
use proto::ConfigError;
use serde::Deserialize;
use tools::ServerCommand;
use tracing::debug;

/// Gemini's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const CONFIG_FILE_NAME: &str = "toolbridge.toml";

/// Top-level CLI configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Tool server launch settings.
    pub server: ServerConfig,
    /// Chat completion endpoint settings.
    pub llm: LlmConfig,
    /// Agent behaviour.
    pub agent: AgentConfig,
}

/// How to start the tool server.
///
/// `command` wins over `path` when both are set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Program to run, looked up on `PATH`.
    pub command: Option<String>,
    /// Extra arguments appended after the program (or the resolved launcher).
    pub args: Vec<String>,
    /// Server project, script, or binary; the launcher is picked from it.
    pub path: Option<String>,
    /// Label used in logs.
    pub name: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            path: None,
            name: "tool-server".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key (env overrides applied at load time; see `Config::load`).
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Completion token cap. Omitted from requests when unset.
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Maximum tool-call rounds per message before bailing out.
    pub max_tool_rounds: usize,
    /// Check required parameters and fill defaults before calling a tool.
    pub strict_arguments: bool,
    /// What to do when the server lists two tools with one name.
    pub duplicate_tools: CollisionPolicy,
    /// Number of most recent turns replayed to the model.
    pub history_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            strict_arguments: false,
            duplicate_tools: CollisionPolicy::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(Path::to_path_buf).or_else(default_config_path);
        debug!(path = ?config_path, "Config file resolved");

        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        config.apply_env_overrides();

        debug!(
            model = %config.llm.model,
            base_url = %config.llm.base_url,
            server = %config.server.name,
            "Config loaded"
        );
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Environment variables override file values; blank values are ignored.
    fn apply_env_overrides(&mut self) {
        if let Some(key) = env_value("TOOLBRIDGE_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(url) = env_value("TOOLBRIDGE_API_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = env_value("TOOLBRIDGE_MODEL") {
            self.llm.model = model;
        }
        if let Some(command) = env_value("TOOLBRIDGE_SERVER_COMMAND") {
            self.server.command = Some(command);
        }
        if let Some(path) = env_value("TOOLBRIDGE_SERVER_PATH") {
            self.server.path = Some(path);
        }

        if self.llm.api_key.trim().is_empty() {
            if let Some((source, key)) = ["OPENAI_API_KEY", "GEMINI_API_KEY"]
                .into_iter()
                .find_map(|name| env_value(name).map(|key| (name, key)))
            {
                debug!(source, "API key resolved from fallback env");
                self.llm.api_key = key;
            }
        }
    }

    /// Checks that everything needed to connect is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("llm.api_key".to_string()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingField("llm.model".to_string()));
        }
        let base_url = self.llm.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::MissingField("llm.base_url".to_string()));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "llm.base_url".to_string(),
                reason: format!("expected an http(s) URL, got {base_url}"),
            });
        }
        if self.server_program().is_none() && self.server_path().is_none() {
            return Err(ConfigError::MissingField(
                "server.command or server.path".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.request_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.max_tool_rounds".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Builds the launch command for the tool server.
    pub fn server_command(&self) -> Result<ServerCommand, ConfigError> {
        let base = if let Some(program) = self.server_program() {
            ServerCommand::new(program)
        } else if let Some(path) = self.server_path() {
            ServerCommand::resolve(Path::new(path))?
        } else {
            return Err(ConfigError::MissingField(
                "server.command or server.path".to_string(),
            ));
        };
        Ok(base.with_args(self.server.args.iter().cloned()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            agent: AgentSettings {
                name: self.agent.name.clone(),
                model: self.llm.model.clone(),
                max_tool_rounds: self.agent.max_tool_rounds,
                history_window: self.agent.history_window,
            },
            discovery: DiscoveryOptions {
                collisions: self.agent.duplicate_tools,
                strict_arguments: self.agent.strict_arguments,
            },
        }
    }

    fn server_program(&self) -> Option<&str> {
        non_blank(self.server.command.as_deref())
    }

    fn server_path(&self) -> Option<&str> {
        non_blank(self.server.path.as_deref())
    }
}

/// `~/.toolbridge`, when a home directory is known.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".toolbridge"))
}

fn default_config_path() -> Option<PathBuf> {
    // Look in current dir, then home dir
    let cwd = std::env::current_dir().ok()?.join(CONFIG_FILE_NAME);
    if cwd.exists() {
        return Some(cwd);
    }
    let home_config = home_dir()?.join("config.toml");
    home_config.exists().then_some(home_config)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
