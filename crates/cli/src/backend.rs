//! Production wiring: a spawned stdio tool server plus an OpenAI-compatible chat client.

use std::sync::Arc;

use agent::{Backend, LlmProvider, OpenAiCompatProvider};
use async_trait::async_trait;
use proto::{ConfigError, Error};
use tools::{McpClient, McpClientOptions, ServerCommand, ToolProvider};
use tracing::info;

use crate::config::{Config, LlmConfig};

pub struct StdioBackend {
    server_name: String,
    command: ServerCommand,
    client_options: McpClientOptions,
    llm: LlmConfig,
}

impl StdioBackend {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            server_name: config.server.name.clone(),
            command: config.server_command()?,
            client_options: McpClientOptions {
                request_timeout: config.request_timeout(),
                ..McpClientOptions::default()
            },
            llm: config.llm.clone(),
        })
    }

    pub fn command(&self) -> &ServerCommand {
        &self.command
    }
}

#[async_trait]
impl Backend for StdioBackend {
    async fn connect_tools(&self) -> Result<Arc<dyn ToolProvider>, Error> {
        let client = McpClient::spawn(&self.command, self.client_options.clone()).await?;
        info!(server = %self.server_name, "Tool server connected");
        Ok(Arc::new(client))
    }

    async fn chat_client(&self) -> Result<Arc<dyn LlmProvider>, Error> {
        let provider = OpenAiCompatProvider::new(&self.llm.api_key, &self.llm.base_url)
            .with_max_tokens(self.llm.max_tokens);
        Ok(Arc::new(provider))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proto::{ToolError, TransportError};

    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.llm.api_key = "key".to_string();
        config.server.command = Some("toolbridge-test-server-that-does-not-exist".to_string());
        config.server.args = vec!["--stdio".to_string()];
        config.server.request_timeout_secs = 5;
        config
    }

    #[test]
    fn from_config_uses_resolved_command_and_timeout() {
        let backend = StdioBackend::from_config(&config()).expect("backend");
        assert_eq!(
            backend.command().display(),
            "toolbridge-test-server-that-does-not-exist --stdio"
        );
        assert_eq!(backend.client_options.request_timeout, Duration::from_secs(5));
        assert_eq!(backend.client_options.client_name, "toolbridge");
    }

    #[test]
    fn from_config_without_server_is_config_error() {
        let mut config = config();
        config.server.command = None;
        let err = StdioBackend::from_config(&config)
            .err()
            .expect("missing server must fail");
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[tokio::test]
    async fn connect_tools_reports_spawn_failure() {
        let backend = StdioBackend::from_config(&config()).expect("backend");
        let err = backend
            .connect_tools()
            .await
            .err()
            .expect("missing program must fail");
        match err {
            Error::Tool(ToolError::Transport(TransportError::Spawn(message))) => {
                assert!(message.contains("toolbridge-test-server-that-does-not-exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn chat_client_builds_without_network() {
        let backend = StdioBackend::from_config(&config()).expect("backend");
        assert!(backend.chat_client().await.is_ok());
    }
}
