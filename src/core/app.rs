//! Startup and shutdown: config in, a ready dispatcher out.

use crate::core::chatbot::{ChatbotClient, ChatbotError};
use crate::core::config::{Config, ConfigError};
use crate::core::dispatch::ChatDispatcher;
use crate::core::providers::{EnvCredentials, ProviderCatalog, ProviderModelResolver};
use crate::mcp::{McpRegistry, RegisterOptions, SessionError, ToolSessionManager, TransportError};
use crate::server::AppState;
use crate::tools::chatbot_bridge::{chatbot_tool, CHATBOT_TOOL_NAME};
use crate::tools::ToolMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const MODEL_CONNECT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Chatbot(#[from] ChatbotError),
    #[error("failed to build model HTTP client: {0}")]
    Client(String),
}

pub struct App {
    pub config: Config,
    pub dispatcher: Arc<ChatDispatcher>,
}

impl App {
    pub fn state(&self) -> AppState {
        AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            force_tool_use_default: self.config.force_tool_use.unwrap_or(false),
        }
    }

    pub async fn shutdown(&self) {
        self.dispatcher.manager().close_all().await;
        info!("Closed all tool sessions");
    }
}

fn model_http_client() -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(MODEL_CONNECT_TIMEOUT_SECONDS))
        .build()
        .map_err(|err| AppError::Client(err.to_string()))
}

/// Connects every enabled tool server and wires the dispatcher.
///
/// A tool server that cannot be reached is skipped with a warning. Bad
/// configuration (unknown transport, unset header variable, missing chatbot
/// key) fails startup.
pub async fn bootstrap(config: Config) -> Result<App, AppError> {
    let registry = McpRegistry::from_config(&config)?;
    let manager = Arc::new(ToolSessionManager::with_http()?);
    manager
        .register_sessions(registry.into_sessions(), RegisterOptions::default())
        .await?;
    info!(
        sessions = manager.list_session_ids().await.len(),
        "Tool sessions ready"
    );

    let chatbot = config
        .chatbot
        .as_ref()
        .map(ChatbotClient::from_config)
        .transpose()?;

    let mut integrated = ToolMap::new();
    if let (Some(client), Some(chatbot_config)) = (chatbot.as_ref(), config.chatbot.as_ref()) {
        if chatbot_config.exposes_tool() {
            integrated.insert(CHATBOT_TOOL_NAME.to_string(), chatbot_tool(client.clone()));
        }
    }

    let models = ProviderModelResolver::new(
        ProviderCatalog::from_config(&config),
        Arc::new(EnvCredentials),
        model_http_client()?,
    );

    let dispatcher = ChatDispatcher::new(manager, Arc::new(models))
        .with_integrated_tools(integrated)
        .with_chatbot(chatbot)
        .with_default_system_prompt(config.system_prompt.clone());

    Ok(App {
        config,
        dispatcher: Arc::new(dispatcher),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::data::{ChatbotConfig, McpServerConfig};

    #[tokio::test]
    async fn empty_config_bootstraps() {
        let app = bootstrap(Config::default()).await.expect("bootstrap");
        let sessions = app.dispatcher.manager().list_session_ids().await;
        assert!(sessions.is_empty());
        assert!(!app.state().force_tool_use_default);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_tool_servers_are_skipped() {
        let config = Config {
            mcp_servers: vec![McpServerConfig {
                id: "down".to_string(),
                url: "http://127.0.0.1:9/mcp".to_string(),
                transport: Some("http".to_string()),
                fallback: Some(false),
                default: None,
                enabled: None,
                headers: None,
            }],
            ..Config::default()
        };
        let app = bootstrap(config).await.expect("bootstrap");
        let sessions = app.dispatcher.manager().list_session_ids().await;
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn unknown_transport_fails_startup() {
        let config = Config {
            mcp_servers: vec![McpServerConfig {
                id: "odd".to_string(),
                url: "http://127.0.0.1:9/mcp".to_string(),
                transport: Some("carrier-pigeon".to_string()),
                fallback: None,
                default: None,
                enabled: None,
                headers: None,
            }],
            ..Config::default()
        };
        assert!(matches!(
            bootstrap(config).await.err(),
            Some(AppError::Config(ConfigError::UnknownTransport { .. }))
        ));
    }

    #[tokio::test]
    async fn chatbot_is_exposed_as_tool() {
        let config = Config {
            chatbot: Some(ChatbotConfig {
                url: "http://127.0.0.1:9/ask".to_string(),
                api_key_env: None,
                expose_as_tool: Some(true),
            }),
            ..Config::default()
        };
        let app = bootstrap(config).await.expect("bootstrap");
        let tools = app.dispatcher.resolve_tools(Default::default()).await;
        assert!(tools.contains_key(CHATBOT_TOOL_NAME));
        assert!(tools[CHATBOT_TOOL_NAME].is_server_side());
    }
}
