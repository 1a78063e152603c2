//! Per-request chat dispatch: tool resolution, force-tool policy, model
//! selection and invocation.

use crate::core::chat_stream::{ModelRequest, MAX_TOOL_STEPS};
use crate::core::chatbot::{ChatbotClient, ChatbotError};
use crate::core::message::{latest_user_text, to_api_messages, to_chat_turns, UiMessage};
use crate::core::providers::{ModelResolver, ProviderError};
use crate::core::ui_stream::{answer_stream, ChatStream};
use crate::mcp::client::ToolSessionManager;
use crate::tools::{get_all_tools, merge_all_tools, FrontendTool, ToolMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Llm,
    Chatbot,
}

/// One chat request, fixed once built.
#[derive(Debug, Clone, Default)]
pub struct ChatRequestContext {
    pub messages: Vec<UiMessage>,
    pub system_prompt: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub frontend_tools: BTreeMap<String, FrontendTool>,
    pub force_tool_use: bool,
    pub mode: ChatMode,
    pub message_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Chatbot(#[from] ChatbotError),
    #[error("chatbot mode is not configured on this server")]
    ChatbotUnavailable,
}

impl DispatchError {
    /// Whether the caller, not the deployment, caused the failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidRequest(_)
                | DispatchError::ChatbotUnavailable
                | DispatchError::Provider(ProviderError::UnknownProvider(_))
        )
    }
}

/// Downgrades a forced run to unforced when there is nothing to call.
pub fn normalize_force_tool_use(requested: bool, tools: &ToolMap) -> bool {
    if requested && tools.is_empty() {
        warn!("Tool use was requested but no tools are available; not forcing tool use");
        return false;
    }
    requested
}

/// Appends the tool-use mandate naming every tool. Unforced runs and empty
/// tool maps leave the prompt as it was.
pub fn augment_system_prompt(
    system_prompt: Option<String>,
    force_tool_use: bool,
    tools: &ToolMap,
) -> Option<String> {
    if !force_tool_use || tools.is_empty() {
        return system_prompt;
    }

    let names: Vec<&str> = tools.keys().map(String::as_str).collect();
    let instruction = format!(
        "You must call at least one of the available tools before giving your final answer. \
Available tools: {}.",
        names.join(", ")
    );
    Some(match system_prompt.filter(|prompt| !prompt.trim().is_empty()) {
        Some(prompt) => format!("{prompt}\n\n{instruction}"),
        None => instruction,
    })
}

pub struct ChatDispatcher {
    manager: Arc<ToolSessionManager>,
    integrated_tools: ToolMap,
    models: Arc<dyn ModelResolver>,
    chatbot: Option<ChatbotClient>,
    default_system_prompt: Option<String>,
}

impl ChatDispatcher {
    pub fn new(manager: Arc<ToolSessionManager>, models: Arc<dyn ModelResolver>) -> Self {
        Self {
            manager,
            integrated_tools: ToolMap::new(),
            models,
            chatbot: None,
            default_system_prompt: None,
        }
    }

    pub fn with_integrated_tools(mut self, tools: ToolMap) -> Self {
        self.integrated_tools = tools;
        self
    }

    pub fn with_chatbot(mut self, chatbot: Option<ChatbotClient>) -> Self {
        self.chatbot = chatbot;
        self
    }

    pub fn with_default_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.default_system_prompt = prompt;
        self
    }

    pub fn manager(&self) -> &Arc<ToolSessionManager> {
        &self.manager
    }

    /// Integrated tools, every session's catalog, then `frontend` underneath.
    pub async fn resolve_tools(&self, frontend: BTreeMap<String, FrontendTool>) -> ToolMap {
        let mcp_tools = get_all_tools(&self.manager, &self.integrated_tools).await;
        merge_all_tools(frontend, mcp_tools)
    }

    pub async fn dispatch(&self, context: ChatRequestContext) -> Result<ChatStream, DispatchError> {
        if context.messages.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }

        if context.mode == ChatMode::Chatbot {
            return self.dispatch_chatbot(context).await;
        }

        let ChatRequestContext {
            messages,
            system_prompt,
            provider,
            model,
            frontend_tools,
            force_tool_use,
            message_id,
            ..
        } = context;

        let tools = self.resolve_tools(frontend_tools).await;
        let force_tool_use = normalize_force_tool_use(force_tool_use, &tools);
        let system_prompt = augment_system_prompt(
            system_prompt.or_else(|| self.default_system_prompt.clone()),
            force_tool_use,
            &tools,
        );

        let language_model = self.models.resolve(provider.as_deref(), model.as_deref())?;
        info!(
            model = %language_model.label(),
            tools = tools.len(),
            force_tool_use,
            "Dispatching chat request"
        );

        Ok(language_model.stream(ModelRequest {
            messages: to_api_messages(&messages),
            system_prompt,
            tools,
            max_steps: MAX_TOOL_STEPS,
            force_tool_use,
            message_id,
        }))
    }

    async fn dispatch_chatbot(
        &self,
        context: ChatRequestContext,
    ) -> Result<ChatStream, DispatchError> {
        let chatbot = self
            .chatbot
            .as_ref()
            .ok_or(DispatchError::ChatbotUnavailable)?;
        let question = latest_user_text(&context.messages).ok_or_else(|| {
            DispatchError::InvalidRequest("no user message with text to send".to_string())
        })?;

        let history_end = context
            .messages
            .iter()
            .rposition(|message| message.role == crate::core::message::ROLE_USER)
            .unwrap_or(context.messages.len());
        let history = to_chat_turns(&context.messages[..history_end]);

        debug!(url = %chatbot.url(), turns = history.len(), "Asking hosted chatbot");
        let answer = chatbot.ask(&question, &history).await?;
        Ok(answer_stream(&answer, context.message_id.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chat_stream::LanguageModel;
    use crate::core::ui_stream::{text_answer_events, UiStreamEvent};
    use crate::mcp::errors::TransportError;
    use crate::mcp::registry::ToolSessionConfig;
    use crate::mcp::transport::{ToolTransport, TransportConnector, TransportKind};
    use crate::tools::ToolDescriptor;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl LanguageModel for RecordingModel {
        fn label(&self) -> String {
            "fake/model".to_string()
        }

        fn stream(&self, request: ModelRequest) -> ChatStream {
            self.requests.lock().unwrap().push(request);
            answer_stream("ok", None)
        }
    }

    struct FakeResolver {
        model: Arc<RecordingModel>,
        selections: Mutex<Vec<(Option<String>, Option<String>)>>,
    }

    impl ModelResolver for FakeResolver {
        fn resolve(
            &self,
            provider: Option<&str>,
            model: Option<&str>,
        ) -> Result<Arc<dyn LanguageModel>, ProviderError> {
            self.selections
                .lock()
                .unwrap()
                .push((provider.map(str::to_string), model.map(str::to_string)));
            match provider {
                Some("missing") => Err(ProviderError::MissingCredential {
                    provider: "missing".to_string(),
                    env_var: "MISSING_KEY".to_string(),
                }),
                _ => Ok(self.model.clone()),
            }
        }
    }

    struct NoConnector;

    #[async_trait::async_trait]
    impl TransportConnector for NoConnector {
        async fn connect(
            &self,
            config: &ToolSessionConfig,
            _kind: TransportKind,
        ) -> Result<Box<dyn ToolTransport>, TransportError> {
            Err(TransportError::Request {
                url: config.url.clone(),
                message: "offline".to_string(),
            })
        }
    }

    fn dispatcher() -> (ChatDispatcher, Arc<RecordingModel>, Arc<FakeResolver>) {
        let model = Arc::new(RecordingModel::default());
        let resolver = Arc::new(FakeResolver {
            model: Arc::clone(&model),
            selections: Mutex::new(Vec::new()),
        });
        let manager = Arc::new(ToolSessionManager::new(Arc::new(NoConnector)));
        let dispatcher = ChatDispatcher::new(manager, resolver.clone());
        (dispatcher, model, resolver)
    }

    fn user_context(text: &str) -> ChatRequestContext {
        ChatRequestContext {
            messages: vec![UiMessage::text_message("user", text)],
            system_prompt: Some("Be helpful.".to_string()),
            ..ChatRequestContext::default()
        }
    }

    fn integrated(name: &str) -> ToolMap {
        let mut tools = ToolMap::new();
        tools.insert(
            name.to_string(),
            ToolDescriptor {
                description: None,
                parameters: json!({ "type": "object" }),
                executor: None,
            },
        );
        tools
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let (dispatcher, model, _) = dispatcher();
        let err = dispatcher
            .dispatch(ChatRequestContext::default())
            .await
            .err()
            .expect("empty history");
        assert!(matches!(err, DispatchError::InvalidRequest(_)));
        assert!(err.is_client_error());
        assert!(model.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forced_run_without_tools_keeps_prompt() {
        let (dispatcher, model, _) = dispatcher();
        let mut context = user_context("hi");
        context.force_tool_use = true;
        let events: Vec<UiStreamEvent> = dispatcher
            .dispatch(context)
            .await
            .expect("stream")
            .collect()
            .await;
        assert_eq!(events, text_answer_events("ok", None));

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].force_tool_use);
        assert_eq!(requests[0].system_prompt.as_deref(), Some("Be helpful."));
        assert_eq!(requests[0].max_steps, MAX_TOOL_STEPS);
    }

    #[tokio::test]
    async fn forced_run_names_every_tool() {
        let (dispatcher, model, _) = dispatcher();
        let dispatcher = dispatcher.with_integrated_tools(integrated("search"));
        let mut context = user_context("hi");
        context.force_tool_use = true;
        context.frontend_tools.insert(
            "pick_date".to_string(),
            FrontendTool {
                description: None,
                parameters: json!({ "type": "object" }),
            },
        );
        let _events = dispatcher.dispatch(context).await.expect("stream");

        let requests = model.requests.lock().unwrap();
        let prompt = requests[0].system_prompt.clone().expect("prompt");
        assert!(prompt.starts_with("Be helpful.\n\n"));
        assert!(prompt.ends_with("Available tools: pick_date, search."));
        assert!(requests[0].force_tool_use);
        assert_eq!(requests[0].tools.len(), 2);
    }

    #[tokio::test]
    async fn unforced_run_passes_prompt_through() {
        let (dispatcher, model, resolver) = dispatcher();
        let dispatcher = dispatcher
            .with_integrated_tools(integrated("search"))
            .with_default_system_prompt(Some("Default.".to_string()));
        let mut context = user_context("hi");
        context.system_prompt = None;
        context.provider = Some("openai".to_string());
        context.model = Some("gpt-4o".to_string());
        let _events = dispatcher.dispatch(context).await.expect("stream");

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].system_prompt.as_deref(), Some("Default."));
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(
            resolver.selections.lock().unwrap()[0],
            (Some("openai".to_string()), Some("gpt-4o".to_string()))
        );
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let (dispatcher, _, _) = dispatcher();
        let mut context = user_context("hi");
        context.provider = Some("missing".to_string());
        let err = dispatcher.dispatch(context).await.err().expect("error");
        assert!(matches!(
            err,
            DispatchError::Provider(ProviderError::MissingCredential { .. })
        ));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn chatbot_mode_requires_configuration_and_text() {
        let (dispatcher, _, _) = dispatcher();
        let mut context = user_context("hi");
        context.mode = ChatMode::Chatbot;
        assert!(matches!(
            dispatcher.dispatch(context).await.err(),
            Some(DispatchError::ChatbotUnavailable)
        ));

        let dispatcher = dispatcher.with_chatbot(Some(ChatbotClient::with_client(
            reqwest::Client::new(),
            "http://127.0.0.1:9/ask",
            None,
        )));
        let mut context = user_context("   ");
        context.mode = ChatMode::Chatbot;
        assert!(matches!(
            dispatcher.dispatch(context).await.err(),
            Some(DispatchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn augment_leaves_unforced_prompt_alone() {
        let tools = integrated("search");
        assert_eq!(
            augment_system_prompt(Some("p".to_string()), false, &tools).as_deref(),
            Some("p")
        );
        assert_eq!(augment_system_prompt(None, true, &ToolMap::new()), None);
        assert!(augment_system_prompt(None, true, &tools)
            .expect("instruction")
            .starts_with("You must call at least one"));
    }

    #[test]
    fn chat_mode_parses_lowercase() {
        let mode: ChatMode = serde_json::from_value(json!("chatbot")).unwrap();
        assert_eq!(mode, ChatMode::Chatbot);
        assert_eq!(ChatMode::default(), ChatMode::Llm);
    }
}
