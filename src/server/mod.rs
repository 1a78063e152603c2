//! HTTP boundary: the chat endpoint streams UI events, errors become JSON.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::core::dispatch::{ChatDispatcher, ChatMode, ChatRequestContext, DispatchError};
use crate::core::message::UiMessage;
use crate::core::ui_stream::{
    event_stream_body, ChatStream, CACHE_CONTROL, CONNECTION, CONTENT_TYPE,
    UI_MESSAGE_STREAM_HEADER, UI_MESSAGE_STREAM_VERSION,
};
use crate::tools::FrontendTool;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ChatDispatcher>,
    /// Applied when a request does not say whether tool use is forced.
    pub force_tool_use_default: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    messages: Vec<UiMessage>,
    #[serde(default, alias = "system")]
    system_prompt: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tools: BTreeMap<String, FrontendTool>,
    #[serde(default)]
    force_tool_use: Option<bool>,
    #[serde(default)]
    mode: ChatMode,
    #[serde(default, alias = "id")]
    message_id: Option<String>,
}

impl ChatBody {
    fn into_context(self, force_tool_use_default: bool) -> ChatRequestContext {
        ChatRequestContext {
            messages: self.messages,
            system_prompt: self.system_prompt,
            provider: self.provider,
            model: self.model,
            frontend_tools: self.tools,
            force_tool_use: self.force_tool_use.unwrap_or(force_tool_use_default),
            mode: self.mode,
            message_id: self.message_id,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

pub fn title_for(status: StatusCode) -> &'static str {
    match status.as_u16() {
        500..=u16::MAX => "Internal server error",
        400..=499 => "Bad request",
        _ => "Error",
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        if err.is_client_error() {
            ApiError::bad_request(err.to_string())
        } else {
            ApiError::internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "Request failed");
        } else {
            warn!(status = %self.status, message = %self.message, "Request rejected");
        }
        let body = json!({
            "error": title_for(self.status),
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

pub fn stream_response(events: ChatStream) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, CACHE_CONTROL),
            (header::CONNECTION, CONNECTION),
            (
                HeaderName::from_static(UI_MESSAGE_STREAM_HEADER),
                UI_MESSAGE_STREAM_VERSION,
            ),
        ],
        Body::from_stream(event_stream_body(events)),
    )
        .into_response()
}

async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body: ChatBody = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("invalid chat request: {err}")))?;
    let context = body.into_context(state.force_tool_use_default);
    let events = state.dispatcher.dispatch(context).await?;
    Ok(stream_response(events))
}

async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools = state.dispatcher.resolve_tools(BTreeMap::new()).await;
    let sessions = state.dispatcher.manager().list_session_ids().await;
    let tools: Vec<Value> = tools
        .iter()
        .map(|(name, tool)| {
            json!({
                "name": name,
                "description": tool.description,
                "parameters": tool.parameters,
                "serverSide": tool.is_server_side(),
            })
        })
        .collect();
    Json(json!({ "sessions": sessions, "tools": tools }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/tools", get(list_tools))
        .route("/api/health", get(health))
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Listening for chat requests");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
