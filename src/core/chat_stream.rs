//! OpenAI-compatible `chat/completions` runtime with a server-side tool loop.
//!
//! Each run is a spawned task feeding UI stream events through a channel.
//! Dropping the returned stream cancels the task.

use futures_util::stream::{self, StreamExt};
use memchr::memchr;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ChatMessage, ChatRequest, ChatResponse, ChatToolCall, ChatToolDefinition};
use crate::core::message::{tool_output_text, ROLE_SYSTEM};
use crate::core::providers::ResolvedModel;
use crate::core::ui_stream::{ChatStream, FinishReason, UiStreamEvent};
use crate::tools::ToolMap;

pub const MAX_TOOL_STEPS: usize = 10;

/// Everything a model needs for one run.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub tools: ToolMap,
    pub max_steps: usize,
    pub force_tool_use: bool,
    pub message_id: Option<String>,
}

pub trait LanguageModel: Send + Sync {
    /// `provider/model`, for logs.
    fn label(&self) -> String;

    fn stream(&self, request: ModelRequest) -> ChatStream;
}

pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    resolved: ResolvedModel,
}

impl OpenAiCompatibleModel {
    pub fn new(client: reqwest::Client, resolved: ResolvedModel) -> Self {
        Self { client, resolved }
    }
}

impl LanguageModel for OpenAiCompatibleModel {
    fn label(&self) -> String {
        format!("{}/{}", self.resolved.provider_id, self.resolved.model)
    }

    fn stream(&self, request: ModelRequest) -> ChatStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let run = ToolLoop {
            client: self.client.clone(),
            resolved: self.resolved.clone(),
            tx,
        };

        let task_token = cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = run.run(request) => {}
                _ = task_token.cancelled() => {
                    debug!("Model run cancelled by client");
                }
            }
        });

        let guard = cancel_token.drop_guard();
        Box::pin(stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|event| (event, (rx, guard)))
        }))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn input(&self) -> Value {
        if self.arguments.trim().is_empty() {
            return json!({});
        }
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| Value::String(self.arguments.clone()))
    }

    fn to_api(&self) -> ChatToolCall {
        ChatToolCall::function(&self.id, &self.name, self.arguments.clone())
    }
}

/// Accumulated state of one streamed completion.
struct StepState {
    text_id: String,
    text: String,
    text_started: bool,
    tool_calls: BTreeMap<u32, PendingToolCall>,
    finish_reason: Option<String>,
}

impl StepState {
    fn new(text_id: String) -> Self {
        Self {
            text_id,
            text: String::new(),
            text_started: false,
            tool_calls: BTreeMap::new(),
            finish_reason: None,
        }
    }

    /// Returns `Ok(true)` once the stream is done.
    fn handle_data_payload(
        &mut self,
        payload: &str,
        tx: &mpsc::UnboundedSender<UiStreamEvent>,
    ) -> Result<bool, String> {
        if payload == "[DONE]" {
            return Ok(true);
        }

        let response = match serde_json::from_str::<ChatResponse>(payload) {
            Ok(response) => response,
            Err(_) if payload.trim().is_empty() => return Ok(false),
            Err(_) => return Err(format_api_error(payload)),
        };

        let Some(choice) = response.choices.into_iter().next() else {
            return Ok(false);
        };

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            if !self.text_started {
                self.text_started = true;
                let _ = tx.send(UiStreamEvent::TextStart {
                    id: self.text_id.clone(),
                });
            }
            self.text.push_str(&content);
            let _ = tx.send(UiStreamEvent::TextDelta {
                id: self.text_id.clone(),
                delta: content,
            });
        }

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let index = delta.index.unwrap_or(self.tool_calls.len() as u32);
            let pending = self.tool_calls.entry(index).or_default();
            if let Some(id) = delta.id {
                pending.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    pending.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    pending.arguments.push_str(&arguments);
                }
            }
        }

        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }
        Ok(false)
    }

    fn process_sse_line(
        &mut self,
        line: &str,
        tx: &mpsc::UnboundedSender<UiStreamEvent>,
    ) -> Result<bool, String> {
        match extract_data_payload(line) {
            Some(payload) => self.handle_data_payload(payload, tx),
            None => Ok(false),
        }
    }

    fn finish_text(&self, tx: &mpsc::UnboundedSender<UiStreamEvent>) {
        if self.text_started {
            let _ = tx.send(UiStreamEvent::TextEnd {
                id: self.text_id.clone(),
            });
        }
    }

    fn into_tool_calls(self) -> Vec<PendingToolCall> {
        self.tool_calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .enumerate()
            .map(|(position, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{position}");
                }
                call
            })
            .collect()
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Renders a provider error body as one plain-text line.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error: <empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<Value>(trimmed) {
        return match extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
            Some(summary) => format!("API Error: {summary}"),
            None => format!("API Error: {json_value}"),
        };
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("API Error: {collapsed}")
}

struct ToolLoop {
    client: reqwest::Client,
    resolved: ResolvedModel,
    tx: mpsc::UnboundedSender<UiStreamEvent>,
}

impl ToolLoop {
    fn emit(&self, event: UiStreamEvent) {
        let _ = self.tx.send(event);
    }

    async fn run(self, request: ModelRequest) {
        let ModelRequest {
            messages: history,
            system_prompt,
            tools,
            max_steps,
            force_tool_use,
            message_id,
        } = request;

        self.emit(UiStreamEvent::Start { message_id });

        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::text(ROLE_SYSTEM, prompt));
        }
        messages.extend(history);

        let definitions: Vec<ChatToolDefinition> = tools
            .iter()
            .map(|(name, tool)| {
                ChatToolDefinition::function(
                    name,
                    tool.description.clone(),
                    tool.parameters.clone(),
                )
            })
            .collect();

        let mut called_any_tool = false;
        let mut finish_reason = FinishReason::Stop;

        for step in 0..max_steps.max(1) {
            self.emit(UiStreamEvent::StartStep);
            let state = match self.complete(step, &messages, &definitions).await {
                Ok(state) => state,
                Err(error_text) => {
                    warn!(model = %self.resolved.model, "Model request failed");
                    self.emit(UiStreamEvent::Error { error_text });
                    self.emit(UiStreamEvent::FinishStep);
                    self.emit(UiStreamEvent::Finish {
                        finish_reason: FinishReason::Error,
                    });
                    return;
                }
            };

            let text = state.text.clone();
            let stop_reason = state.finish_reason.clone();
            let calls = state.into_tool_calls();
            if calls.is_empty() {
                self.emit(UiStreamEvent::FinishStep);
                finish_reason = match stop_reason.as_deref() {
                    Some("length") => FinishReason::Length,
                    _ => FinishReason::Stop,
                };
                break;
            }

            called_any_tool = true;
            messages.push(ChatMessage::assistant_tool_calls(
                Some(text).filter(|t| !t.is_empty()),
                calls.iter().map(PendingToolCall::to_api).collect(),
            ));

            let mut handed_to_client = false;
            for call in &calls {
                let input = call.input();
                self.emit(UiStreamEvent::ToolInputAvailable {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: input.clone(),
                });

                let Some(tool) = tools.get(&call.name) else {
                    let error_text = format!("Unknown tool '{}'", call.name);
                    self.emit(UiStreamEvent::ToolOutputError {
                        tool_call_id: call.id.clone(),
                        error_text: error_text.clone(),
                    });
                    messages.push(ChatMessage::tool_result(&call.id, error_text));
                    continue;
                };

                match tool.execute(input).await {
                    None => handed_to_client = true,
                    Some(Ok(output)) => {
                        messages.push(ChatMessage::tool_result(
                            &call.id,
                            tool_output_text(&output),
                        ));
                        self.emit(UiStreamEvent::ToolOutputAvailable {
                            tool_call_id: call.id.clone(),
                            output,
                        });
                    }
                    Some(Err(err)) => {
                        warn!(tool = %call.name, error = %err, "Tool call failed");
                        let error_text = err.to_string();
                        messages.push(ChatMessage::tool_result(
                            &call.id,
                            format!("Error: {error_text}"),
                        ));
                        self.emit(UiStreamEvent::ToolOutputError {
                            tool_call_id: call.id.clone(),
                            error_text,
                        });
                    }
                }
            }

            self.emit(UiStreamEvent::FinishStep);
            finish_reason = FinishReason::ToolCalls;
            if handed_to_client {
                break;
            }
        }

        if force_tool_use && !called_any_tool {
            warn!(
                model = %self.resolved.model,
                "Tool use was required but the model answered without calling a tool"
            );
        }
        self.emit(UiStreamEvent::Finish { finish_reason });
    }

    async fn complete(
        &self,
        step: usize,
        messages: &[ChatMessage],
        tools: &[ChatToolDefinition],
    ) -> Result<StepState, String> {
        let request = ChatRequest {
            model: self.resolved.model.clone(),
            messages: messages.to_vec(),
            stream: true,
            tools: (!tools.is_empty()).then(|| tools.to_vec()),
        };

        let http_request = self
            .client
            .post(self.resolved.endpoint_url("chat/completions"))
            .header("Content-Type", "application/json");
        let response = self
            .resolved
            .authorize(http_request)
            .json(&request)
            .send()
            .await
            .map_err(|err| format_api_error(&err.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(format_api_error(&error_text));
        }

        let mut state = StepState::new(format!("text-{step}"));
        let read = self.read_stream(response, &mut state).await;
        state.finish_text(&self.tx);
        read.map(|()| state)
    }

    async fn read_stream(
        &self,
        response: reqwest::Response,
        state: &mut StepState,
    ) -> Result<(), String> {
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| format_api_error(&err.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = memchr(b'\n', &buffer) {
                let line = match std::str::from_utf8(&buffer[..newline_pos]) {
                    Ok(line) => line.trim().to_string(),
                    Err(err) => {
                        debug!(error = %err, "Invalid UTF-8 in model stream");
                        buffer.drain(..=newline_pos);
                        continue;
                    }
                };
                buffer.drain(..=newline_pos);
                if state.process_sse_line(&line, &self.tx)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
