//! HTTP plumbing shared by both tool-server transports.

use super::{
    ToolTransport, MCP_JSON_AND_SSE_ACCEPT, MCP_JSON_CONTENT_TYPE, MCP_PROTOCOL_VERSION_HEADER,
    MCP_SESSION_ID_HEADER,
};
use crate::mcp::client::protocol::{
    self, BodyFrame, JsonRpcRequest, INITIALIZED_NOTIFICATION, INITIALIZE_METHOD,
};
use crate::mcp::errors::TransportError;
use crate::mcp::registry::ToolSessionConfig;
use rust_mcp_schema::{
    ClientCapabilities, Implementation, InitializeRequestParams, LATEST_PROTOCOL_VERSION,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub fn apply_streamable_http_client_post_headers(
    request: reqwest::RequestBuilder,
) -> reqwest::RequestBuilder {
    request
        .header("Content-Type", MCP_JSON_CONTENT_TYPE)
        .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
}

pub fn apply_streamable_http_protocol_version_header(
    request: reqwest::RequestBuilder,
    protocol_version: Option<&str>,
) -> reqwest::RequestBuilder {
    match protocol_version {
        Some(protocol_version) if !protocol_version.trim().is_empty() => {
            request.header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
        }
        _ => request,
    }
}

#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            let line_bytes = &self.buffer[search_index..line_end];
            if let Ok(text) = std::str::from_utf8(line_bytes) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }

            search_index = newline_index + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..]) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

pub fn response_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

struct ChannelState {
    session_id: Option<String>,
    protocol_version: Option<String>,
}

/// A POST endpoint plus the per-server headers negotiated during the handshake.
pub struct HttpChannel {
    client: reqwest::Client,
    url: String,
    headers: BTreeMap<String, String>,
    state: Mutex<ChannelState>,
}

impl HttpChannel {
    pub fn new(client: reqwest::Client, config: &ToolSessionConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            headers: config.headers.clone(),
            state: Mutex::new(ChannelState {
                session_id: None,
                protocol_version: Some(LATEST_PROTOCOL_VERSION.to_string()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_state().session_id.clone()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.lock_state().protocol_version.clone()
    }

    pub fn set_protocol_version(&self, protocol_version: String) {
        self.lock_state().protocol_version = Some(protocol_version);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_session_headers(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let state = self.lock_state();
        request = apply_streamable_http_protocol_version_header(
            request,
            state.protocol_version.as_deref(),
        );
        if let Some(session_id) = &state.session_id {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }
        request
    }

    pub fn request_error(&self, err: impl std::fmt::Display) -> TransportError {
        TransportError::Request {
            url: self.url.clone(),
            message: err.to_string(),
        }
    }

    /// Sends one envelope and records any server-assigned session id.
    pub async fn send(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<reqwest::Response, TransportError> {
        let payload = serde_json::to_string(request).map_err(|err| self.request_error(err))?;
        debug!(
            url = %self.url,
            method = %request.method,
            id = ?request.id,
            "Sending MCP HTTP request"
        );
        let http_request = self
            .apply_session_headers(apply_streamable_http_client_post_headers(
                self.client.post(&self.url),
            ))
            .body(payload);

        let response = http_request
            .send()
            .await
            .map_err(|err| self.request_error(err))?;

        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
        {
            self.lock_state().session_id = Some(session_id);
        }

        Ok(response)
    }

    /// Ends the server-side session, if the server assigned one.
    pub async fn terminate(&self) -> Result<(), TransportError> {
        if self.session_id().is_none() {
            return Ok(());
        }
        let request = self.apply_session_headers(self.client.delete(&self.url));
        let response = request.send().await.map_err(|err| self.request_error(err))?;
        let status = response.status();
        // 405 means the server does not support explicit termination.
        if status.is_success() || status == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(self.request_error(format!("HTTP error: {status}")))
        }
    }
}

pub fn client_details() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "switchboard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Switchboard MCP Client".to_string()),
            description: Some("Switchboard tool session runtime".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

/// Runs the MCP `initialize` handshake over `transport`, then sends the
/// `notifications/initialized` notification.
pub async fn initialize_session(
    transport: &dyn ToolTransport,
    channel: &HttpChannel,
) -> Result<(), TransportError> {
    let handshake_error = |message: String| TransportError::Handshake {
        url: channel.url().to_string(),
        message,
    };

    let params = serde_json::to_value(client_details())
        .map_err(|err| handshake_error(err.to_string()))?;
    let request = JsonRpcRequest::new(INITIALIZE_METHOD, Some(params), 0);
    let response = transport.post(&request).await?;
    if !response.is_success() {
        return Err(handshake_error(format!(
            "HTTP {}: {}",
            response.status,
            response.body.trim()
        )));
    }

    let value = match protocol::normalize_body(response.content_type.as_deref(), &response.body) {
        BodyFrame::Json(value) => value,
        BodyFrame::Empty => return Err(handshake_error("empty initialize response".to_string())),
        BodyFrame::ParseFailed(err) => return Err(handshake_error(err)),
    };
    let envelope = protocol::parse_envelope(value).map_err(handshake_error)?;
    if let Some(error) = envelope.error.as_ref() {
        return Err(handshake_error(protocol::format_rpc_error(error)));
    }

    let protocol_version = envelope
        .result
        .as_ref()
        .and_then(|result| result.get("protocolVersion"))
        .and_then(|version| version.as_str())
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| handshake_error("Unexpected initialize response.".to_string()))?;
    channel.set_protocol_version(protocol_version.to_string());

    let notification = JsonRpcRequest::notification(INITIALIZED_NOTIFICATION);
    let response = transport.post(&notification).await?;
    if !response.is_success() {
        return Err(handshake_error(format!("HTTP error: {}", response.status)));
    }
    debug!(url = %channel.url(), protocol_version = %protocol_version, "MCP session initialized");
    Ok(())
}
