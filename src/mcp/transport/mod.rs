//! Tool-server transport abstractions.
//!
//! Both transports POST JSON-RPC envelopes to the configured URL and differ
//! only in how they read the response: the streamable-HTTP transport buffers
//! the whole body, the SSE transport consumes the body as an event stream and
//! stops at the first response frame. Either way the caller receives a raw
//! [`TransportResponse`] that the protocol layer normalizes.

use crate::mcp::client::protocol::JsonRpcRequest;
use crate::mcp::errors::TransportError;
use crate::mcp::registry::ToolSessionConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub mod http;
pub mod sse;
pub mod streamable_http;

pub use http::HttpTransport;
pub use sse::SseTransport;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

const MCP_HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const MCP_HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const MCP_HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

/// Supported tool-server transports.
///
/// - [`TransportKind::Http`] for streamable HTTP request/response servers.
/// - [`TransportKind::Sse`] for servers that answer with Server-Sent Events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Sse,
}

impl TransportKind {
    /// Resolves a configured transport name, defaulting to streamable HTTP.
    pub fn parse(value: Option<&str>) -> Result<Self, String> {
        let transport = value.unwrap_or("http").trim().to_ascii_lowercase();
        match transport.as_str() {
            "http" | "streamable-http" | "streamable_http" => Ok(TransportKind::Http),
            "sse" => Ok(TransportKind::Sse),
            other => Err(format!("Unsupported MCP transport: {}", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw response as seen by a transport, before any JSON-RPC interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
/// An open connection to one tool server.
///
/// Implementations are trait objects so that callers can wrap them (for
/// example with a retry decorator) without touching the session manager.
pub trait ToolTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn post(&self, request: &JsonRpcRequest) -> Result<TransportResponse, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
/// Opens transports for session configs. Failures propagate to the manager.
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        config: &ToolSessionConfig,
        kind: TransportKind,
    ) -> Result<Box<dyn ToolTransport>, TransportError>;
}

pub fn build_mcp_http_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(MCP_HTTP_CONNECT_TIMEOUT_SECONDS))
        .timeout(Duration::from_secs(MCP_HTTP_REQUEST_TIMEOUT_SECONDS))
        .pool_idle_timeout(Duration::from_secs(MCP_HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(MCP_HTTP_POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(|err| TransportError::Client(err.to_string()))
}

/// Connector backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            client: build_mcp_http_client()?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransportConnector for HttpConnector {
    async fn connect(
        &self,
        config: &ToolSessionConfig,
        kind: TransportKind,
    ) -> Result<Box<dyn ToolTransport>, TransportError> {
        debug!(
            server_id = %config.id,
            url = %config.url,
            transport = %kind,
            "Opening MCP transport"
        );
        match kind {
            TransportKind::Http => Ok(Box::new(
                HttpTransport::connect(self.client.clone(), config).await?,
            )),
            TransportKind::Sse => Ok(Box::new(
                SseTransport::connect(self.client.clone(), config).await?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_names_resolve_with_http_default() {
        assert_eq!(TransportKind::parse(None), Ok(TransportKind::Http));
        assert_eq!(
            TransportKind::parse(Some("Streamable-HTTP")),
            Ok(TransportKind::Http)
        );
        assert_eq!(TransportKind::parse(Some(" sse ")), Ok(TransportKind::Sse));
        assert_eq!(
            TransportKind::parse(Some("stdio")),
            Err("Unsupported MCP transport: stdio".to_string())
        );
    }

    #[test]
    fn success_covers_only_2xx() {
        let mut response = TransportResponse {
            status: 204,
            content_type: None,
            body: String::new(),
        };
        assert!(response.is_success());
        response.status = 302;
        assert!(!response.is_success());
        response.status = 500;
        assert!(!response.is_success());
    }
}
