use thiserror::Error;

/// Failures raised while opening or talking to a tool server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("handshake with {url} was rejected: {message}")]
    Handshake { url: String, message: String },
}

/// Registry-level failures of the tool session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("tool session '{0}' is already registered")]
    DuplicateSession(String),
    #[error("unknown tool session '{0}'")]
    UnknownSession(String),
    #[error("failed to open tool session '{id}': {source}")]
    Transport {
        id: String,
        #[source]
        source: TransportError,
    },
}

/// Failures of a single tool invocation. Unlike catalog listing, these are
/// surfaced to the caller so the model learns that the tool did not run.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("tool server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse tool server response: {0}")]
    Parse(String),
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
    #[error("chatbot tool failed: {0}")]
    Chatbot(String),
}
