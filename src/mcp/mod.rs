//! Remote tool servers spoken to over MCP (JSON-RPC 2.0 on HTTP or SSE).

pub mod client;
pub mod errors;
pub mod registry;
pub mod transport;

pub use client::{RegisterOptions, ToolDefinition, ToolSession, ToolSessionManager};
pub use errors::{SessionError, ToolCallError, TransportError};
pub use registry::{McpRegistry, ToolSessionConfig};
