//! JSON-RPC envelopes exchanged with tool servers and the body
//! normalization shared by listing and calling.

use crate::mcp::transport::streamable_http::{is_event_stream_content_type, sse_data_payload};
use rust_mcp_schema::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

pub const JSONRPC_VERSION: &str = "2.0";
pub const INITIALIZE_METHOD: &str = "initialize";
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";
pub const TOOLS_LIST_METHOD: &str = "tools/list";
pub const TOOLS_CALL_METHOD: &str = "tools/call";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: Option<Value>, id: i64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(id),
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: None,
            id: None,
        }
    }

    pub fn list_tools(id: i64) -> Self {
        Self::new(TOOLS_LIST_METHOD, Some(json!({})), id)
    }

    pub fn call_tool(id: i64, name: &str, arguments: Value) -> Self {
        Self::new(
            TOOLS_CALL_METHOD,
            Some(json!({ "name": name, "arguments": arguments })),
            id,
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Option<Value>,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// A tool as advertised by a server's `tools/list` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        rename = "inputSchema",
        alias = "input_schema",
        alias = "parameters",
        default = "empty_object_schema"
    )]
    pub input_schema: Value,
}

/// A response body reduced to at most one JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyFrame {
    Empty,
    Json(Value),
    ParseFailed(String),
}

fn looks_like_event_stream(body: &str) -> bool {
    body.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("event:") || line.starts_with("data:")
    })
}

/// Reduces a raw JSON or SSE body to a single JSON frame.
///
/// SSE is detected by content type or by `event:`/`data:` markers in the
/// body; the first non-empty `data:` payload is decoded and the rest ignored.
pub fn normalize_body(content_type: Option<&str>, body: &str) -> BodyFrame {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return BodyFrame::Empty;
    }

    let is_sse = content_type.is_some_and(is_event_stream_content_type)
        || looks_like_event_stream(trimmed);
    if !is_sse {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => BodyFrame::Json(value),
            Err(err) => BodyFrame::ParseFailed(err.to_string()),
        };
    }

    let payload = trimmed
        .lines()
        .filter_map(|line| sse_data_payload(line.trim_start()))
        .find(|payload| !payload.is_empty());
    match payload {
        Some(payload) => match serde_json::from_str::<Value>(payload) {
            Ok(value) => BodyFrame::Json(value),
            Err(err) => BodyFrame::ParseFailed(err.to_string()),
        },
        None => BodyFrame::ParseFailed("event stream contained no data frame".to_string()),
    }
}

pub fn parse_envelope(value: Value) -> Result<JsonRpcResponse, String> {
    serde_json::from_value::<JsonRpcResponse>(value).map_err(|err| err.to_string())
}

/// Accepts either a bare array of tools or an object with a `tools` array.
/// Returns `None` for any other shape.
pub fn extract_tool_list(result: &Value) -> Option<Vec<ToolDefinition>> {
    let entries = match result {
        Value::Array(entries) => entries,
        Value::Object(map) => map.get("tools")?.as_array()?,
        _ => return None,
    };

    let tools = entries
        .iter()
        .filter_map(|entry| match ToolDefinition::deserialize(entry) {
            Ok(tool) => Some(tool),
            Err(err) => {
                warn!(error = %err, "Skipping malformed tool definition");
                None
            }
        })
        .collect();
    Some(tools)
}

/// Unwraps a nested `result.result` one level; anything else passes through.
pub fn unwrap_call_result(result: Option<Value>) -> Value {
    match result {
        Some(Value::Object(mut map)) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        Some(value) => value,
        None => Value::Null,
    }
}

pub fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}
