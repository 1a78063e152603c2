use super::protocol::{
    extract_tool_list, format_rpc_error, normalize_body, parse_envelope, unwrap_call_result,
    BodyFrame, JsonRpcRequest, ToolDefinition,
};
use super::ToolSession;
use crate::mcp::errors::ToolCallError;
use serde_json::Value;
use tracing::{debug, warn};

/// Fetches a session's catalog. Every failure is logged and collapses to an
/// empty list so one broken server cannot break the whole resolution.
pub async fn list_tools(session: &ToolSession) -> Vec<ToolDefinition> {
    let server_id = session.id();
    let request = JsonRpcRequest::list_tools(session.next_request_id());
    let response = match session.transport().post(&request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(server_id = %server_id, error = %err, "tools/list request failed");
            return Vec::new();
        }
    };

    if !response.is_success() {
        warn!(
            server_id = %server_id,
            status = response.status,
            body = %response.body.trim(),
            "tools/list returned an error status"
        );
        return Vec::new();
    }

    let value = match normalize_body(response.content_type.as_deref(), &response.body) {
        BodyFrame::Empty => {
            debug!(server_id = %server_id, "tools/list returned an empty body");
            return Vec::new();
        }
        BodyFrame::ParseFailed(err) => {
            warn!(server_id = %server_id, error = %err, "Failed to parse tools/list response");
            return Vec::new();
        }
        BodyFrame::Json(value) => value,
    };

    let envelope = match parse_envelope(value) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(server_id = %server_id, error = %err, "Malformed tools/list envelope");
            return Vec::new();
        }
    };
    if let Some(error) = envelope.error.as_ref() {
        warn!(server_id = %server_id, error = %format_rpc_error(error), "tools/list was rejected");
        return Vec::new();
    }

    let Some(result) = envelope.result else {
        warn!(server_id = %server_id, "tools/list response carried no result");
        return Vec::new();
    };
    match extract_tool_list(&result) {
        Some(tools) => {
            debug!(server_id = %server_id, count = tools.len(), "Resolved tool catalog");
            tools
        }
        None => {
            warn!(server_id = %server_id, "Unexpected tools/list result shape");
            Vec::new()
        }
    }
}

/// Invokes one tool. Unlike listing, every failure is returned.
pub async fn call_tool(
    session: &ToolSession,
    name: &str,
    arguments: Value,
) -> Result<Value, ToolCallError> {
    let request = JsonRpcRequest::call_tool(session.next_request_id(), name, arguments);
    debug!(server_id = %session.id(), tool = %name, id = ?request.id, "Calling MCP tool");
    let response = session.transport().post(&request).await?;

    if !response.is_success() {
        return Err(ToolCallError::Status {
            status: response.status,
            body: response.body.trim().to_string(),
        });
    }

    let value = match normalize_body(response.content_type.as_deref(), &response.body) {
        BodyFrame::Json(value) => value,
        // An empty 2xx body carries no result at all.
        BodyFrame::Empty => return Ok(Value::Null),
        BodyFrame::ParseFailed(err) => return Err(ToolCallError::Parse(err)),
    };

    let envelope = parse_envelope(value).map_err(ToolCallError::Parse)?;
    if let Some(error) = envelope.error {
        return Err(ToolCallError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    Ok(unwrap_call_result(envelope.result))
}
