//! Merging tool catalogs from every origin into one request-scoped map.
//!
//! Precedence, lowest to highest: frontend tools, integrated tools, then tool
//! sessions in registration order. A later source replaces an earlier tool of
//! the same name.

use crate::mcp::client::{ToolDefinition, ToolSession, ToolSessionManager};
use crate::mcp::errors::ToolCallError;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

pub mod chatbot_bridge;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolCallError>> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A tool ready to hand to the model runtime.
///
/// `executor` is `None` for frontend tools: the runtime cannot run those and
/// hands the call back to the client instead.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub description: Option<String>,
    pub parameters: Value,
    pub executor: Option<ToolExecutor>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("server_side", &self.executor.is_some())
            .finish()
    }
}

impl ToolDescriptor {
    pub fn is_server_side(&self) -> bool {
        self.executor.is_some()
    }

    pub async fn execute(&self, arguments: Value) -> Option<Result<Value, ToolCallError>> {
        match &self.executor {
            Some(executor) => Some(executor(arguments).await),
            None => None,
        }
    }
}

pub type ToolMap = BTreeMap<String, ToolDescriptor>;

/// A tool declared by the calling client. It has no server-side executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendTool {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_parameters", alias = "inputSchema")]
    pub parameters: Value,
}

fn default_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl From<FrontendTool> for ToolDescriptor {
    fn from(tool: FrontendTool) -> Self {
        Self {
            description: tool.description,
            parameters: tool.parameters,
            executor: None,
        }
    }
}

/// Best-effort local check of `arguments` against `schema`.
///
/// The remote server stays the authority on argument validity, so the result
/// is only ever logged.
pub fn lint_arguments(schema: &Value, arguments: &Value) -> Vec<String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(err) => {
            debug!(error = %err, "Tool schema is not a valid JSON Schema");
            return Vec::new();
        }
    };
    validator
        .iter_errors(arguments)
        .map(|err| err.to_string())
        .collect()
}

/// Wraps a catalog entry so that invoking it calls the tool on `session`.
pub fn adapt_tool_definition(
    session: Arc<ToolSession>,
    definition: ToolDefinition,
) -> ToolDescriptor {
    let name = definition.name.clone();
    let schema = definition.input_schema.clone();
    let executor: ToolExecutor = Arc::new(move |arguments: Value| {
        let session = Arc::clone(&session);
        let name = name.clone();
        let problems = lint_arguments(&schema, &arguments);
        Box::pin(async move {
            if !problems.is_empty() {
                debug!(
                    server_id = %session.id(),
                    tool = %name,
                    problems = ?problems,
                    "Tool arguments do not match the advertised schema"
                );
            }
            session.call_tool(&name, arguments).await
        })
    });

    ToolDescriptor {
        description: definition.description,
        parameters: definition.input_schema,
        executor: Some(executor),
    }
}

/// Adapted catalog of one session; empty when the catalog cannot be fetched.
pub async fn get_session_tools(session: Arc<ToolSession>) -> ToolMap {
    session
        .list_tools()
        .await
        .into_iter()
        .map(|definition| {
            (
                definition.name.clone(),
                adapt_tool_definition(Arc::clone(&session), definition),
            )
        })
        .collect()
}

/// Integrated tools first, then every session's catalog in registration order.
///
/// Catalogs are fetched concurrently from a snapshot of the registry and
/// merged in order afterwards, so the outcome does not depend on which
/// server answers first.
pub async fn get_all_tools(manager: &ToolSessionManager, integrated: &ToolMap) -> ToolMap {
    let mut merged = integrated.clone();
    let sessions = manager.snapshot().await;
    let catalogs = join_all(sessions.into_iter().map(get_session_tools)).await;
    for catalog in catalogs {
        merged.extend(catalog);
    }
    merged
}

/// Frontend tools first, then `mcp_tools` on top.
pub fn merge_all_tools(frontend: BTreeMap<String, FrontendTool>, mcp_tools: ToolMap) -> ToolMap {
    let mut merged: ToolMap = frontend
        .into_iter()
        .map(|(name, tool)| (name, ToolDescriptor::from(tool)))
        .collect();
    merged.extend(mcp_tools);
    merged
}
