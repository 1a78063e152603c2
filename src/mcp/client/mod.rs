//! Tool sessions and the manager that owns them.

use crate::mcp::errors::{SessionError, ToolCallError, TransportError};
use crate::mcp::registry::ToolSessionConfig;
use crate::mcp::transport::{HttpConnector, ToolTransport, TransportConnector, TransportKind};
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

mod operations;
pub mod protocol;

pub use operations::{call_tool, list_tools};
pub use protocol::ToolDefinition;

/// An opened connection to one tool server.
pub struct ToolSession {
    config: ToolSessionConfig,
    kind: TransportKind,
    transport: Box<dyn ToolTransport>,
    next_request_id: AtomicI64,
}

impl std::fmt::Debug for ToolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSession")
            .field("id", &self.config.id)
            .field("kind", &self.kind)
            .field("url", &self.config.url)
            .finish()
    }
}

impl ToolSession {
    pub fn new(config: ToolSessionConfig, transport: Box<dyn ToolTransport>) -> Self {
        Self {
            kind: transport.kind(),
            config,
            transport,
            next_request_id: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ToolSessionConfig {
        &self.config
    }

    /// The transport actually in use, which differs from the configured one
    /// after an SSE fallback.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub(crate) fn transport(&self) -> &dyn ToolTransport {
        self.transport.as_ref()
    }

    /// Correlation ids start at the session's creation time and only grow.
    pub fn next_request_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        list_tools(self).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolCallError> {
        call_tool(self, name, arguments).await
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegisterOptions {
    pub continue_on_error: bool,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
        }
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Arc<ToolSession>>,
    order: Vec<String>,
    default_id: Option<String>,
}

/// Owns every open tool session.
///
/// Mutations are admin-time operations. Request paths take a
/// [`ToolSessionManager::snapshot`] and work on that, so a concurrent removal
/// never invalidates an in-flight fan-out.
pub struct ToolSessionManager {
    connector: Arc<dyn TransportConnector>,
    registry: RwLock<Registry>,
}

impl ToolSessionManager {
    pub fn new(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            connector,
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn with_http() -> Result<Self, TransportError> {
        Ok(Self::new(Arc::new(HttpConnector::new()?)))
    }

    async fn open(&self, config: &ToolSessionConfig) -> Result<ToolSession, TransportError> {
        match self.connector.connect(config, config.transport).await {
            Ok(transport) => Ok(ToolSession::new(config.clone(), transport)),
            Err(http_err) if config.transport == TransportKind::Http && config.fallback_to_sse => {
                warn!(
                    server_id = %config.id,
                    error = %http_err,
                    "HTTP transport failed; retrying with SSE"
                );
                let sse_config = config.with_transport(TransportKind::Sse);
                let transport = self
                    .connector
                    .connect(&sse_config, TransportKind::Sse)
                    .await?;
                Ok(ToolSession::new(config.clone(), transport))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn register_session(&self, config: ToolSessionConfig) -> Result<(), SessionError> {
        if self.registry.read().await.sessions.contains_key(&config.id) {
            return Err(SessionError::DuplicateSession(config.id));
        }

        let session = self
            .open(&config)
            .await
            .map_err(|source| SessionError::Transport {
                id: config.id.clone(),
                source,
            })?;

        let mut registry = self.registry.write().await;
        if registry.sessions.contains_key(&config.id) {
            // Lost a race with a concurrent registration of the same id.
            drop(registry);
            if let Err(err) = session.close().await {
                warn!(server_id = %config.id, error = %err, "Failed to close duplicate session");
            }
            return Err(SessionError::DuplicateSession(config.id));
        }

        info!(
            server_id = %config.id,
            transport = %session.kind(),
            url = %config.url,
            "Registered tool session"
        );
        registry.order.push(config.id.clone());
        if config.is_default || registry.default_id.is_none() {
            registry.default_id = Some(config.id.clone());
        }
        registry.sessions.insert(config.id, Arc::new(session));
        Ok(())
    }

    pub async fn register_sessions(
        &self,
        configs: impl IntoIterator<Item = ToolSessionConfig>,
        options: RegisterOptions,
    ) -> Result<(), SessionError> {
        for config in configs {
            let id = config.id.clone();
            if let Err(err) = self.register_session(config).await {
                if !options.continue_on_error {
                    return Err(err);
                }
                warn!(server_id = %id, error = %err, "Skipping tool session");
            }
        }
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Option<Arc<ToolSession>> {
        self.registry.read().await.sessions.get(id).cloned()
    }

    pub async fn get_default_session(&self) -> Option<Arc<ToolSession>> {
        let registry = self.registry.read().await;
        registry
            .default_id
            .as_ref()
            .and_then(|id| registry.sessions.get(id))
            .cloned()
    }

    pub async fn set_default_session(&self, id: &str) -> Result<(), SessionError> {
        let mut registry = self.registry.write().await;
        if !registry.sessions.contains_key(id) {
            return Err(SessionError::UnknownSession(id.to_string()));
        }
        registry.default_id = Some(id.to_string());
        Ok(())
    }

    /// Removes a session, closing it best-effort. Returns whether it existed.
    pub async fn remove_session(&self, id: &str) -> bool {
        let removed = {
            let mut registry = self.registry.write().await;
            let removed = registry.sessions.remove(id);
            if removed.is_some() {
                registry.order.retain(|existing| existing != id);
                if registry.default_id.as_deref() == Some(id) {
                    registry.default_id = None;
                }
            }
            removed
        };

        match removed {
            Some(session) => {
                if let Err(err) = session.close().await {
                    warn!(server_id = %id, error = %err, "Failed to close tool session");
                }
                true
            }
            None => false,
        }
    }

    pub async fn list_session_ids(&self) -> Vec<String> {
        self.registry.read().await.order.clone()
    }

    /// Sessions in registration order.
    pub async fn snapshot(&self) -> Vec<Arc<ToolSession>> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.sessions.get(id).cloned())
            .collect()
    }

    /// Closes every session concurrently and clears the registry, even when
    /// some closes fail.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<ToolSession>> = {
            let mut registry = self.registry.write().await;
            registry.order.clear();
            registry.default_id = None;
            registry
                .sessions
                .drain()
                .map(|(_, session)| session)
                .collect()
        };

        let results = join_all(sessions.iter().map(|session| async move {
            (session.id().to_string(), session.close().await)
        }))
        .await;
        for (id, result) in results {
            if let Err(err) = result {
                warn!(server_id = %id, error = %err, "Failed to close tool session");
            }
        }
    }
}
