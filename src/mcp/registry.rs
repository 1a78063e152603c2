use crate::core::config::data::{expand_env_placeholders, Config, McpServerConfig};
use crate::core::config::io::ConfigError;
use crate::mcp::transport::TransportKind;
use std::collections::BTreeMap;

/// Everything needed to open one tool session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSessionConfig {
    pub id: String,
    pub transport: TransportKind,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub is_default: bool,
    pub fallback_to_sse: bool,
}

impl ToolSessionConfig {
    pub fn new(id: impl Into<String>, transport: TransportKind, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transport,
            url: url.into(),
            headers: BTreeMap::new(),
            is_default: false,
            fallback_to_sse: false,
        }
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn with_fallback(mut self, fallback_to_sse: bool) -> Self {
        self.fallback_to_sse = fallback_to_sse;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Same id, url and headers over a different transport.
    pub fn with_transport(&self, transport: TransportKind) -> Self {
        Self {
            transport,
            ..self.clone()
        }
    }

    pub fn from_server_config<F>(server: &McpServerConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let transport = TransportKind::parse(server.transport.as_deref()).map_err(|message| {
            ConfigError::UnknownTransport {
                server: server.id.clone(),
                message,
            }
        })?;

        let mut headers = BTreeMap::new();
        for (name, value) in server.headers.iter().flatten() {
            let expanded = expand_env_placeholders(value, &lookup).map_err(|var| {
                ConfigError::MissingEnv {
                    server: server.id.clone(),
                    var,
                }
            })?;
            headers.insert(name.clone(), expanded);
        }

        Ok(Self {
            id: server.id.clone(),
            transport,
            url: server.url.clone(),
            headers,
            is_default: server.is_default(),
            fallback_to_sse: transport == TransportKind::Http && server.falls_back_to_sse(),
        })
    }
}

/// Enabled tool servers from configuration, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct McpRegistry {
    sessions: Vec<ToolSessionConfig>,
}

impl McpRegistry {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::from_config_with(config, |name| std::env::var(name).ok())
    }

    pub fn from_config_with<F>(config: &Config, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sessions = config
            .enabled_mcp_servers()
            .map(|server| ToolSessionConfig::from_server_config(server, &lookup))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sessions })
    }

    pub fn into_sessions(self) -> Vec<ToolSessionConfig> {
        self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str, transport: Option<&str>) -> McpServerConfig {
        McpServerConfig {
            id: id.to_string(),
            url: format!("https://{id}.example.com/mcp"),
            transport: transport.map(str::to_string),
            fallback: None,
            default: None,
            enabled: None,
            headers: None,
        }
    }

    #[test]
    fn registry_keeps_enabled_servers_in_order() {
        let mut disabled = server("beta", None);
        disabled.enabled = Some(false);
        let config = Config {
            mcp_servers: vec![server("alpha", None), disabled, server("gamma", Some("sse"))],
            ..Config::default()
        };

        let sessions = McpRegistry::from_config_with(&config, |_| None)
            .expect("registry")
            .into_sessions();
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "gamma"]);

        let (alpha, gamma) = (&sessions[0], &sessions[1]);
        assert_eq!(alpha.transport, TransportKind::Http);
        assert!(alpha.fallback_to_sse);
        assert_eq!(gamma.transport, TransportKind::Sse);
        assert!(!gamma.fallback_to_sse);
    }

    #[test]
    fn headers_expand_environment_placeholders() {
        let mut alpha = server("alpha", Some("streamable-http"));
        alpha.headers = Some(BTreeMap::from([(
            "Authorization".to_string(),
            "Bearer ${ALPHA_TOKEN}".to_string(),
        )]));
        let config = Config {
            mcp_servers: vec![alpha],
            ..Config::default()
        };

        let sessions = McpRegistry::from_config_with(&config, |name| {
            (name == "ALPHA_TOKEN").then(|| "secret".to_string())
        })
        .expect("registry")
        .into_sessions();
        assert_eq!(
            sessions[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer secret")
        );

        let err = McpRegistry::from_config_with(&config, |_| None).expect_err("missing env");
        match err {
            ConfigError::MissingEnv { server, var } => {
                assert_eq!(server, "alpha");
                assert_eq!(var, "ALPHA_TOKEN");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_transport_is_a_config_error() {
        let config = Config {
            mcp_servers: vec![server("alpha", Some("stdio"))],
            ..Config::default()
        };
        let err = McpRegistry::from_config_with(&config, |_| None).expect_err("stdio rejected");
        assert!(matches!(err, ConfigError::UnknownTransport { .. }));
    }
}
