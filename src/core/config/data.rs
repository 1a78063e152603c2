use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8787";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CustomProvider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub mode: Option<String>,
    /// Environment variable holding the API key for this provider.
    pub api_key_env: Option<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ServerConfig {
    pub bind: Option<String>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatbotConfig {
    pub url: String,
    pub api_key_env: Option<String>,
    /// Also expose the chatbot to the LLM as the `ask_chatbot` tool.
    pub expose_as_tool: Option<bool>,
}

impl ChatbotConfig {
    pub fn exposes_tool(&self) -> bool {
        self.expose_as_tool.unwrap_or(false)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct McpServerConfig {
    pub id: String,
    pub url: String,
    pub transport: Option<String>,
    /// Retry with SSE when the HTTP handshake fails. Defaults to true.
    pub fallback: Option<bool>,
    pub default: Option<bool>,
    pub enabled: Option<bool>,
    /// Extra request headers. Values may reference `${VAR}` environment variables.
    pub headers: Option<BTreeMap<String, String>>,
}

impl McpServerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn falls_back_to_sse(&self) -> bool {
        self.fallback.unwrap_or(true)
    }

    pub fn is_default(&self) -> bool {
        self.default.unwrap_or(false)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    pub default_provider: Option<String>,
    /// Deployment default for forcing at least one tool call.
    pub force_tool_use: Option<bool>,
    pub system_prompt: Option<String>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub server: ServerConfig,
    pub chatbot: Option<ChatbotConfig>,
    #[serde(default)]
    pub default_models: HashMap<String, String>,
    #[serde(default)]
    pub custom_providers: Vec<CustomProvider>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Config {
    pub fn enabled_mcp_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.mcp_servers.iter().filter(|server| server.is_enabled())
    }
}

/// Expands `${VAR}` placeholders using `lookup`.
///
/// Returns the name of the first variable that `lookup` cannot resolve.
/// An unterminated `${` is kept literally.
pub fn expand_env_placeholders<F>(value: &str, lookup: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            return Ok(output);
        };
        let name = after[..end].trim();
        match lookup(name) {
            Some(resolved) => output.push_str(&resolved),
            None => return Err(name.to_string()),
        }
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}
