//! Built-in provider table, embedded from `builtin_providers.toml`.

use crate::core::providers::{AuthMode, ProviderMetadata};
use serde::Deserialize;

const BUILTIN_PROVIDERS: &str = include_str!("../builtin_providers.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct BuiltinProvider {
    pub id: String,
    pub base_url: String,
    /// `anthropic` for `x-api-key` auth; bearer auth otherwise.
    pub mode: Option<String>,
    pub api_key_env: String,
    pub default_model: String,
}

#[derive(Debug, Deserialize)]
struct BuiltinProviderTable {
    providers: Vec<BuiltinProvider>,
}

impl From<BuiltinProvider> for ProviderMetadata {
    fn from(builtin: BuiltinProvider) -> Self {
        Self {
            auth_mode: AuthMode::from_mode(builtin.mode.as_deref()),
            id: builtin.id,
            base_url: builtin.base_url,
            api_key_env: Some(builtin.api_key_env),
            default_model: Some(builtin.default_model),
        }
    }
}

pub fn load_builtin_providers() -> Vec<BuiltinProvider> {
    let table: BuiltinProviderTable =
        toml::from_str(BUILTIN_PROVIDERS).expect("builtin_providers.toml is valid");
    table.providers
}
