use crate::core::builtin_providers::load_builtin_providers;
use crate::core::chat_stream::{LanguageModel, OpenAiCompatibleModel};
use crate::core::config::data::CustomProvider;
use crate::core::config::Config;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

const FALLBACK_PROVIDER: &str = "openai";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no API key for provider '{provider}': set the {env_var} environment variable")]
    MissingCredential { provider: String, env_var: String },
    #[error("provider '{provider}' does not name an API key environment variable (api_key_env)")]
    MissingEnv { provider: String },
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("no model configured for provider '{0}'")]
    MissingModel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    OpenAi,
    Anthropic,
}

impl AuthMode {
    pub(crate) fn from_mode(mode: Option<&str>) -> Self {
        match mode {
            Some(mode) if mode.eq_ignore_ascii_case("anthropic") => AuthMode::Anthropic,
            _ => AuthMode::OpenAi,
        }
    }

    /// Anthropic takes `x-api-key` plus a version header; everyone else a bearer token.
    pub fn apply(
        self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        match self {
            AuthMode::Anthropic => request
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            AuthMode::OpenAi => request.header("Authorization", format!("Bearer {api_key}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub id: String,
    pub base_url: String,
    pub auth_mode: AuthMode,
    pub api_key_env: Option<String>,
    pub default_model: Option<String>,
}

impl From<&CustomProvider> for ProviderMetadata {
    fn from(custom: &CustomProvider) -> Self {
        Self {
            id: custom.id.clone(),
            base_url: custom.base_url.clone(),
            auth_mode: AuthMode::from_mode(custom.mode.as_deref()),
            api_key_env: custom.api_key_env.clone(),
            default_model: custom.default_model.clone(),
        }
    }
}

/// A provider with credentials and a concrete model, ready to call.
#[derive(Clone)]
pub struct ResolvedModel {
    pub provider_id: String,
    pub base_url: String,
    pub auth_mode: AuthMode,
    pub model: String,
    api_key: String,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("provider_id", &self.provider_id)
            .field("base_url", &self.base_url)
            .field("auth_mode", &self.auth_mode)
            .field("model", &self.model)
            .finish()
    }
}

impl ResolvedModel {
    pub fn new(
        metadata: &ProviderMetadata,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: metadata.id.clone(),
            base_url: metadata.base_url.clone(),
            auth_mode: metadata.auth_mode,
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        self.auth_mode.apply(request, &self.api_key)
    }
}

/// Where API keys come from. Keys are looked up by environment variable name.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self, env_var: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn api_key(&self, env_var: &str) -> Option<String> {
        std::env::var(env_var)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

/// Built-in providers plus configured custom ones; custom entries replace
/// built-ins with the same id.
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    providers: Vec<ProviderMetadata>,
    default_provider: Option<String>,
    default_models: HashMap<String, String>,
}

impl ProviderCatalog {
    pub fn from_config(config: &Config) -> Self {
        let mut providers: Vec<ProviderMetadata> = load_builtin_providers()
            .into_iter()
            .map(ProviderMetadata::from)
            .collect();

        for custom in &config.custom_providers {
            providers.retain(|existing| !existing.id.eq_ignore_ascii_case(&custom.id));
            providers.push(ProviderMetadata::from(custom));
        }

        let default_models = config
            .default_models
            .iter()
            .map(|(provider, model)| (provider.to_ascii_lowercase(), model.clone()))
            .collect();

        Self {
            providers,
            default_provider: config.default_provider.clone(),
            default_models,
        }
    }

    pub fn find(&self, id: &str) -> Option<&ProviderMetadata> {
        self.providers
            .iter()
            .find(|provider| provider.id.eq_ignore_ascii_case(id))
    }

    /// Picks the provider (explicit, configured default, then OpenAI), the
    /// model (explicit, configured default, then the provider's own) and the
    /// API key.
    pub fn resolve(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        credentials: &dyn CredentialSource,
    ) -> Result<ResolvedModel, ProviderError> {
        let provider_id = provider
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or(self.default_provider.as_deref())
            .unwrap_or(FALLBACK_PROVIDER);
        let metadata = self
            .find(provider_id)
            .ok_or_else(|| ProviderError::UnknownProvider(provider_id.to_string()))?;

        let model = model
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .map(str::to_string)
            .or_else(|| {
                self.default_models
                    .get(&metadata.id.to_ascii_lowercase())
                    .cloned()
            })
            .or_else(|| metadata.default_model.clone())
            .ok_or_else(|| ProviderError::MissingModel(metadata.id.clone()))?;

        let env_var = metadata
            .api_key_env
            .as_deref()
            .ok_or_else(|| ProviderError::MissingEnv {
                provider: metadata.id.clone(),
            })?;
        let api_key =
            credentials
                .api_key(env_var)
                .ok_or_else(|| ProviderError::MissingCredential {
                    provider: metadata.id.clone(),
                    env_var: env_var.to_string(),
                })?;

        Ok(ResolvedModel::new(metadata, model, api_key))
    }
}

/// Turns a provider/model selection into a runnable model handle.
pub trait ModelResolver: Send + Sync {
    fn resolve(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Arc<dyn LanguageModel>, ProviderError>;
}

pub struct ProviderModelResolver {
    catalog: ProviderCatalog,
    credentials: Arc<dyn CredentialSource>,
    client: reqwest::Client,
}

impl ProviderModelResolver {
    pub fn new(
        catalog: ProviderCatalog,
        credentials: Arc<dyn CredentialSource>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            catalog,
            credentials,
            client,
        }
    }
}

impl ModelResolver for ProviderModelResolver {
    fn resolve(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        let resolved = self
            .catalog
            .resolve(provider, model, self.credentials.as_ref())?;
        Ok(Arc::new(OpenAiCompatibleModel::new(
            self.client.clone(),
            resolved,
        )))
    }
}
