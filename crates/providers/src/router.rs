//! Provider router: selects the configured model backend.

use std::collections::HashMap;
use std::sync::Arc;

use domgate_core::provider::Provider;
use tracing::{debug, warn};

use crate::openai_compat::OpenAiCompatProvider;

/// Named model backends with one designated default.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Build providers from configuration.
///
/// Every `[providers.<name>]` table becomes an OpenAI-compatible backend. The
/// default provider is registered even without a table when its endpoint is
/// well known. A provider with neither an `api_url` nor a known endpoint is
/// skipped.
pub fn build_from_config(config: &domgate_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let Some(base_url) = provider_config.api_url.clone().or_else(|| known_endpoint(name)) else {
            warn!(provider = %name, "Skipping provider without api_url");
            continue;
        };
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        router.register(
            name.clone(),
            Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key)),
        );
    }

    if router.get(&config.default_provider).is_none() {
        match known_endpoint(&config.default_provider) {
            Some(base_url) => {
                let api_key = config.api_key.clone().unwrap_or_default();
                router.register(
                    config.default_provider.clone(),
                    Arc::new(OpenAiCompatProvider::new(&config.default_provider, &base_url, &api_key)),
                );
            }
            None => warn!(provider = %config.default_provider, "Default provider has no endpoint"),
        }
    }

    debug!(providers = ?router.list(), default = %config.default_provider, "Provider router built");
    router
}

/// Endpoints of hosted and local OpenAI-compatible servers.
fn known_endpoint(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "ollama" => "http://localhost:11434/v1",
        "vllm" => "http://localhost:8000/v1",
        _ => return None,
    };
    Some(url.to_string())
}
