//! LLM service
//!
//! Provider-agnostic completion: a client abstraction over five
//! provider variants, and a façade that layers routing, retry,
//! fallback and caching on top.

pub mod facade;
pub mod models;
pub mod provider;
pub mod providers;


pub use facade::LLMFacade;
pub use models::{
    estimate_tokens, Capabilities, LLMError, LLMRequest, LLMResponse, OutputFormat, ProviderKind,
    TaskType, META_SKIP_RATE_LIMIT,
};
pub use provider::{ClientFactory, LLMProviderClient, ProviderCore};

use std::sync::Arc;

use crate::config::LLMConfig;
use providers::{ClaudeClient, DeepSeekClient, OllamaClient, OpenAiClient, QwenClient};

/// Build the client factory from configuration. A provider is
/// registered when it has an API key (Ollama instead needs only a base
/// URL, the local daemon is unauthenticated).
pub fn build_factory(config: &LLMConfig) -> ClientFactory {
    let factory = ClientFactory::new();

    if let Some(settings) = config.provider(ProviderKind::OpenAi) {
        if !settings.api_key.is_empty() {
            factory.register(Arc::new(OpenAiClient::new(settings.clone())));
        }
    }
    if let Some(settings) = config.provider(ProviderKind::Claude) {
        if !settings.api_key.is_empty() {
            factory.register(Arc::new(ClaudeClient::new(settings.clone())));
        }
    }
    if let Some(settings) = config.provider(ProviderKind::Qwen) {
        if !settings.api_key.is_empty() {
            factory.register(Arc::new(QwenClient::new(settings.clone())));
        }
    }
    if let Some(settings) = config.provider(ProviderKind::DeepSeek) {
        if !settings.api_key.is_empty() {
            factory.register(Arc::new(DeepSeekClient::new(settings.clone())));
        }
    }
    if let Some(settings) = config.provider(ProviderKind::Ollama) {
        if !settings.base_url.is_empty() {
            factory.register(Arc::new(OllamaClient::new(settings.clone())));
        }
    }

    if factory.is_empty() {
        tracing::warn!("no LLM providers configured; façade will reject requests");
    }
    factory
}
