//! Qwen (DashScope) provider
//!
//! Talks to DashScope's OpenAI-compatible mode, so the wire types come
//! from the openai module. Preferred by the façade for query-rewrite
//! tasks.

use async_trait::async_trait;

use crate::config::ProviderSettings;
use crate::services::llm::models::{
    Capabilities, LLMError, LLMRequest, LLMResponse, OutputFormat, ProviderKind,
};
use crate::services::llm::provider::{LLMProviderClient, ProviderCore};

use super::openai;

pub struct QwenClient {
    core: ProviderCore,
}

impl QwenClient {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { core: ProviderCore::new(ProviderKind::Qwen, settings) }
    }
}

#[async_trait]
impl LLMProviderClient for QwenClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Qwen
    }

    fn model(&self) -> &str {
        &self.core.settings().model
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_tokens: 32_000,
            supported_formats: vec![OutputFormat::Text, OutputFormat::Json],
            streaming: false,
            batch: false,
            cost_per_token: 0.000_002,
            latency_ms: 1000,
            models: vec![
                "qwen-max".to_string(),
                "qwen-plus".to_string(),
                "qwen-turbo".to_string(),
            ],
        }
    }

    async fn complete(&self, request: &LLMRequest) -> Result<LLMResponse, LLMError> {
        openai::chat_completion(&self.core, request).await
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        openai::health_check(&self.core).await
    }
}
