//! DeepSeek provider
//!
//! OpenAI-compatible wire; only the endpoint, model catalogue and cost
//! profile differ. Preferred by the façade for code-analysis tasks.

use async_trait::async_trait;

use crate::config::ProviderSettings;
use crate::services::llm::models::{
    Capabilities, LLMError, LLMRequest, LLMResponse, OutputFormat, ProviderKind,
};
use crate::services::llm::provider::{LLMProviderClient, ProviderCore};

use super::openai;

pub struct DeepSeekClient {
    core: ProviderCore,
}

impl DeepSeekClient {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { core: ProviderCore::new(ProviderKind::DeepSeek, settings) }
    }
}

#[async_trait]
impl LLMProviderClient for DeepSeekClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    fn model(&self) -> &str {
        &self.core.settings().model
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_tokens: 64_000,
            supported_formats: vec![OutputFormat::Text, OutputFormat::Json, OutputFormat::Code],
            streaming: false,
            batch: false,
            cost_per_token: 0.000_001,
            latency_ms: 1200,
            models: vec!["deepseek-chat".to_string(), "deepseek-coder".to_string()],
        }
    }

    async fn complete(&self, request: &LLMRequest) -> Result<LLMResponse, LLMError> {
        openai::chat_completion(&self.core, request).await
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        openai::health_check(&self.core).await
    }
}
