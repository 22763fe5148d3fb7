//! Local Ollama provider
//!
//! Talks to a local daemon over `/api/chat`. No API key, and rate
//! limiting is skipped by default for the local path. Every request
//! carries the full message list and no continuation context, so model
//! state never leaks between requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::services::llm::models::{
    estimate_tokens, Capabilities, LLMError, LLMRequest, LLMResponse, OutputFormat, ProviderKind,
};
use crate::services::llm::provider::{LLMProviderClient, ProviderCore};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct OllamaClient {
    core: ProviderCore,
}

impl OllamaClient {
    pub fn new(settings: ProviderSettings) -> Self {
        // Local daemon: rate limiting off by default
        Self { core: ProviderCore::with_rate_limiting(ProviderKind::Ollama, settings, false) }
    }
}

#[async_trait]
impl LLMProviderClient for OllamaClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model(&self) -> &str {
        &self.core.settings().model
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_tokens: 8_192,
            supported_formats: vec![OutputFormat::Text, OutputFormat::Json],
            streaming: false,
            batch: false,
            cost_per_token: 0.0,
            latency_ms: 3000,
            models: vec!["llama3.1".to_string(), "qwen2.5".to_string()],
        }
    }

    async fn complete(&self, request: &LLMRequest) -> Result<LLMResponse, LLMError> {
        self.core.admit(request).await?;

        let provider = ProviderKind::Ollama;
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(Message { role: "system".to_string(), content: system.clone() });
        }
        messages.push(Message { role: "user".to_string(), content: request.prompt.clone() });

        let wire = ChatRequest {
            model: self.core.resolve_model(request),
            messages,
            stream: false,
            format: (request.format == OutputFormat::Json).then(|| "json".to_string()),
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let url = format!("{}/api/chat", self.core.settings().base_url.trim_end_matches('/'));
        tracing::debug!("calling ollama chat API with model {}", wire.model);

        let start = std::time::Instant::now();
        let response = self
            .core
            .http()
            .post(&url)
            .json(&wire)
            .send()
            .await
            .map_err(|e| self.core.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::Api {
                provider,
                status: Some(status.as_u16()),
                code: status.as_u16().to_string(),
                message: body,
                retryable: status.as_u16() >= 500,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Parse { provider, message: e.to_string() })?;

        let content = chat_response
            .message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LLMError::Parse {
                provider,
                message: "empty response from daemon".to_string(),
            })?;

        self.core.record_success();

        let tokens_used = match (chat_response.prompt_eval_count, chat_response.eval_count) {
            (Some(p), Some(e)) => p + e,
            _ => estimate_tokens(&content),
        };

        Ok(LLMResponse {
            content,
            tokens_used,
            model: chat_response.model.unwrap_or(wire.model),
            provider,
            duration: start.elapsed(),
            metadata: Default::default(),
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        let url = format!("{}/api/tags", self.core.settings().base_url.trim_end_matches('/'));
        let response = self
            .core
            .http()
            .get(&url)
            .send()
            .await
            .map_err(|e| self.core.transport_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LLMError::Api {
                provider: ProviderKind::Ollama,
                status: Some(response.status().as_u16()),
                code: response.status().as_u16().to_string(),
                message: "daemon not healthy".to_string(),
                retryable: true,
            })
        }
    }
}
