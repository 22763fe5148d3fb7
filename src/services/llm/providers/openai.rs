//! OpenAI-compatible provider
//!
//! Implements the `/chat/completions` wire shape. DeepSeek and
//! Qwen/DashScope expose the same protocol, so their clients reuse the
//! request/response types and the completion routine defined here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::services::llm::models::{
    estimate_tokens, Capabilities, LLMError, LLMRequest, LLMResponse, OutputFormat, ProviderKind,
};
use crate::services::llm::provider::{LLMProviderClient, ProviderCore};

// ============================================================================
// Wire types (shared by the OpenAI-compatible family)
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseFormat {
    pub r#type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<Usage>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Provider error envelope: `{"error": {"message", "type", "code"}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<serde_json::Value>,
}

/// Transient provider-signaled codes that stay retryable below 500.
const TRANSIENT_CODES: &[&str] = &["rate_limit_exceeded", "server_error", "overloaded", "timeout"];

// ============================================================================
// Completion routine shared across the family
// ============================================================================

pub(crate) fn build_chat_request(core: &ProviderCore, request: &LLMRequest) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &request.system_prompt {
        // System prompt travels as the first message on this wire
        messages.push(ChatMessage { role: "system".to_string(), content: system.clone() });
    }
    messages.push(ChatMessage { role: "user".to_string(), content: request.prompt.clone() });

    ChatCompletionRequest {
        model: core.resolve_model(request),
        messages,
        max_tokens: Some(request.max_tokens),
        temperature: Some(request.temperature),
        response_format: (request.format == OutputFormat::Json)
            .then(|| ResponseFormat { r#type: "json_object".to_string() }),
    }
}

/// Full completion sequence: admission, native translation, send, parse.
pub(crate) async fn chat_completion(
    core: &ProviderCore,
    request: &LLMRequest,
) -> Result<LLMResponse, LLMError> {
    core.admit(request).await?;

    let provider = core.kind();
    let chat_request = build_chat_request(core, request);
    let url = format!(
        "{}/chat/completions",
        core.settings().base_url.trim_end_matches('/')
    );

    tracing::debug!("calling {} chat API with model {}", provider, chat_request.model);

    let start = std::time::Instant::now();
    let response = core
        .http()
        .post(&url)
        .bearer_auth(&core.settings().api_key)
        .json(&chat_request)
        .send()
        .await
        .map_err(|e| core.transport_error(e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(decode_error(provider, status.as_u16(), &body));
    }

    let chat_response: ChatCompletionResponse = response
        .json()
        .await
        .map_err(|e| LLMError::Parse { provider, message: e.to_string() })?;

    let content = chat_response
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .ok_or_else(|| LLMError::Parse {
            provider,
            message: "empty response from provider".to_string(),
        })?;

    core.record_success();

    let tokens_used = chat_response
        .usage
        .as_ref()
        .map(|u| u.prompt_tokens + u.completion_tokens)
        .unwrap_or_else(|| estimate_tokens(&content));

    Ok(LLMResponse {
        content,
        tokens_used,
        model: chat_response.model.unwrap_or(chat_request.model),
        provider,
        duration: start.elapsed(),
        metadata: Default::default(),
    })
}

/// Decode a non-2xx body into the error taxonomy. Status >= 500 and
/// transient provider codes are retryable; auth, quota and malformed
/// requests are not.
pub(crate) fn decode_error(provider: ProviderKind, status: u16, body: &str) -> LLMError {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error: Some(err) }) => {
            let code = err
                .code
                .as_ref()
                .and_then(|c| c.as_str().map(str::to_string))
                .or(err.error_type)
                .unwrap_or_else(|| status.to_string());
            let message = err.message.unwrap_or_else(|| body.to_string());
            (code, message)
        },
        _ => (status.to_string(), body.to_string()),
    };

    let retryable =
        status >= 500 || status == 429 || TRANSIENT_CODES.contains(&code.as_str());

    LLMError::Api { provider, status: Some(status), code, message, retryable }
}

/// Health probe: list models, falling back to a minimal one-token chat
/// when the models endpoint is unsupported.
pub(crate) async fn health_check(core: &ProviderCore) -> Result<(), LLMError> {
    let provider = core.kind();
    let url = format!("{}/models", core.settings().base_url.trim_end_matches('/'));

    let response = core
        .http()
        .get(&url)
        .bearer_auth(&core.settings().api_key)
        .send()
        .await
        .map_err(|e| core.transport_error(e))?;

    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        return Err(LLMError::Api {
            provider,
            status: Some(401),
            code: "invalid_api_key".to_string(),
            message: "invalid API key".to_string(),
            retryable: false,
        });
    }

    if response.status().is_success() {
        return Ok(());
    }

    // Some compatible gateways only expose chat/completions
    let probe = LLMRequest::new("Hi").with_max_tokens(1).with_temperature(0.0);
    chat_completion(core, &probe).await.map(|_| ())
}

// ============================================================================
// OpenAI client
// ============================================================================

pub struct OpenAiClient {
    core: ProviderCore,
}

impl OpenAiClient {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { core: ProviderCore::new(ProviderKind::OpenAi, settings) }
    }
}

#[async_trait]
impl LLMProviderClient for OpenAiClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.core.settings().model
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_tokens: 128_000,
            supported_formats: vec![OutputFormat::Text, OutputFormat::Json, OutputFormat::Code],
            streaming: false,
            batch: false,
            cost_per_token: 0.000_01,
            latency_ms: 800,
            models: vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
        }
    }

    async fn complete(&self, request: &LLMRequest) -> Result<LLMResponse, LLMError> {
        chat_completion(&self.core, request).await
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        health_check(&self.core).await
    }
}
