//! Claude (Anthropic) provider
//!
//! Native `/v1/messages` wire: the system prompt is a distinct top-level
//! field rather than a leading message, auth travels in `x-api-key` and
//! the API version in `anthropic-version`. Preferred by the façade for
//! three-elements analysis.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::services::llm::models::{
    estimate_tokens, Capabilities, LLMError, LLMRequest, LLMResponse, OutputFormat, ProviderKind,
};
use crate::services::llm::provider::{LLMProviderClient, ProviderCore};

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

/// Anthropic transient error types.
const TRANSIENT_TYPES: &[&str] = &["overloaded_error", "api_error", "rate_limit_error"];

// ============================================================================
// Client
// ============================================================================

pub struct ClaudeClient {
    core: ProviderCore,
}

impl ClaudeClient {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { core: ProviderCore::new(ProviderKind::Claude, settings) }
    }

    fn build_request(&self, request: &LLMRequest) -> MessagesRequest {
        let mut prompt = request.prompt.clone();
        if request.format == OutputFormat::Json {
            // No native response_format on this wire; the instruction
            // rides on the user prompt instead.
            prompt.push_str("\n\nRespond with a single valid JSON object and nothing else.");
        }

        MessagesRequest {
            model: self.core.resolve_model(request),
            max_tokens: request.max_tokens,
            messages: vec![Message { role: "user".to_string(), content: prompt }],
            system: request.system_prompt.clone(),
            temperature: Some(request.temperature.min(1.0)),
        }
    }

    fn decode_error(&self, status: u16, body: &str) -> LLMError {
        let provider = ProviderKind::Claude;
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(ErrorEnvelope { error: Some(err) }) => (
                err.error_type.unwrap_or_else(|| status.to_string()),
                err.message.unwrap_or_else(|| body.to_string()),
            ),
            _ => (status.to_string(), body.to_string()),
        };

        let retryable =
            status >= 500 || status == 429 || TRANSIENT_TYPES.contains(&code.as_str());

        LLMError::Api { provider, status: Some(status), code, message, retryable }
    }
}

#[async_trait]
impl LLMProviderClient for ClaudeClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn model(&self) -> &str {
        &self.core.settings().model
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_tokens: 200_000,
            supported_formats: vec![OutputFormat::Text, OutputFormat::Json, OutputFormat::Code],
            streaming: false,
            batch: false,
            cost_per_token: 0.000_015,
            latency_ms: 1500,
            models: vec![
                "claude-sonnet-4-20250514".to_string(),
                "claude-3-5-haiku-20241022".to_string(),
            ],
        }
    }

    async fn complete(&self, request: &LLMRequest) -> Result<LLMResponse, LLMError> {
        self.core.admit(request).await?;

        let provider = ProviderKind::Claude;
        let wire = self.build_request(request);
        let url = format!(
            "{}/v1/messages",
            self.core.settings().base_url.trim_end_matches('/')
        );

        tracing::debug!("calling claude messages API with model {}", wire.model);

        let start = std::time::Instant::now();
        let response = self
            .core
            .http()
            .post(&url)
            .header("x-api-key", self.core.settings().api_key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&wire)
            .send()
            .await
            .map_err(|e| self.core.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.decode_error(status.as_u16(), &body));
        }

        let messages_response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Parse { provider, message: e.to_string() })?;

        let content = messages_response
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(LLMError::Parse {
                provider,
                message: "empty content blocks in response".to_string(),
            });
        }

        self.core.record_success();

        let tokens_used = messages_response
            .usage
            .as_ref()
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or_else(|| estimate_tokens(&content));

        Ok(LLMResponse {
            content,
            tokens_used,
            model: messages_response.model.unwrap_or(wire.model),
            provider,
            duration: start.elapsed(),
            metadata: Default::default(),
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        let probe = LLMRequest::new("Hi").with_max_tokens(1).with_temperature(0.0);
        self.complete(&probe).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_top_level_field() {
        let client = ClaudeClient::new(ProviderSettings::default());
        let request = LLMRequest::new("question").with_system("rules");
        let wire = client.build_request(&request);

        assert_eq!(wire.system.as_deref(), Some("rules"));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "user");
    }

    #[test]
    fn json_format_appends_instruction() {
        let client = ClaudeClient::new(ProviderSettings::default());
        let request = LLMRequest::new("question").with_format(OutputFormat::Json);
        let wire = client.build_request(&request);
        assert!(wire.messages[0].content.contains("valid JSON object"));
    }

    #[test]
    fn overloaded_error_is_retryable() {
        let client = ClaudeClient::new(ProviderSettings::default());
        let body = r#"{"error": {"type": "overloaded_error", "message": "busy"}}"#;
        assert!(client.decode_error(529, body).is_retryable());

        let body = r#"{"error": {"type": "authentication_error", "message": "bad key"}}"#;
        assert!(!client.decode_error(401, body).is_retryable());
    }
}
