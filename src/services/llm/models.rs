//! LLM layer data models
//!
//! Provider-abstract request/response shapes, capability descriptors,
//! the task taxonomy used for routing, and the error enum shared by
//! every provider client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Providers & tasks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "claude")]
    Claude,
    #[serde(rename = "qwen")]
    Qwen,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "ollama")]
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Claude => "claude",
            Self::Qwen => "qwen",
            Self::DeepSeek => "deepseek",
            Self::Ollama => "ollama",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "claude" | "anthropic" => Some(Self::Claude),
            "qwen" | "dashscope" => Some(Self::Qwen),
            "deepseek" => Some(Self::DeepSeek),
            "ollama" | "local" => Some(Self::Ollama),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured task types the façade routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ThreeElementsAnalysis,
    QueryRewrite,
    CodeAnalysis,
    StorageStructuring,
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThreeElementsAnalysis => "three_elements_analysis",
            Self::QueryRewrite => "query_rewrite",
            Self::CodeAnalysis => "code_analysis",
            Self::StorageStructuring => "storage_structuring",
            Self::General => "general",
        }
    }
}

// ============================================================================
// Request / response
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Code,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Code => "code",
        }
    }
}

/// Metadata key a caller sets to bypass the provider rate limiter.
pub const META_SKIP_RATE_LIMIT: &str = "skip_rate_limit";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    /// Sampling temperature, clamped to [0, 2] by constructors.
    pub temperature: f32,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LLMRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: 4096,
            temperature: 0.3,
            format: OutputFormat::Text,
            model: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn skip_rate_limit(&self) -> bool {
        self.metadata
            .get(META_SKIP_RATE_LIMIT)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub tokens_used: u32,
    pub model: String,
    pub provider: ProviderKind,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Token count fallback when the provider reports no usage.
pub fn estimate_tokens(content: &str) -> u32 {
    (content.len() / 4) as u32
}

// ============================================================================
// Capabilities
// ============================================================================

/// What a provider client can actually do. Batch and streaming stay
/// `false` for clients whose implementation is the serial/single-chunk
/// fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub max_tokens: u32,
    pub supported_formats: Vec<OutputFormat>,
    pub streaming: bool,
    pub batch: bool,
    pub cost_per_token: f64,
    pub latency_ms: u64,
    pub models: Vec<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// LLM layer errors. Retryable iff transport failure, HTTP status >= 500,
/// rate-limit, circuit-open, or a provider-signaled transient code.
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("{provider}: rate limit exceeded")]
    RateLimitExceeded { provider: ProviderKind },

    #[error("{provider}: circuit breaker open")]
    CircuitOpen { provider: ProviderKind },

    #[error("{provider} API error {code}: {message}")]
    Api {
        provider: ProviderKind,
        status: Option<u16>,
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("{provider}: transport error: {message}")]
    Transport { provider: ProviderKind, message: String },

    #[error("{provider}: timeout after {seconds}s")]
    Timeout { provider: ProviderKind, seconds: u64 },

    #[error("{provider}: response parsing error: {message}")]
    Parse { provider: ProviderKind, message: String },

    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("all LLM providers unavailable")]
    AllProvidersUnavailable,

    #[error("LLM service disabled")]
    Disabled,
}

impl LLMError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. }
            | Self::CircuitOpen { .. }
            | Self::Transport { .. }
            | Self::Timeout { .. } => true,
            Self::Api { status, retryable, .. } => {
                *retryable || status.map(|s| s >= 500).unwrap_or(false)
            },
            Self::Parse { .. }
            | Self::NotConfigured(_)
            | Self::AllProvidersUnavailable
            | Self::Disabled => false,
        }
    }

    /// Stable machine code for error aggregation.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            Self::Api { .. } => "API_ERROR",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::NotConfigured(_) => "NOT_CONFIGURED",
            Self::AllProvidersUnavailable => "ALL_PROVIDERS_UNAVAILABLE",
            Self::Disabled => "DISABLED",
        }
    }
}
