use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::services::llm::models::ProviderKind;

/// Fabric configuration: one typed source of truth for every engine.
///
/// Loading order (priority from highest to lowest):
/// 1. Environment variables (prefixed with APP_)
/// 2. Configuration file (engram.toml)
/// 3. Default values
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub features: FeatureFlags,
    pub dimensions: DimensionFlags,
    pub strategy: StrategyConfig,
    pub performance: PerformanceConfig,
    pub backends: BackendsConfig,
    pub llm: LLMConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            features: FeatureFlags::default(),
            dimensions: DimensionFlags::default(),
            strategy: StrategyConfig::default(),
            performance: PerformanceConfig::default(),
            backends: BackendsConfig::default(),
            llm: LLMConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub semantic_analysis: bool,
    pub multi_dimensional: bool,
    pub content_synthesis: bool,
    pub context_updates: bool,
    pub short_term_memory_llm: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DimensionFlags {
    pub timeline_enabled: bool,
    pub knowledge_enabled: bool,
    pub vector_enabled: bool,
}

impl DimensionFlags {
    pub fn any_enabled(&self) -> bool {
        self.timeline_enabled || self.knowledge_enabled || self.vector_enabled
    }
}

/// Fusion variants are declared here; the engine currently routes every
/// variant through the relevance-descending path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    #[default]
    Weighted,
    RankFusion,
    ScoreFusion,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub timeline_weight: f64,
    pub knowledge_weight: f64,
    pub vector_weight: f64,
    pub enable_parallel: bool,
    /// Shared fan-out deadline in seconds.
    pub timeout_secs: u64,
    pub fusion_method: FusionMethod,
    pub max_results: usize,
    pub min_relevance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_queries: usize,
    pub query_timeout_secs: u64,
    pub enable_cache: bool,
    pub cache_ttl_secs: u64,
    pub cache_size: usize,
    /// Retrieval admission budget, requests per minute.
    pub rate_limit: u32,
}

/// Connection parameters for one backend driver. The fabric itself
/// never dials these; they are handed to whatever adapter the embedder
/// constructs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub ssl_mode: String,
    pub pool_size: u32,
    pub idle_conns: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendsConfig {
    pub timeline: BackendConfig,
    pub knowledge: BackendConfig,
    pub vector: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub primary_provider: ProviderKind,
    pub fallback_provider: ProviderKind,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_size: usize,
    pub max_retries: u32,
    /// Per-attempt timeout inside the façade retry loop.
    pub timeout_seconds: u64,
    pub enable_routing: bool,
    pub openai: Option<ProviderSettings>,
    pub claude: Option<ProviderSettings>,
    pub qwen: Option<ProviderSettings>,
    pub deepseek: Option<ProviderSettings>,
    pub ollama: Option<ProviderSettings>,
}

impl LLMConfig {
    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        match kind {
            ProviderKind::OpenAi => self.openai.as_ref(),
            ProviderKind::Claude => self.claude.as_ref(),
            ProviderKind::Qwen => self.qwen.as_ref(),
            ProviderKind::DeepSeek => self.deepseek.as_ref(),
            ProviderKind::Ollama => self.ollama.as_ref(),
        }
    }

    fn provider_mut(&mut self, kind: ProviderKind) -> &mut ProviderSettings {
        let slot = match kind {
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::Claude => &mut self.claude,
            ProviderKind::Qwen => &mut self.qwen,
            ProviderKind::DeepSeek => &mut self.deepseek,
            ProviderKind::Ollama => &mut self.ollama,
        };
        slot.get_or_insert_with(ProviderSettings::default)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Requests per minute admitted by the provider's token bucket.
    pub rate_limit: u32,
}

impl Config {
    /// Load configuration with environment variable and file support.
    pub fn load() -> Result<Self, anyhow::Error> {
        let mut config = if let Some(path) = Self::find_config_file() {
            Self::from_toml(&path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_ENABLED: master switch for the fabric
    /// - APP_FEATURE_SEMANTIC_ANALYSIS / APP_FEATURE_MULTI_DIMENSIONAL /
    ///   APP_FEATURE_CONTENT_SYNTHESIS / APP_FEATURE_CONTEXT_UPDATES /
    ///   APP_FEATURE_SHORT_TERM_MEMORY_LLM: feature flags
    /// - APP_LLM_PRIMARY_PROVIDER / APP_LLM_FALLBACK_PROVIDER: provider names
    /// - APP_LLM_MODEL: model for the primary provider
    /// - APP_LLM_MAX_TOKENS / APP_LLM_TEMPERATURE: primary provider limits
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Override application with an injected lookup, so tests can feed
    /// values without touching process environment.
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("APP_ENABLED")
            && let Ok(v) = v.parse()
        {
            self.enabled = v;
            tracing::info!("Override enabled from env: {}", self.enabled);
        }

        let flags: [(&str, &mut bool); 5] = [
            ("APP_FEATURE_SEMANTIC_ANALYSIS", &mut self.features.semantic_analysis),
            ("APP_FEATURE_MULTI_DIMENSIONAL", &mut self.features.multi_dimensional),
            ("APP_FEATURE_CONTENT_SYNTHESIS", &mut self.features.content_synthesis),
            ("APP_FEATURE_CONTEXT_UPDATES", &mut self.features.context_updates),
            ("APP_FEATURE_SHORT_TERM_MEMORY_LLM", &mut self.features.short_term_memory_llm),
        ];
        for (name, slot) in flags {
            if let Some(v) = lookup(name)
                && let Ok(v) = v.parse()
            {
                *slot = v;
                tracing::info!("Override {} from env: {}", name, v);
            }
        }

        if let Some(v) = lookup("APP_LLM_PRIMARY_PROVIDER") {
            match ProviderKind::parse_kind(&v) {
                Some(kind) => {
                    self.llm.primary_provider = kind;
                    tracing::info!("Override llm.primary_provider from env: {}", kind);
                },
                None => tracing::warn!("Invalid APP_LLM_PRIMARY_PROVIDER '{}' (ignored)", v),
            }
        }

        if let Some(v) = lookup("APP_LLM_FALLBACK_PROVIDER") {
            match ProviderKind::parse_kind(&v) {
                Some(kind) => {
                    self.llm.fallback_provider = kind;
                    tracing::info!("Override llm.fallback_provider from env: {}", kind);
                },
                None => tracing::warn!("Invalid APP_LLM_FALLBACK_PROVIDER '{}' (ignored)", v),
            }
        }

        if let Some(v) = lookup("APP_LLM_MODEL") {
            let primary = self.llm.primary_provider;
            self.llm.provider_mut(primary).model = v;
            tracing::info!("Override model for {} from env", primary);
        }

        if let Some(v) = lookup("APP_LLM_MAX_TOKENS")
            && let Ok(v) = v.parse()
        {
            let primary = self.llm.primary_provider;
            self.llm.provider_mut(primary).max_tokens = v;
            tracing::info!("Override max_tokens for {} from env: {}", primary, v);
        }

        if let Some(v) = lookup("APP_LLM_TEMPERATURE")
            && let Ok(v) = v.parse::<f32>()
        {
            let primary = self.llm.primary_provider;
            self.llm.provider_mut(primary).temperature = v.clamp(0.0, 2.0);
            tracing::info!("Override temperature for {} from env: {}", primary, v);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let weight_sum = self.strategy.timeline_weight
            + self.strategy.knowledge_weight
            + self.strategy.vector_weight;
        if weight_sum <= 0.0 {
            anyhow::bail!("strategy weights must sum to a positive value");
        }

        if self.strategy.max_results == 0 {
            anyhow::bail!("strategy.max_results must be > 0");
        }
        if self.strategy.timeout_secs == 0 {
            anyhow::bail!("strategy.timeout_secs must be > 0");
        }
        if !(0.0..=1.0).contains(&self.strategy.min_relevance) {
            anyhow::bail!("strategy.min_relevance must be within [0, 1]");
        }

        if self.performance.cache_size == 0 {
            anyhow::bail!("performance.cache_size must be > 0");
        }
        if self.performance.rate_limit == 0 {
            anyhow::bail!("performance.rate_limit must be > 0");
        }

        if self.llm.max_retries == 0 {
            anyhow::bail!("llm.max_retries must be > 0");
        }
        if self.llm.timeout_seconds == 0 {
            anyhow::bail!("llm.timeout_seconds must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/engram.toml", "engram.toml", "./conf/engram.toml", "./engram.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            semantic_analysis: true,
            multi_dimensional: true,
            content_synthesis: false,
            context_updates: false,
            short_term_memory_llm: false,
        }
    }
}

impl Default for DimensionFlags {
    fn default() -> Self {
        Self { timeline_enabled: true, knowledge_enabled: true, vector_enabled: true }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            timeline_weight: 0.4,
            knowledge_weight: 0.3,
            vector_weight: 0.3,
            enable_parallel: true,
            timeout_secs: 60,
            fusion_method: FusionMethod::Weighted,
            max_results: 20,
            min_relevance: 0.3,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 10,
            query_timeout_secs: 30,
            enable_cache: true,
            cache_ttl_secs: 300,
            cache_size: 1000,
            rate_limit: 120,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            ssl_mode: "disable".to_string(),
            pool_size: 10,
            idle_conns: 2,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            primary_provider: ProviderKind::OpenAi,
            fallback_provider: ProviderKind::DeepSeek,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            cache_size: 100,
            max_retries: 3,
            timeout_seconds: 30,
            enable_routing: true,
            openai: None,
            claude: None,
            qwen: None,
            deepseek: None,
            ollama: None,
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.3,
            max_retries: 3,
            timeout_secs: 60,
            rate_limit: 60,
        }
    }
}
