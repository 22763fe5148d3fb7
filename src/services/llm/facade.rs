//! LLM façade
//!
//! The single entry point the engines use for completions. Chooses a
//! provider by task type, retries with exponential backoff and a
//! per-attempt timeout, falls over to the configured secondary provider
//! once the primary is exhausted, and caches deterministic completions
//! by prompt hash.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LLMConfig;
use crate::utils::Cache;

use super::models::{LLMError, LLMRequest, LLMResponse, ProviderKind, TaskType};
use super::provider::{ClientFactory, LLMProviderClient};

/// Requests at or below this temperature are considered deterministic
/// and therefore cacheable.
const CACHEABLE_TEMPERATURE: f32 = 0.2;

pub struct LLMFacade {
    factory: Arc<ClientFactory>,
    config: LLMConfig,
    cache: Arc<Cache<LLMResponse>>,
    failover_count: AtomicU64,
}

impl LLMFacade {
    pub fn new(config: LLMConfig, factory: Arc<ClientFactory>) -> Self {
        let cache = Arc::new(Cache::new(
            config.cache_size,
            Duration::from_secs(config.cache_ttl_secs),
        ));
        Self { factory, config, cache, failover_count: AtomicU64::new(0) }
    }

    pub fn is_available(&self) -> bool {
        !self.factory.is_empty()
    }

    /// Free-form chat: routed as a general task, content only.
    pub async fn chat(&self, message: &str) -> Result<String, LLMError> {
        let request = LLMRequest::new(message);
        let response = self.complete_task(TaskType::General, request).await?;
        Ok(response.content)
    }

    /// Structured completion for a routed task type.
    pub async fn complete_task(
        &self,
        task: TaskType,
        request: LLMRequest,
    ) -> Result<LLMResponse, LLMError> {
        let primary = self.select_provider(task);

        let cache_key = self.cacheable(&request).then(|| self.cache_key(&request, primary));
        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get(key) {
                tracing::debug!("LLM cache hit for task {}", task.as_str());
                return Ok(cached);
            }
        }

        let response = self.execute_with_failover(task, primary, &request).await?;

        if let Some(key) = cache_key {
            self.cache.insert(key, response.clone());
        }
        Ok(response)
    }

    /// Times a primary provider has been abandoned for the fallback.
    pub fn failover_count(&self) -> u64 {
        self.failover_count.load(Ordering::Relaxed)
    }

    /// Probe every registered provider. Returns one entry per provider
    /// with the failure message for the unhealthy ones.
    pub async fn health_check_all(&self) -> Vec<(ProviderKind, Result<(), String>)> {
        let mut report = Vec::new();
        for kind in self.factory.registered() {
            let Some(client) = self.factory.get(kind) else { continue };
            let status = client.health_check().await.map_err(|e| e.to_string());
            if let Err(message) = &status {
                tracing::warn!("provider {} unhealthy: {}", kind, message);
            }
            report.push((kind, status));
        }
        report
    }

    /// Task-type routing. Preferences only apply when the preferred
    /// provider is actually registered; otherwise the chain degrades to
    /// the configured primary.
    pub fn select_provider(&self, task: TaskType) -> ProviderKind {
        if !self.config.enable_routing {
            return self.config.primary_provider;
        }

        let preferences: &[ProviderKind] = match task {
            TaskType::ThreeElementsAnalysis => &[ProviderKind::Claude, ProviderKind::DeepSeek],
            TaskType::QueryRewrite => &[ProviderKind::Qwen, ProviderKind::DeepSeek],
            TaskType::CodeAnalysis => &[ProviderKind::DeepSeek],
            TaskType::StorageStructuring | TaskType::General => &[],
        };

        preferences
            .iter()
            .copied()
            .find(|kind| self.factory.get(*kind).is_some())
            .unwrap_or(self.config.primary_provider)
    }

    async fn execute_with_failover(
        &self,
        task: TaskType,
        primary: ProviderKind,
        request: &LLMRequest,
    ) -> Result<LLMResponse, LLMError> {
        match self.execute_with_retry(primary, request).await {
            Ok(response) => Ok(response),
            Err(primary_err) => {
                let fallback = self.config.fallback_provider;
                if fallback == primary || self.factory.get(fallback).is_none() {
                    return Err(primary_err);
                }

                tracing::warn!(
                    "task {} failing over from {} to {}: {}",
                    task.as_str(),
                    primary,
                    fallback,
                    primary_err
                );
                self.failover_count.fetch_add(1, Ordering::Relaxed);

                self.execute_with_retry(fallback, request)
                    .await
                    .map_err(|fallback_err| {
                        tracing::error!(
                            "fallback provider {} also failed: {}",
                            fallback,
                            fallback_err
                        );
                        LLMError::AllProvidersUnavailable
                    })
            },
        }
    }

    /// The attempt loop against one provider: up to `max_retries`
    /// attempts, per-attempt timeout, backoff 1s * 2^attempt between
    /// attempts. Non-retryable errors abort immediately.
    async fn execute_with_retry(
        &self,
        kind: ProviderKind,
        request: &LLMRequest,
    ) -> Result<LLMResponse, LLMError> {
        let client = self
            .factory
            .get(kind)
            .ok_or_else(|| LLMError::NotConfigured(kind.as_str().to_string()))?;

        let attempts = self.config.max_retries.max(1);
        let per_attempt = Duration::from_secs(self.config.timeout_seconds);
        let mut last_err = LLMError::AllProvidersUnavailable;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1).min(6));
                tokio::time::sleep(backoff).await;
            }

            match self.attempt(&client, request, per_attempt).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => {
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}",
                        kind,
                        attempt + 1,
                        attempts,
                        err
                    );
                    last_err = err;
                },
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    async fn attempt(
        &self,
        client: &Arc<dyn LLMProviderClient>,
        request: &LLMRequest,
        per_attempt: Duration,
    ) -> Result<LLMResponse, LLMError> {
        match tokio::time::timeout(per_attempt, client.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LLMError::Timeout {
                provider: client.provider(),
                seconds: per_attempt.as_secs(),
            }),
        }
    }

    fn cacheable(&self, request: &LLMRequest) -> bool {
        self.config.cache_enabled && request.temperature <= CACHEABLE_TEMPERATURE
    }

    /// Hash over the normalized prompt identity: system + user + format
    /// + model + max_tokens + temperature.
    fn cache_key(&self, request: &LLMRequest, provider: ProviderKind) -> String {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| provider.as_str().to_string());

        let mut hasher = Sha256::new();
        hasher.update(request.system_prompt.as_deref().unwrap_or("").trim().as_bytes());
        hasher.update([0x1f]);
        hasher.update(request.prompt.trim().as_bytes());
        hasher.update([0x1f]);
        hasher.update(request.format.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(model.as_bytes());
        hasher.update([0x1f]);
        hasher.update(request.max_tokens.to_le_bytes());
        hasher.update(request.temperature.to_le_bytes());
        format!("llm:{:x}", hasher.finalize())
    }
}
