//! Provider client abstraction
//!
//! One trait across all providers, a shared `ProviderCore` every client
//! holds by value (rate limiter, circuit breaker, pooled transport), and
//! the process-wide factory that owns the client singletons.

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProviderSettings;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, RateLimiter};

use super::models::{Capabilities, LLMError, LLMRequest, LLMResponse, ProviderKind};

/// Unified provider client contract.
///
/// `batch_complete` and `stream_complete` have serial / single-chunk
/// defaults; providers that cannot do better keep the defaults and
/// report `batch: false` / `streaming: false` in their capabilities.
#[async_trait]
pub trait LLMProviderClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn model(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    async fn complete(&self, request: &LLMRequest) -> Result<LLMResponse, LLMError>;

    /// Serial fallback: requests complete one at a time, first error wins.
    async fn batch_complete(
        &self,
        requests: &[LLMRequest],
    ) -> Result<Vec<LLMResponse>, LLMError> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.complete(request).await?);
        }
        Ok(responses)
    }

    /// Single-chunk fallback: the full completion arrives as one chunk.
    async fn stream_complete(
        &self,
        request: &LLMRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<String, LLMError>>, LLMError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(Ok(response.content)).await;
        Ok(rx)
    }

    async fn health_check(&self) -> Result<(), LLMError>;

    /// Release held resources. Transports are dropped with the client;
    /// the default is a no-op.
    async fn close(&self) {}
}

// ============================================================================
// Provider core - shared admission state
// ============================================================================

/// State every provider variant composes by value: its own token bucket,
/// circuit breaker and pooled HTTP transport. No state is shared between
/// providers.
pub struct ProviderCore {
    kind: ProviderKind,
    settings: ProviderSettings,
    http: reqwest::Client,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    /// Ollama-style local providers skip rate limiting by default.
    enforce_rate_limit: bool,
}

impl ProviderCore {
    pub fn new(kind: ProviderKind, settings: ProviderSettings) -> Self {
        Self::with_rate_limiting(kind, settings, true)
    }

    pub fn with_rate_limiting(
        kind: ProviderKind,
        settings: ProviderSettings,
        enforce_rate_limit: bool,
    ) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(50)
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            kind,
            limiter: RateLimiter::per_minute(settings.rate_limit),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            settings,
            http,
            enforce_rate_limit,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Resolved model for a request: per-request override beats the
    /// configured default.
    pub fn resolve_model(&self, request: &LLMRequest) -> String {
        request
            .model
            .clone()
            .unwrap_or_else(|| self.settings.model.clone())
    }

    /// Admission sequence in front of every completion: limiter first
    /// (unless the request opts out), then the circuit breaker gate.
    pub async fn admit(&self, request: &LLMRequest) -> Result<(), LLMError> {
        if self.enforce_rate_limit && !request.skip_rate_limit() {
            let wait_budget = Duration::from_secs(self.settings.timeout_secs);
            if tokio::time::timeout(wait_budget, self.limiter.wait())
                .await
                .is_err()
            {
                return Err(LLMError::RateLimitExceeded { provider: self.kind });
            }
        }
        if !self.breaker.allow_request() {
            return Err(LLMError::CircuitOpen { provider: self.kind });
        }
        Ok(())
    }

    pub fn record_success(&self) {
        self.breaker.record_success();
    }

    pub fn record_failure(&self) {
        self.breaker.record_failure();
    }

    /// Map a reqwest failure onto the error taxonomy and feed the breaker.
    pub fn transport_error(&self, err: reqwest::Error) -> LLMError {
        self.record_failure();
        if err.is_timeout() {
            LLMError::Timeout { provider: self.kind, seconds: self.settings.timeout_secs }
        } else {
            LLMError::Transport { provider: self.kind, message: err.to_string() }
        }
    }
}

// ============================================================================
// Client factory
// ============================================================================

/// Owns the provider client singletons. One instance per process; the
/// global slot is initialized once at boot and never reassigned.
pub struct ClientFactory {
    clients: DashMap<ProviderKind, Arc<dyn LLMProviderClient>>,
}

static GLOBAL_FACTORY: OnceCell<Arc<ClientFactory>> = OnceCell::new();

impl ClientFactory {
    pub fn new() -> Self {
        Self { clients: DashMap::new() }
    }

    pub fn register(&self, client: Arc<dyn LLMProviderClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn LLMProviderClient>> {
        self.clients.get(&kind).map(|c| Arc::clone(c.value()))
    }

    pub fn registered(&self) -> Vec<ProviderKind> {
        self.clients.iter().map(|c| *c.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Install the process-wide factory. Returns false if one was
    /// already installed (the first wins).
    pub fn install_global(factory: Arc<ClientFactory>) -> bool {
        GLOBAL_FACTORY.set(factory).is_ok()
    }

    pub fn global() -> Option<Arc<ClientFactory>> {
        GLOBAL_FACTORY.get().map(Arc::clone)
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}
