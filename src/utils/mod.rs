pub mod cache;
pub mod circuit_breaker;
pub mod logging;
pub mod metrics;
pub mod rate_limiter;

pub use cache::Cache;
pub use logging::init_tracing;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use metrics::{EngineHealth, EngineStats, QueryRecord, QueryStats, RetrievalMetrics};
pub use rate_limiter::RateLimiter;
