//! Circuit breaker for upstream protection
//!
//! Closed -> Open after `max_failures` consecutive failures, Open ->
//! HalfOpen once `reset_timeout` has elapsed, HalfOpen -> Closed on the
//! first success (failure count reset) or back to Open on failure.
//! Failures older than `failure_timeout` no longer count toward the
//! consecutive streak.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing, requests rejected
    Open,
    /// Testing recovery with probe requests
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub reset_timeout: Duration,
    pub failure_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            failure_timeout: Duration::from_secs(10),
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                opened_at: None,
            }),
        }
    }

    /// Gate check. In the Open state this also performs the timed
    /// transition to HalfOpen, so the first caller after the cooldown
    /// becomes the recovery probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    tracing::debug!("circuit breaker half-open after {:?}", elapsed);
                    true
                } else {
                    false
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        if inner.state == CircuitState::HalfOpen {
            tracing::info!("circuit breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        let now = Instant::now();

        // Stale streaks expire: a failure long after the previous one
        // starts a new count instead of extending the old streak.
        let stale = inner
            .last_failure
            .map(|t| now.duration_since(t) > self.config.failure_timeout)
            .unwrap_or(false);
        if stale {
            inner.consecutive_failures = 0;
        }
        inner.consecutive_failures += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                tracing::warn!("circuit breaker re-opened: probe failed");
            },
            CircuitState::Closed if inner.consecutive_failures >= self.config.max_failures => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                tracing::warn!(
                    "circuit breaker opened after {} consecutive failures",
                    inner.consecutive_failures
                );
            },
            _ => {},
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker lock poisoned").state
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
