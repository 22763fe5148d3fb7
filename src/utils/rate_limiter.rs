//! Token bucket rate limiter
//!
//! Limits are configured in requests-per-minute and converted to a
//! per-second refill rate with burst capacity equal to the full minute
//! budget. `wait` is async and cancel-safe: dropping the future gives up
//! the slot without consuming a token.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Token bucket limiter. Internally a mutex-guarded bucket; the lock is
/// never held across an await point.
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter from a requests-per-minute budget.
    ///
    /// rate = rpm / 60 tokens per second, burst = rpm.
    pub fn per_minute(rpm: u32) -> Self {
        let rpm = rpm.max(1);
        Self {
            rate_per_sec: f64::from(rpm) / 60.0,
            burst: f64::from(rpm),
            state: Mutex::new(BucketState { tokens: f64::from(rpm), last_refill: Instant::now() }),
        }
    }

    /// Try to take one token without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Suspend until a token is available.
    pub async fn wait(&self) {
        loop {
            let delay = {
                let mut state = self.state.lock().expect("rate limiter lock poisoned");
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                // Time until the next whole token accrues
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.rate_per_sec)
            };
            tokio::time::sleep(delay).await;
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
            state.last_refill = now;
        }
    }

    /// Tokens currently available (test observability).
    #[cfg(test)]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        self.refill(&mut state);
        state.tokens
    }
}
