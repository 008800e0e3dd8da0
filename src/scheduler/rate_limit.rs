//! Rate limit state for coordinated backoff.
//!
//! When the classification service answers with a retry-after hint, every
//! in-flight task backs off together instead of hammering the endpoint.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::warn;

/// Global rate limit state shared by all classification tasks.
#[derive(Debug, Default)]
pub struct RateLimitState {
    /// When calls may resume (None = no active limit).
    pub backoff_until: Option<Instant>,
    /// Number of consecutive rate limit hits.
    pub consecutive_hits: u32,
    /// Last successful call time.
    pub last_success: Option<Instant>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_rate_limited(&self) -> bool {
        self.backoff_until.map(|until| Instant::now() < until).unwrap_or(false)
    }

    /// Remaining backoff duration if rate limited.
    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.backoff_until.and_then(|until| {
            let now = Instant::now();
            if now < until { Some(until - now) } else { None }
        })
    }

    /// Record a rate limit response.
    ///
    /// The delay is the larger of the service's retry-after and
    /// 2^consecutive_hits seconds, capped at `max_delay`. An earlier,
    /// longer backoff is never shortened.
    pub fn record_rate_limit(&mut self, retry_after: Duration, max_delay: Duration) {
        self.consecutive_hits += 1;

        let exp_backoff = Duration::from_secs(2u64.pow(self.consecutive_hits.min(6)));
        let delay = retry_after.max(exp_backoff).min(max_delay);

        let until = Instant::now() + delay;
        if self.backoff_until.is_none_or(|current| current < until) {
            self.backoff_until = Some(until);
        }

        warn!(
            "Rate limited, backing off globally for {}s (consecutive hits: {})",
            delay.as_secs(),
            self.consecutive_hits
        );
    }

    /// Record a successful call: clears the backoff and the hit counter.
    pub fn record_success(&mut self) {
        self.consecutive_hits = 0;
        self.backoff_until = None;
        self.last_success = Some(Instant::now());
    }
}

/// Handle shared between the scheduler and its tasks
#[derive(Debug, Clone, Default)]
pub struct SharedRateLimit(Arc<Mutex<RateLimitState>>);

impl SharedRateLimit {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut RateLimitState) -> T) -> T {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.with(|s| s.remaining_backoff())
    }

    pub fn record_rate_limit(&self, retry_after: Duration, max_delay: Duration) {
        self.with(|s| s.record_rate_limit(retry_after, max_delay));
    }

    pub fn record_success(&self) {
        self.with(|s| s.record_success());
    }

    pub fn is_rate_limited(&self) -> bool {
        self.with(|s| s.is_rate_limited())
    }
}
