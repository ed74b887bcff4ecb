//! Feedback-controlled outbound rate limiting.
//!
//! [`AdaptiveRateLimiter`] lowers its rate when providers start failing and
//! raises it again while calls are fast and clean. The current rate is
//! enforced through a `governor` limiter rebuilt on every change. A rebuilt
//! limiter starts with its burst spent, so a rate change never grants a
//! fresh burst of immediate calls.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RateLimiterConfig;
use crate::error::ConfigError;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Point-in-time view of limiter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterSnapshot {
    pub current_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_response_time: Option<Duration>,
}

struct RateLimiterState {
    current_rate: f64,
    success_count: u64,
    error_count: u64,
    recent_response_times: VecDeque<Duration>,
    last_adjust_time: Instant,
    limiter: Arc<DirectRateLimiter>,
}

impl RateLimiterState {
    fn avg_response_time(&self) -> Option<Duration> {
        if self.recent_response_times.is_empty() {
            return None;
        }
        let total: Duration = self.recent_response_times.iter().sum();
        Some(total / self.recent_response_times.len() as u32)
    }
}

/// Outbound rate controller driven by success, error and latency feedback.
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    state: Mutex<RateLimiterState>,
}

impl std::fmt::Debug for AdaptiveRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRateLimiter")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl AdaptiveRateLimiter {
    /// Validates `config` before building the limiter.
    pub fn try_new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// The initial rate is clamped into `[min_rate, max_rate]`.
    ///
    /// Panics if `min_rate > max_rate`; use [`AdaptiveRateLimiter::try_new`]
    /// for untrusted configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        let current_rate = config.initial_rate.clamp(config.min_rate, config.max_rate);
        Self {
            state: Mutex::new(RateLimiterState {
                current_rate,
                success_count: 0,
                error_count: 0,
                recent_response_times: VecDeque::with_capacity(config.response_window),
                last_adjust_time: Instant::now(),
                limiter: Arc::new(RateLimiter::direct(quota_from_rate(current_rate))),
            }),
            config,
        }
    }

    pub fn record_success(&self, response_time: Duration) {
        let mut state = self.lock();
        state.success_count = state.success_count.saturating_add(1);
        if state.recent_response_times.len() >= self.config.response_window {
            state.recent_response_times.pop_front();
        }
        state.recent_response_times.push_back(response_time);
        self.maybe_adjust(&mut state);
    }

    pub fn record_error(&self) {
        let mut state = self.lock();
        state.error_count = state.error_count.saturating_add(1);
        self.maybe_adjust(&mut state);
    }

    /// Requests per second currently allowed.
    pub fn get_current_rate(&self) -> f64 {
        self.lock().current_rate
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let state = self.lock();
        RateLimiterSnapshot {
            current_rate: state.current_rate,
            min_rate: self.config.min_rate,
            max_rate: self.config.max_rate,
            success_count: state.success_count,
            error_count: state.error_count,
            avg_response_time: state.avg_response_time(),
        }
    }

    /// Waits until the current rate allows one more call.
    ///
    /// A waiter whose limiter was replaced while it slept waits again on the
    /// replacement.
    pub async fn acquire(&self) {
        loop {
            let limiter = Arc::clone(&self.lock().limiter);
            limiter.until_ready().await;
            if Arc::ptr_eq(&limiter, &self.lock().limiter) {
                return;
            }
        }
    }

    /// Non-blocking variant of [`AdaptiveRateLimiter::acquire`].
    pub fn try_acquire(&self) -> bool {
        self.lock().limiter.check().is_ok()
    }

    /// Runs `call` under the limiter and feeds its outcome back.
    ///
    /// `Ok` records a success with the measured latency, `Err` records an error.
    pub async fn execute<T, E, Fut>(&self, call: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire().await;
        let started = Instant::now();
        let result = call.await;
        match &result {
            Ok(_) => self.record_success(started.elapsed()),
            Err(_) => self.record_error(),
        }
        result
    }

    fn maybe_adjust(&self, state: &mut RateLimiterState) {
        let now = Instant::now();
        if now.saturating_duration_since(state.last_adjust_time) < self.config.adjust_interval {
            return;
        }

        let total = state.success_count + state.error_count;
        if total > 0 {
            let error_rate = state.error_count as f64 / total as f64;
            let previous = state.current_rate;

            if error_rate > self.config.decrease_threshold {
                state.current_rate =
                    (previous * (1.0 - self.config.adjustment_factor)).max(self.config.min_rate);
            } else if error_rate < self.config.increase_threshold
                && state
                    .avg_response_time()
                    .is_some_and(|avg| avg < self.config.fast_response)
            {
                state.current_rate =
                    (previous * (1.0 + self.config.adjustment_factor)).min(self.config.max_rate);
            }

            if state.current_rate != previous {
                state.limiter = drained_limiter(quota_from_rate(state.current_rate));
                info!(
                    previous,
                    current = state.current_rate,
                    error_rate,
                    "outbound rate adjusted"
                );
            } else {
                debug!(rate = previous, error_rate, "outbound rate unchanged");
            }
        }

        state.success_count = 0;
        state.error_count = 0;
        state.last_adjust_time = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateLimiterState> {
        self.state
            .lock()
            .expect("rate limiter lock is not poisoned")
    }
}

/// Quota releasing one cell every `1 / rate` seconds with a burst of `rate` cells.
fn quota_from_rate(rate: f64) -> Quota {
    let safe_rate = if rate.is_finite() { rate.max(0.001) } else { 1.0 };
    let burst = NonZeroU32::new(safe_rate.floor().max(1.0).min(f64::from(u32::MAX)) as u32)
        .unwrap_or(NonZeroU32::MIN);

    let period = Duration::from_secs_f64((1.0 / safe_rate).max(0.000_001));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// Limiter for `quota` with its whole burst already consumed.
fn drained_limiter(quota: Quota) -> Arc<DirectRateLimiter> {
    let limiter = RateLimiter::direct(quota);
    // A fresh limiter always has capacity for exactly one burst.
    let _ = limiter.check_n(quota.burst_size());
    Arc::new(limiter)
}
