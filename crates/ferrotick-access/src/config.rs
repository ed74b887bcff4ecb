//! Construction-time configuration for the access layer.
//!
//! Every struct carries the documented defaults through [`Default`] and can be
//! overridden from the environment with [`AccessConfig::from_env`].
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FERROTICK_ACCESS_MAX_WORKERS` | `batch.max_workers` |
//! | `FERROTICK_ACCESS_TIMEOUT_SECS` | `batch.timeout` |
//! | `FERROTICK_ACCESS_CHUNK_SIZE` | `batch.chunk_size` |
//! | `FERROTICK_ACCESS_CHUNK_DELAY_MS` | `batch.delay_between_chunks` |
//! | `FERROTICK_ACCESS_MAX_PRELOAD_ITEMS` | `cache.max_preload_items` |
//! | `FERROTICK_ACCESS_DEFAULT_TTL_SECS` | `cache.default_ttl` |
//! | `FERROTICK_ACCESS_INITIAL_RATE` | `rate_limiter.initial_rate` |
//! | `FERROTICK_ACCESS_MIN_RATE` | `rate_limiter.min_rate` |
//! | `FERROTICK_ACCESS_MAX_RATE` | `rate_limiter.max_rate` |
//! | `FERROTICK_ACCESS_ADJUSTMENT_FACTOR` | `rate_limiter.adjustment_factor` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retry::Backoff;

const ENV_PREFIX: &str = "FERROTICK_ACCESS_";

/// Settings for [`crate::SmartCache`] and its preload scheduler.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on the preload queue and on keys warmed per `preload_hot_data` call.
    pub max_preload_items: usize,
    /// Base TTL fed into the adaptive TTL computation for every write.
    pub default_ttl: Duration,
    /// Only keys whose next access is predicted within this window are queued.
    pub preload_horizon: Duration,
    /// Pause between two preload fetches of the background worker.
    pub preload_delay: Duration,
    /// Minimum recorded accesses before a key is considered for preloading.
    pub min_accesses_for_preload: u64,
    /// Capacity of each key's access-time ring buffer.
    pub pattern_window: usize,
    /// Bounded wait when joining the worker in `stop_preload`.
    pub stop_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_preload_items: 100,
            default_ttl: Duration::from_secs(300),
            preload_horizon: Duration::from_secs(300),
            preload_delay: Duration::from_millis(100),
            min_accesses_for_preload: 3,
            pattern_window: 100,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pattern_window == 0 {
            return Err(ConfigError::NonPositive {
                field: "pattern_window",
            });
        }
        if self.default_ttl.is_zero() {
            return Err(ConfigError::NonPositive {
                field: "default_ttl",
            });
        }
        Ok(())
    }
}

/// Settings for [`crate::AdaptiveRateLimiter`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Requests per second at construction.
    pub initial_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    /// Relative step applied on each increase or decrease.
    pub adjustment_factor: f64,
    /// Minimum time between two adjustments.
    pub adjust_interval: Duration,
    /// Capacity of the response-time window.
    pub response_window: usize,
    /// Error rate above which the rate is decreased.
    pub decrease_threshold: f64,
    /// Error rate below which the rate may be increased.
    pub increase_threshold: f64,
    /// Mean response time below which the rate may be increased.
    pub fast_response: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial_rate: 10.0,
            min_rate: 1.0,
            max_rate: 50.0,
            adjustment_factor: 0.1,
            adjust_interval: Duration::from_secs(10),
            response_window: 100,
            decrease_threshold: 0.10,
            increase_threshold: 0.01,
            fast_response: Duration::from_millis(500),
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds_hold = self.min_rate > 0.0
            && self.min_rate <= self.initial_rate
            && self.initial_rate <= self.max_rate
            && self.max_rate.is_finite();
        if !bounds_hold {
            return Err(ConfigError::InvalidRateBounds {
                min: self.min_rate,
                initial: self.initial_rate,
                max: self.max_rate,
            });
        }
        if !(self.adjustment_factor > 0.0 && self.adjustment_factor < 1.0) {
            return Err(ConfigError::InvalidAdjustmentFactor {
                value: self.adjustment_factor,
            });
        }
        if self.response_window == 0 {
            return Err(ConfigError::NonPositive {
                field: "response_window",
            });
        }
        Ok(())
    }
}

/// Settings for [`crate::BatchExecutor`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum items in flight per batch call.
    pub max_workers: usize,
    /// Global wait bound for one batch call.
    pub timeout: Duration,
    pub chunk_size: usize,
    pub delay_between_chunks: Duration,
    /// Delay awaited before each retry round.
    #[serde(skip)]
    pub retry_backoff: Backoff,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            timeout: Duration::from_secs(30),
            chunk_size: 50,
            delay_between_chunks: Duration::from_millis(500),
            retry_backoff: Backoff::none(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::NonPositive {
                field: "max_workers",
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::NonPositive {
                field: "chunk_size",
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NonPositive { field: "timeout" });
        }
        Ok(())
    }
}

/// Aggregate configuration for the whole access layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub cache: CacheConfig,
    pub rate_limiter: RateLimiterConfig,
    pub batch: BatchConfig,
}

impl AccessConfig {
    /// Defaults overridden by any `FERROTICK_ACCESS_*` variables present.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`AccessConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some(value) = read("MAX_WORKERS") {
            config.batch.max_workers = parse_env(value)?;
        }
        if let Some(value) = read("TIMEOUT_SECS") {
            config.batch.timeout = Duration::from_secs(parse_env(value)?);
        }
        if let Some(value) = read("CHUNK_SIZE") {
            config.batch.chunk_size = parse_env(value)?;
        }
        if let Some(value) = read("CHUNK_DELAY_MS") {
            config.batch.delay_between_chunks = Duration::from_millis(parse_env(value)?);
        }
        if let Some(value) = read("MAX_PRELOAD_ITEMS") {
            config.cache.max_preload_items = parse_env(value)?;
        }
        if let Some(value) = read("DEFAULT_TTL_SECS") {
            config.cache.default_ttl = Duration::from_secs(parse_env(value)?);
        }
        if let Some(value) = read("INITIAL_RATE") {
            config.rate_limiter.initial_rate = parse_env(value)?;
        }
        if let Some(value) = read("MIN_RATE") {
            config.rate_limiter.min_rate = parse_env(value)?;
        }
        if let Some(value) = read("MAX_RATE") {
            config.rate_limiter.max_rate = parse_env(value)?;
        }
        if let Some(value) = read("ADJUSTMENT_FACTOR") {
            config.rate_limiter.adjustment_factor = parse_env(value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.rate_limiter.validate()?;
        self.batch.validate()
    }
}

fn parse_env<T: FromStr>((name, value): (String, String)) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue { name, value })
}
