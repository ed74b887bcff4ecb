//! # Ferrotick Access
//!
//! Adaptive data-access layer between Ferrotick and its rate-limited market
//! data providers.
//!
//! ## Overview
//!
//! - **Smart caching** with per-key adaptive TTLs and hot-key ranking
//! - **Predictive preloading** of keys whose next access is statistically near
//! - **Feedback-controlled rate limiting** driven by errors and latency
//! - **Batch execution** over a bounded worker pool with retry and chunking
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Concurrent batch executor and [`BatchResult`] |
//! | [`config`] | Configuration defaults, validation, env overrides |
//! | [`domain`] | Domain models (Quote, Bar, Symbol) |
//! | [`error`] | Error types |
//! | [`indicators`] | Cached indicator calculator |
//! | [`pattern`] | Per-key access statistics |
//! | [`preload`] | Preload queue and background worker |
//! | [`quotes`] | Cached, rate-controlled quote fetcher |
//! | [`rate_limiter`] | Adaptive rate limiter |
//! | [`retry`] | Backoff between retry rounds |
//! | [`smart_cache`] | Access-aware cache orchestrator |
//! | [`store`] | Base key-value store contract and TTL store |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ferrotick_access::{AccessConfig, QuoteFetcher, Symbol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AccessConfig::from_env()?;
//!     let fetcher = QuoteFetcher::new(Arc::new(MyQuoteSource::default()), &config);
//!
//!     let symbols = vec![Symbol::parse("AAPL")?, Symbol::parse("MSFT")?];
//!     let result = fetcher.quotes(symbols).await;
//!     for (symbol, error) in &result.failed {
//!         eprintln!("{symbol}: {error}");
//!     }
//!
//!     fetcher.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ QuoteFetcher / Indicators    │
//! └──────┬───────────────┬───────┘
//!        │               │
//!        ▼               ▼
//! ┌──────────────┐ ┌──────────────┐     ┌─────────────────────┐
//! │  SmartCache  │ │ BatchExecutor│────▶│ AdaptiveRateLimiter │
//! └──────┬───────┘ └──────────────┘     └─────────────────────┘
//!        │
//!        ├──▶ AccessPattern map ──▶ preload queue ──▶ worker
//!        ▼
//! ┌──────────────┐
//! │ KeyValueStore│
//! └──────────────┘
//! ```

pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod indicators;
pub mod pattern;
pub mod preload;
pub mod quotes;
pub mod rate_limiter;
pub mod retry;
pub mod smart_cache;
pub mod store;

// Batch execution
pub use batch::{BatchExecutor, BatchResult, MAX_RETRIES_EXCEEDED};

// Configuration
pub use config::{AccessConfig, BatchConfig, CacheConfig, RateLimiterConfig};

// Domain models
pub use domain::{validate_currency_code, Bar, Quote, Symbol, UtcDateTime};

// Error types
pub use error::{AccessError, ConfigError, ValidationError};

// Use-case wrappers
pub use indicators::{BarSource, Indicator, IndicatorCalculator};
pub use quotes::{QuoteFetcher, QuoteSource, SourceFuture};

// Caching
pub use pattern::AccessPattern;
pub use preload::{LoadFuture, PreloadCandidate, Preloader};
pub use smart_cache::{CacheStatistics, SmartCache};
pub use store::{CacheStore, KeyValueStore, StoreFuture};

// Rate limiting
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiterSnapshot};

// Retry
pub use retry::Backoff;
