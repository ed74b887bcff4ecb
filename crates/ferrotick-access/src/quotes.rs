//! Cached, rate-controlled quote fetching.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::time::Instant;

use crate::batch::{BatchExecutor, BatchResult};
use crate::config::AccessConfig;
use crate::error::AccessError;
use crate::rate_limiter::AdaptiveRateLimiter;
use crate::smart_cache::SmartCache;
use crate::store::CacheStore;
use crate::{Quote, Symbol};

const QUOTE_NAMESPACE: &str = "quote";

/// Boxed future returned by provider sources.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AccessError>> + Send + 'a>>;

/// Provider-specific quote lookup. `Ok(None)` means the provider knows no quote.
pub trait QuoteSource: Send + Sync {
    fn fetch_quote<'a>(&'a self, symbol: &'a Symbol) -> SourceFuture<'a, Option<Quote>>;
}

/// Quote reads through [`SmartCache`], with misses sent to the provider under
/// an [`AdaptiveRateLimiter`].
pub struct QuoteFetcher {
    cache: SmartCache<Quote>,
    executor: BatchExecutor,
    limiter: Arc<AdaptiveRateLimiter>,
    source: Arc<dyn QuoteSource>,
    max_retries: u32,
}

impl QuoteFetcher {
    pub fn new(source: Arc<dyn QuoteSource>, config: &AccessConfig) -> Self {
        let limiter = Arc::new(AdaptiveRateLimiter::new(config.rate_limiter.clone()));
        let store = Arc::new(CacheStore::<Quote>::new(config.cache.default_ttl));

        let preload_source = Arc::clone(&source);
        let preload_limiter = Arc::clone(&limiter);
        let cache = SmartCache::new(store, config.cache.clone()).with_preloader(move |key: String| {
            let source = Arc::clone(&preload_source);
            let limiter = Arc::clone(&preload_limiter);
            async move {
                let symbol = symbol_from_key(&key)?;
                limiter.execute(source.fetch_quote(&symbol)).await
            }
        });

        Self {
            cache,
            executor: BatchExecutor::new(config.batch.clone()),
            limiter,
            source,
            max_retries: 2,
        }
    }

    /// Retry rounds used by [`QuoteFetcher::quotes`]. Defaults to 2.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn cache(&self) -> &SmartCache<Quote> {
        &self.cache
    }

    pub fn limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    pub async fn quote(&self, symbol: &Symbol) -> Result<Option<Quote>, AccessError> {
        let key = symbol.cache_key(QUOTE_NAMESPACE);
        self.cache
            .get_or_fetch(&key, || self.limiter.execute(self.source.fetch_quote(symbol)))
            .await
    }

    /// Quotes for `symbols`: cache hits are served directly, misses are fetched
    /// in rate-friendly chunks with retry and written back to the cache.
    pub async fn quotes(&self, symbols: Vec<Symbol>) -> BatchResult<Symbol, Quote> {
        let started = Instant::now();
        let mut success = HashMap::new();
        let mut misses = Vec::new();

        for symbol in symbols {
            if success.contains_key(&symbol) {
                continue;
            }
            match self.cache.get(&symbol.cache_key(QUOTE_NAMESPACE)).await {
                Some(quote) => {
                    success.insert(symbol, quote);
                }
                None => misses.push(symbol),
            }
        }

        let source = Arc::clone(&self.source);
        let limiter = Arc::clone(&self.limiter);
        let batch = self.executor.config().clone();
        let fetched = self
            .executor
            .batch_execute_chunked_with_retry_keyed(
                misses,
                Symbol::clone,
                move |symbol: Symbol| {
                    let source = Arc::clone(&source);
                    let limiter = Arc::clone(&limiter);
                    async move {
                        limiter
                            .execute(source.fetch_quote(&symbol))
                            .await?
                            .ok_or_else(|| AccessError::fetch(symbol.as_str(), "no quote returned"))
                    }
                },
                batch.chunk_size,
                batch.delay_between_chunks,
                self.max_retries,
            )
            .await;

        for (symbol, quote) in &fetched.success {
            self.cache
                .set(&symbol.cache_key(QUOTE_NAMESPACE), quote.clone())
                .await;
        }
        success.extend(fetched.success);

        BatchResult::new(success, fetched.failed, started.elapsed())
    }

    /// Stops the background preload worker.
    pub async fn shutdown(&self) {
        self.cache.stop_preload().await;
    }
}

fn symbol_from_key(key: &str) -> Result<Symbol, AccessError> {
    let raw = key
        .strip_prefix(QUOTE_NAMESPACE)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(key);
    Ok(Symbol::parse(raw)?)
}
