//! Access-aware cache over a [`KeyValueStore`].
//!
//! [`SmartCache`] records every access, derives per-key TTLs from observed
//! access intervals, ranks hot keys, and keeps one background worker warming
//! keys whose next access is predicted to be close.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ferrotick_access::{AccessError, CacheConfig, CacheStore, SmartCache};
//!
//! let cache = SmartCache::new(Arc::new(CacheStore::with_default_ttl()), CacheConfig::default())
//!     .with_preloader(|key: String| async move { Ok::<_, AccessError>(Some(key.len())) });
//!
//! let value = cache
//!     .get_or_fetch("quote:AAPL", || async { Ok::<_, AccessError>(Some(4)) })
//!     .await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::pattern::{rank_hot_keys, AccessPattern};
use crate::preload::{schedule_pass, PreloadQueue, PreloadWorker, Preloader};
use crate::store::KeyValueStore;

const STATISTICS_HOT_KEYS: usize = 10;

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub tracked_keys: usize,
    pub total_accesses: u64,
    /// Up to ten `(key, access_count)` pairs, hottest first.
    pub hot_keys: Vec<(String, u64)>,
    pub preload_queue_size: usize,
    pub preload_worker_active: bool,
}

/// State shared between callers and the preload worker, guarded by one mutex.
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub(crate) patterns: HashMap<String, AccessPattern>,
    pub(crate) queue: PreloadQueue,
    /// Set when a worker is spawned, cleared by the worker in the same
    /// critical section in which it finds the queue empty.
    pub(crate) worker_running: bool,
}

pub(crate) struct Shared<V> {
    pub(crate) store: Arc<dyn KeyValueStore<V>>,
    pub(crate) config: CacheConfig,
    state: Mutex<CacheState>,
}

impl<V> Shared<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(store: Arc<dyn KeyValueStore<V>>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Runs `f` inside the critical section. Never await inside `f`.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .expect("smart cache state lock is not poisoned");
        f(&mut state)
    }

    fn record_access(&self, key: &str) {
        let window = self.config.pattern_window;
        self.with_state(|state| {
            state
                .patterns
                .entry(key.to_owned())
                .or_insert_with(|| AccessPattern::new(key, window))
                .record_access();
        });
    }

    pub(crate) fn adaptive_ttl(&self, key: &str, default_ttl: Duration) -> Duration {
        let interval = self.with_state(|state| {
            state
                .patterns
                .get(key)
                .and_then(AccessPattern::avg_interval)
        });

        match interval {
            Some(interval) if interval < default_ttl / 2 => default_ttl * 3 / 2,
            Some(interval) if interval > default_ttl * 2 => default_ttl * 7 / 10,
            _ => default_ttl,
        }
    }

    pub(crate) async fn contains(&self, key: &str) -> bool {
        self.store.get(key).await.is_some()
    }

    /// Writes `value` with the key's adaptive TTL.
    pub(crate) async fn store_value(&self, key: String, value: V) {
        let ttl = self.adaptive_ttl(&key, self.config.default_ttl);
        self.store.set(key, value, Some(ttl)).await;
    }
}

/// Cache orchestrator owning access patterns and the preload worker.
pub struct SmartCache<V> {
    shared: Arc<Shared<V>>,
    loader: Option<Arc<dyn Preloader<V>>>,
    worker: Mutex<PreloadWorker>,
}

impl<V> SmartCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn KeyValueStore<V>>, config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(store, config)),
            loader: None,
            worker: Mutex::new(PreloadWorker::new()),
        }
    }

    /// Enables predictive preloading and `preload_hot_data` through `loader`.
    pub fn with_preloader(mut self, loader: impl Preloader<V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Cached value for `key`, or `None` on a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.shared.record_access(key);
        let value = self.shared.store.get(key).await;
        self.schedule_preload().await;
        value
    }

    /// Cached value for `key`; on a miss `fetch` is awaited and a `Some`
    /// result is stored before being returned. Fetch errors are returned
    /// unchanged.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        self.shared.record_access(key);
        let result = match self.shared.store.get(key).await {
            Some(value) => Ok(Some(value)),
            None => match fetch().await {
                Ok(Some(value)) => {
                    self.shared.store_value(key.to_owned(), value.clone()).await;
                    Ok(Some(value))
                }
                other => other,
            },
        };
        self.schedule_preload().await;
        result
    }

    /// Writes `value` with its adaptive TTL without recording an access.
    pub async fn set(&self, key: &str, value: V) {
        self.shared.store_value(key.to_owned(), value).await;
    }

    /// TTL for `key` scaled by how often it is revisited.
    ///
    /// Needs at least two recorded accesses. An average interval below half of
    /// `default_ttl` yields 1.5x, above twice `default_ttl` yields 0.7x.
    pub fn get_adaptive_ttl(&self, key: &str, default_ttl: Duration) -> Duration {
        self.shared.adaptive_ttl(key, default_ttl)
    }

    pub fn get_hot_keys(&self, top_n: usize) -> Vec<String> {
        self.shared.with_state(|state| {
            rank_hot_keys(&state.patterns, top_n)
                .into_iter()
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Loads up to `max_preload_items` of `hot_keys` that are absent from the
    /// store. Failing keys are logged and skipped. Returns the number stored.
    pub async fn preload_hot_data(&self, hot_keys: &[String]) -> usize {
        let Some(loader) = self.loader.as_ref() else {
            debug!("preload requested without a preloader");
            return 0;
        };

        let mut stored = 0;
        for key in hot_keys.iter().take(self.shared.config.max_preload_items) {
            if self.shared.contains(key).await {
                continue;
            }

            match loader.load(key.clone()).await {
                Ok(Some(value)) => {
                    self.shared.store_value(key.clone(), value).await;
                    stored += 1;
                }
                Ok(None) => {}
                Err(error) => warn!(%key, %error, "hot key preload failed, skipping"),
            }
        }
        stored
    }

    pub fn get_statistics(&self) -> CacheStatistics {
        let (tracked_keys, total_accesses, hot_keys, preload_queue_size) =
            self.shared.with_state(|state| {
                (
                    state.patterns.len(),
                    state
                        .patterns
                        .values()
                        .map(AccessPattern::access_count)
                        .sum::<u64>(),
                    rank_hot_keys(&state.patterns, STATISTICS_HOT_KEYS),
                    state.queue.len(),
                )
            });

        CacheStatistics {
            tracked_keys,
            total_accesses,
            hot_keys,
            preload_queue_size,
            preload_worker_active: self.lock_worker().is_active(),
        }
    }

    /// Stops the background worker, waiting at most `stop_timeout` for it to
    /// exit. Later calls are no-ops and no new worker is started afterwards.
    pub async fn stop_preload(&self) {
        let Some(mut handle) = self.lock_worker().begin_stop() else {
            return;
        };

        let timeout = self.shared.config.stop_timeout;
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            warn!(?timeout, "preload worker did not stop in time, aborting");
            handle.abort();
        }
    }

    async fn schedule_preload(&self) {
        let Some(loader) = self.loader.as_ref() else {
            return;
        };

        if schedule_pass(&self.shared).await == 0 {
            return;
        }

        if self.lock_worker().ensure_running(&self.shared, loader) {
            debug!("preload worker spawned");
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, PreloadWorker> {
        self.worker
            .lock()
            .expect("preload worker lock is not poisoned")
    }
}
