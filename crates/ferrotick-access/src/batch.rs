//! Bounded concurrent batch execution with retry and chunking.
//!
//! Every call returns a [`BatchResult`]; a failing item never aborts the
//! batch. Items are keyed either by themselves or by a caller-supplied key
//! function. Items sharing a key are executed once, for the first occurrence.
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | [`BatchExecutor::batch_execute`] | one concurrent pass over all items |
//! | [`BatchExecutor::batch_execute_with_retry`] | resubmits failures up to `max_retries` rounds |
//! | [`BatchExecutor::batch_execute_chunked`] | sequential chunks with a pause between them |

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::AccessError;

/// Message recorded for items still failing after the last retry round.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Outcome of one batch call.
///
/// Items sharing a key run once, so `success_count + failed_count` counts
/// distinct keys rather than submitted items.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<K: Eq + Hash, R> {
    pub success: HashMap<K, R>,
    pub failed: HashMap<K, String>,
    pub total_time: Duration,
    pub success_count: usize,
    pub failed_count: usize,
}

impl<K: Eq + Hash, R> BatchResult<K, R> {
    pub fn new(success: HashMap<K, R>, failed: HashMap<K, String>, total_time: Duration) -> Self {
        Self {
            success_count: success.len(),
            failed_count: failed.len(),
            success,
            failed,
            total_time,
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new(), HashMap::new(), Duration::ZERO)
    }

    /// `true` when no item failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.success_count + self.failed_count
    }
}

/// Concurrent executor over a bounded worker pool.
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: BatchConfig,
}

impl BatchExecutor {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Runs `func` over `items`, keyed by the items themselves.
    pub async fn batch_execute<T, R, E, F, Fut>(&self, items: Vec<T>, func: F) -> BatchResult<T, R>
    where
        T: Eq + Hash + Clone + Send + 'static,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.batch_execute_keyed(items, T::clone, func).await
    }

    /// Runs `func` over `items` with at most `max_workers` in flight.
    ///
    /// Items not finished when `timeout` elapses are recorded as failed and
    /// their tasks cancelled.
    pub async fn batch_execute_keyed<T, K, R, E, F, Fut, KF>(
        &self,
        items: Vec<T>,
        key_fn: KF,
        func: F,
    ) -> BatchResult<K, R>
    where
        T: Send + 'static,
        K: Eq + Hash + Clone,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        KF: Fn(&T) -> K,
    {
        let func = Arc::new(func);
        self.run(dedupe(items, &key_fn), &func).await
    }

    /// Like [`BatchExecutor::batch_execute`], resubmitting failures.
    pub async fn batch_execute_with_retry<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        func: F,
        max_retries: u32,
    ) -> BatchResult<T, R>
    where
        T: Eq + Hash + Clone + Send + 'static,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.batch_execute_with_retry_keyed(items, T::clone, func, max_retries)
            .await
    }

    /// Runs once, then resubmits only the failing subset for up to
    /// `max_retries` rounds. Items failing every round are recorded with
    /// [`MAX_RETRIES_EXCEEDED`]; successes from any round are kept.
    pub async fn batch_execute_with_retry_keyed<T, K, R, E, F, Fut, KF>(
        &self,
        items: Vec<T>,
        key_fn: KF,
        func: F,
        max_retries: u32,
    ) -> BatchResult<K, R>
    where
        T: Clone + Send + 'static,
        K: Eq + Hash + Clone,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        KF: Fn(&T) -> K,
    {
        let func = Arc::new(func);
        self.run_with_retry(dedupe(items, &key_fn), &func, max_retries)
            .await
    }

    /// Processes `items` in sequential chunks of `chunk_size`, each chunk
    /// concurrently, sleeping `delay_between_chunks` between chunks.
    pub async fn batch_execute_chunked<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        func: F,
        chunk_size: usize,
        delay_between_chunks: Duration,
    ) -> BatchResult<T, R>
    where
        T: Eq + Hash + Clone + Send + 'static,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.batch_execute_chunked_keyed(items, T::clone, func, chunk_size, delay_between_chunks)
            .await
    }

    pub async fn batch_execute_chunked_keyed<T, K, R, E, F, Fut, KF>(
        &self,
        items: Vec<T>,
        key_fn: KF,
        func: F,
        chunk_size: usize,
        delay_between_chunks: Duration,
    ) -> BatchResult<K, R>
    where
        T: Send + 'static,
        K: Eq + Hash + Clone,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        KF: Fn(&T) -> K,
    {
        let func = Arc::new(func);
        let pairs = dedupe(items, &key_fn);
        let started = Instant::now();
        let mut success = HashMap::new();
        let mut failed = HashMap::new();

        let mut chunks = into_chunks(pairs, chunk_size).into_iter().peekable();
        while let Some(chunk) = chunks.next() {
            let result = self.run(chunk, &func).await;
            success.extend(result.success);
            failed.extend(result.failed);

            if chunks.peek().is_some() && !delay_between_chunks.is_zero() {
                tokio::time::sleep(delay_between_chunks).await;
            }
        }

        BatchResult::new(success, failed, started.elapsed())
    }

    /// Chunked execution where every chunk runs with retry semantics.
    #[allow(clippy::too_many_arguments)]
    pub async fn batch_execute_chunked_with_retry_keyed<T, K, R, E, F, Fut, KF>(
        &self,
        items: Vec<T>,
        key_fn: KF,
        func: F,
        chunk_size: usize,
        delay_between_chunks: Duration,
        max_retries: u32,
    ) -> BatchResult<K, R>
    where
        T: Clone + Send + 'static,
        K: Eq + Hash + Clone,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        KF: Fn(&T) -> K,
    {
        let func = Arc::new(func);
        let pairs = dedupe(items, &key_fn);
        let started = Instant::now();
        let mut success = HashMap::new();
        let mut failed = HashMap::new();

        let mut chunks = into_chunks(pairs, chunk_size).into_iter().peekable();
        while let Some(chunk) = chunks.next() {
            let result = self.run_with_retry(chunk, &func, max_retries).await;
            success.extend(result.success);
            failed.extend(result.failed);

            if chunks.peek().is_some() && !delay_between_chunks.is_zero() {
                tokio::time::sleep(delay_between_chunks).await;
            }
        }

        BatchResult::new(success, failed, started.elapsed())
    }

    async fn run_with_retry<T, K, R, E, F, Fut>(
        &self,
        pairs: Vec<(K, T)>,
        func: &Arc<F>,
        max_retries: u32,
    ) -> BatchResult<K, R>
    where
        T: Clone + Send + 'static,
        K: Eq + Hash + Clone,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let started = Instant::now();
        let first = self.run(pairs.clone(), func).await;
        let mut success = first.success;
        let mut failed = first.failed;

        for round in 0..max_retries {
            if failed.is_empty() {
                break;
            }

            let delay = self.config.retry_backoff.delay(round);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let retry = pairs
                .iter()
                .filter(|(key, _)| failed.contains_key(key))
                .cloned()
                .collect::<Vec<_>>();
            debug!(round = round + 1, items = retry.len(), "retrying failed batch items");

            let result = self.run(retry, func).await;
            success.extend(result.success);
            failed = result.failed;
        }

        if !failed.is_empty() {
            warn!(
                failed = failed.len(),
                max_retries, "batch items still failing after retries"
            );
        }
        let failed = failed
            .into_keys()
            .map(|key| (key, String::from(MAX_RETRIES_EXCEEDED)))
            .collect();

        BatchResult::new(success, failed, started.elapsed())
    }

    async fn run<T, K, R, E, F, Fut>(&self, pairs: Vec<(K, T)>, func: &Arc<F>) -> BatchResult<K, R>
    where
        T: Send + 'static,
        K: Eq + Hash + Clone,
        R: Send + 'static,
        E: Display,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let workers = Arc::new(Semaphore::new(self.config.max_workers.max(1)));

        let mut keys = Vec::with_capacity(pairs.len());
        let mut tasks = JoinSet::new();
        for (index, (key, item)) in pairs.into_iter().enumerate() {
            keys.push(key);
            let func = Arc::clone(func);
            let workers = Arc::clone(&workers);
            tasks.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return (index, Err(String::from("worker pool closed")));
                };
                let outcome = func(item).await.map_err(|error| error.to_string());
                (index, outcome)
            });
        }

        let mut outcomes = (0..keys.len()).map(|_| None).collect::<Vec<_>>();
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => outcomes[index] = Some(outcome),
                Ok(Some(Err(join_error))) => {
                    warn!(%join_error, "batch task terminated abnormally");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }
        if timed_out {
            warn!(
                timeout = ?self.config.timeout,
                outstanding = tasks.len(),
                "batch timed out, abandoning outstanding items"
            );
        }
        tasks.abort_all();

        let mut success = HashMap::new();
        let mut failed = HashMap::new();
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(value)) => {
                    success.insert(key, value);
                }
                Some(Err(message)) => {
                    failed.insert(key, message);
                }
                None if timed_out => {
                    failed.insert(key, AccessError::Timeout(self.config.timeout).to_string());
                }
                None => {
                    failed.insert(key, String::from("worker task panicked"));
                }
            }
        }

        BatchResult::new(success, failed, started.elapsed())
    }
}

fn dedupe<T, K, KF>(items: Vec<T>, key_fn: &KF) -> Vec<(K, T)>
where
    K: Eq + Hash + Clone,
    KF: Fn(&T) -> K,
{
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter_map(|item| {
            let key = key_fn(&item);
            seen.insert(key.clone()).then_some((key, item))
        })
        .collect()
}

fn into_chunks<P>(pairs: Vec<P>, chunk_size: usize) -> Vec<Vec<P>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(pairs.len().div_ceil(chunk_size));
    let mut iter = pairs.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }
    chunks
}
