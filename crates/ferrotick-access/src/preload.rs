//! Predictive preload scheduling and the single background preload worker.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::AccessError;
use crate::smart_cache::Shared;

/// Boxed future returned by a [`Preloader`].
pub type LoadFuture<V> = Pin<Box<dyn Future<Output = Result<Option<V>, AccessError>> + Send>>;

/// Fetches the value of a key ahead of demand.
///
/// Implemented for any `Fn(String) -> impl Future<Output = Result<Option<V>, AccessError>>`.
/// `Ok(None)` means the provider has nothing for the key and nothing is stored.
pub trait Preloader<V>: Send + Sync {
    fn load(&self, key: String) -> LoadFuture<V>;
}

impl<V, F, Fut> Preloader<V> for F
where
    V: 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<V>, AccessError>> + Send + 'static,
{
    fn load(&self, key: String) -> LoadFuture<V> {
        Box::pin(self(key))
    }
}

/// Queue entry: a key expected to be requested at `predicted_time`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadCandidate {
    pub predicted_time: Instant,
    pub key: String,
}

impl Ord for PreloadCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.predicted_time
            .cmp(&other.predicted_time)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for PreloadCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of candidates, earliest predicted time on top.
#[derive(Debug, Default)]
pub(crate) struct PreloadQueue {
    heap: BinaryHeap<Reverse<PreloadCandidate>>,
}

impl PreloadQueue {
    pub(crate) fn replace(&mut self, candidates: Vec<PreloadCandidate>) {
        self.heap = candidates.into_iter().map(Reverse).collect();
    }

    pub(crate) fn pop(&mut self) -> Option<PreloadCandidate> {
        self.heap.pop().map(|Reverse(candidate)| candidate)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Recomputes the preload queue from current access patterns.
///
/// Keys need at least `min_accesses_for_preload` accesses, a predicted next
/// access strictly inside `(now, now + preload_horizon)` and no entry in the
/// base store. The queue is replaced, never merged. Returns the new length.
pub(crate) async fn schedule_pass<V>(shared: &Shared<V>) -> usize
where
    V: Clone + Send + Sync + 'static,
{
    let now = Instant::now();
    let horizon = now + shared.config.preload_horizon;
    let min_accesses = shared.config.min_accesses_for_preload;

    let mut predicted = shared.with_state(|state| {
        state
            .patterns
            .values()
            .filter(|pattern| pattern.access_count() >= min_accesses)
            .filter_map(|pattern| {
                let predicted_time = pattern.predict_next_access()?;
                (predicted_time > now && predicted_time < horizon).then(|| PreloadCandidate {
                    predicted_time,
                    key: pattern.key().to_owned(),
                })
            })
            .collect::<Vec<_>>()
    });
    predicted.sort();

    let mut candidates = Vec::with_capacity(predicted.len().min(shared.config.max_preload_items));
    for candidate in predicted {
        if candidates.len() >= shared.config.max_preload_items {
            break;
        }
        if !shared.contains(&candidate.key).await {
            candidates.push(candidate);
        }
    }

    let queued = candidates.len();
    shared.with_state(|state| state.queue.replace(candidates));
    if queued > 0 {
        debug!(queued, "preload queue recomputed");
    }
    queued
}

/// Background loop: drains the queue one key at a time until it is empty or
/// `stop` fires. An in-flight load is dropped when `stop` fires.
pub(crate) async fn run_worker<V>(
    shared: Arc<Shared<V>>,
    loader: Arc<dyn Preloader<V>>,
    mut stop: watch::Receiver<bool>,
) where
    V: Clone + Send + Sync + 'static,
{
    debug!("preload worker started");
    loop {
        if *stop.borrow() {
            break;
        }

        let next = shared.with_state(|state| {
            let next = state.queue.pop();
            if next.is_none() {
                state.worker_running = false;
            }
            next
        });
        let Some(candidate) = next else {
            break;
        };

        if shared.contains(&candidate.key).await {
            continue;
        }

        let loaded = tokio::select! {
            _ = stop.changed() => break,
            loaded = loader.load(candidate.key.clone()) => loaded,
        };
        match loaded {
            Ok(Some(value)) => shared.store_value(candidate.key, value).await,
            Ok(None) => {}
            Err(error) => {
                warn!(key = %candidate.key, %error, "preload failed, skipping key");
            }
        }

        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(shared.config.preload_delay) => {}
        }
    }
    debug!("preload worker stopped");
}

/// Owned handle of the background worker plus its cancellation signal.
#[derive(Debug)]
pub(crate) struct PreloadWorker {
    handle: Option<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
    stopped: bool,
}

impl PreloadWorker {
    pub(crate) fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            handle: None,
            stop_tx,
            stopped: false,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns a worker unless one is still draining the queue or the worker
    /// was stopped.
    ///
    /// A worker that already found the queue empty may not have finished yet,
    /// so liveness of the handle alone is not enough: the claim in
    /// `CacheState::worker_running` decides.
    pub(crate) fn ensure_running<V>(&mut self, shared: &Arc<Shared<V>>, loader: &Arc<dyn Preloader<V>>) -> bool
    where
        V: Clone + Send + Sync + 'static,
    {
        if self.stopped {
            return false;
        }

        let alive = self.is_active();
        let claimed = shared.with_state(|state| {
            if state.worker_running && alive {
                return false;
            }
            state.worker_running = true;
            true
        });
        if !claimed {
            return false;
        }

        let worker = run_worker(Arc::clone(shared), Arc::clone(loader), self.stop_tx.subscribe());
        self.handle = Some(tokio::spawn(worker));
        true
    }

    /// Fires the stop signal and hands back the handle to join, if any.
    pub(crate) fn begin_stop(&mut self) -> Option<JoinHandle<()>> {
        self.stopped = true;
        self.stop_tx.send_replace(true);
        self.handle.take()
    }
}

impl Drop for PreloadWorker {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::CacheStore;
    use std::time::Duration;

    fn shared() -> Arc<Shared<String>> {
        Arc::new(Shared::new(
            Arc::new(CacheStore::<String>::with_default_ttl()),
            CacheConfig::default(),
        ))
    }

    fn empty_loader() -> Arc<dyn Preloader<String>> {
        Arc::new(|_key: String| async { Ok::<Option<String>, AccessError>(None) })
    }

    #[test]
    fn queue_pops_earliest_prediction_first() {
        let now = Instant::now();
        let mut queue = PreloadQueue::default();
        queue.replace(vec![
            PreloadCandidate {
                predicted_time: now + Duration::from_secs(30),
                key: String::from("late"),
            },
            PreloadCandidate {
                predicted_time: now + Duration::from_secs(5),
                key: String::from("soon"),
            },
            PreloadCandidate {
                predicted_time: now + Duration::from_secs(10),
                key: String::from("middle"),
            },
        ]);

        assert_eq!(queue.len(), 3);
        let order = std::iter::from_fn(|| queue.pop())
            .map(|candidate| candidate.key)
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["soon", "middle", "late"]);
    }

    #[test]
    fn replace_discards_previous_contents() {
        let now = Instant::now();
        let mut queue = PreloadQueue::default();
        queue.replace(vec![PreloadCandidate {
            predicted_time: now,
            key: String::from("old"),
        }]);
        queue.replace(Vec::new());

        assert_eq!(queue.len(), 0);
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn worker_releases_its_claim_when_queue_is_empty() {
        let shared = shared();
        shared.with_state(|state| state.worker_running = true);
        let (_stop_tx, stop_rx) = watch::channel(false);

        run_worker(Arc::clone(&shared), empty_loader(), stop_rx).await;

        assert!(!shared.with_state(|state| state.worker_running));
    }

    #[tokio::test]
    async fn exiting_worker_does_not_block_a_new_spawn() {
        let shared = shared();
        let loader = empty_loader();
        let mut worker = PreloadWorker::new();
        // Released its claim but has not finished yet.
        worker.handle = Some(tokio::spawn(std::future::pending::<()>()));
        assert!(worker.is_active());

        assert!(worker.ensure_running(&shared, &loader));
        assert!(!worker.ensure_running(&shared, &loader));

        worker.begin_stop();
        assert!(!worker.ensure_running(&shared, &loader));
    }
}
