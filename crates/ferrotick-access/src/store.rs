//! Base key-value store contract and the default in-memory TTL store.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Boxed future returned by [`KeyValueStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Key-value store wrapped by [`crate::SmartCache`].
///
/// `get` returns `None` for absent or expired entries. `set` with a `ttl` of
/// `None` uses the store's own default expiry.
pub trait KeyValueStore<V>: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<V>>;

    fn set<'a>(&'a self, key: String, value: V, ttl: Option<Duration>) -> StoreFuture<'a, ()>;
}

#[derive(Debug, Clone)]
struct Expiring<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Expiring<V> {
    fn live_at(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

/// In-memory [`KeyValueStore`] with per-entry expiry.
///
/// Clones share the same entries. A write whose effective TTL is zero is a
/// no-op, so a zero default TTL disables only writes that pass no TTL.
#[derive(Debug, Clone)]
pub struct CacheStore<V> {
    entries: Arc<RwLock<HashMap<String, Expiring<V>>>>,
    default_ttl: Duration,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::default(),
            default_ttl,
        }
    }

    /// Store with a default TTL of 5 minutes.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(300))
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.live_at(now))
            .map(|entry| entry.value.clone())
    }

    /// Inserts or overwrites `key`, expiring after `ttl` or the store default.
    pub async fn put(&self, key: String, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key, Expiring { value, expires_at });
    }

    pub async fn remove(&self, key: &str) -> Option<V> {
        self.entries
            .write()
            .await
            .remove(key)
            .map(|entry| entry.value)
    }

    /// Drops entries whose expiry has passed.
    pub async fn clear_expired(&self) {
        let now = Instant::now();
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.live_at(now));
    }

    /// Number of entries, including expired ones not yet cleared.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<V> KeyValueStore<V> for CacheStore<V>
where
    V: Clone + Send + Sync,
{
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<V>> {
        Box::pin(CacheStore::get(self, key))
    }

    fn set<'a>(&'a self, key: String, value: V, ttl: Option<Duration>) -> StoreFuture<'a, ()> {
        Box::pin(self.put(key, value, ttl))
    }
}
