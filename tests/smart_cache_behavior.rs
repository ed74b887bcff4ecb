//! Behavior-driven tests for SmartCache
//!
//! These tests verify HOW the cache tracks access patterns, warms hot keys
//! and manages its background preload worker.

use ferrotick_access::{AccessError, CacheConfig, CacheStore, KeyValueStore, SmartCache};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn counting_cache(
    store: Arc<CacheStore<String>>,
    calls: Arc<Mutex<Vec<String>>>,
    config: CacheConfig,
) -> SmartCache<String> {
    SmartCache::new(store, config).with_preloader(move |key: String| {
        let calls = Arc::clone(&calls);
        async move {
            calls.lock().expect("calls lock").push(key.clone());
            if key.starts_with("broken") {
                return Err(AccessError::fetch(key, "provider returned 500"));
            }
            Ok(Some(format!("value-of-{key}")))
        }
    })
}

// =============================================================================
// Hot-data preloading
// =============================================================================

#[tokio::test]
async fn when_hot_key_is_already_cached_preload_does_not_call_provider() {
    // Given: A store that already holds one of the hot keys
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    store
        .put(String::from("quote:AAPL"), String::from("cached"), None)
        .await;
    let calls = Arc::new(Mutex::new(Vec::new()));
    let cache = counting_cache(Arc::clone(&store), Arc::clone(&calls), CacheConfig::default());

    // When: Both keys are preloaded
    let stored = cache
        .preload_hot_data(&[String::from("quote:AAPL"), String::from("quote:MSFT")])
        .await;

    // Then: Only the absent key reaches the provider
    assert_eq!(stored, 1);
    assert_eq!(*calls.lock().expect("calls lock"), vec![String::from("quote:MSFT")]);
    assert_eq!(store.get("quote:AAPL").await.as_deref(), Some("cached"));
    assert_eq!(
        store.get("quote:MSFT").await.as_deref(),
        Some("value-of-quote:MSFT")
    );
}

#[tokio::test]
async fn when_one_preload_fails_remaining_keys_are_still_loaded() {
    // Given: A provider failing for one key
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let cache = counting_cache(Arc::clone(&store), Arc::clone(&calls), CacheConfig::default());

    // When: A batch containing the failing key is preloaded
    let keys = ["a", "broken-b", "c"].map(String::from);
    let stored = cache.preload_hot_data(&keys).await;

    // Then: The failure is skipped and the other keys are stored
    assert_eq!(stored, 2);
    assert_eq!(calls.lock().expect("calls lock").len(), 3);
    assert!(store.get("a").await.is_some());
    assert!(store.get("broken-b").await.is_none());
    assert!(store.get("c").await.is_some());
}

#[tokio::test]
async fn when_more_hot_keys_than_limit_only_limit_is_preloaded() {
    // Given: A cache capped at two preload items
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let config = CacheConfig {
        max_preload_items: 2,
        ..CacheConfig::default()
    };
    let cache = counting_cache(store, Arc::clone(&calls), config);

    // When: Five keys are requested
    let keys = ["k1", "k2", "k3", "k4", "k5"].map(String::from);
    let stored = cache.preload_hot_data(&keys).await;

    // Then: Only the first two are loaded
    assert_eq!(stored, 2);
    assert_eq!(
        *calls.lock().expect("calls lock"),
        vec![String::from("k1"), String::from("k2")]
    );
}

#[tokio::test]
async fn preload_without_preloader_is_a_no_op() {
    let cache: SmartCache<String> =
        SmartCache::new(Arc::new(CacheStore::<String>::with_default_ttl()), CacheConfig::default());

    assert_eq!(cache.preload_hot_data(&[String::from("k")]).await, 0);
}

// =============================================================================
// Predictive preloading
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_key_is_accessed_regularly_worker_warms_it_before_next_request() {
    // Given: A cache whose key is read every 10 seconds but never stored
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let cache = counting_cache(Arc::clone(&store), Arc::clone(&calls), CacheConfig::default());

    assert_eq!(cache.get("quote:TSLA").await, None);
    for _ in 0..2 {
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("quote:TSLA").await, None);
    }

    // When: The background worker gets a chance to run
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Then: The key was preloaded exactly once and is now served from the store
    assert_eq!(*calls.lock().expect("calls lock"), vec![String::from("quote:TSLA")]);
    assert_eq!(
        store.get("quote:TSLA").await.as_deref(),
        Some("value-of-quote:TSLA")
    );

    let stats = cache.get_statistics();
    assert_eq!(stats.preload_queue_size, 0);
    assert!(!stats.preload_worker_active);
    cache.stop_preload().await;
}

#[tokio::test(start_paused = true)]
async fn keys_with_fewer_than_three_accesses_are_not_preloaded() {
    // Given: A key accessed only twice
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let cache = counting_cache(store, Arc::clone(&calls), CacheConfig::default());

    cache.get("rare").await;
    tokio::time::advance(Duration::from_secs(5)).await;
    cache.get("rare").await;

    // When: Time passes
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Then: Nothing was preloaded
    assert!(calls.lock().expect("calls lock").is_empty());
    assert_eq!(cache.get_statistics().preload_queue_size, 0);
}

#[tokio::test(start_paused = true)]
async fn after_stop_no_new_worker_is_started() {
    // Given: A cache whose preloading was stopped
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let cache = counting_cache(store, Arc::clone(&calls), CacheConfig::default());
    cache.stop_preload().await;

    // When: A key becomes predictable
    for _ in 0..4 {
        cache.get("k").await;
        tokio::time::advance(Duration::from_secs(10)).await;
    }
    cache.get("k").await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Then: The queue is computed but never drained
    let stats = cache.get_statistics();
    assert!(!stats.preload_worker_active);
    assert_eq!(stats.preload_queue_size, 1);
    assert!(calls.lock().expect("calls lock").is_empty());

    // And: Stopping again is harmless
    cache.stop_preload().await;
}

#[tokio::test(start_paused = true)]
async fn stop_preload_interrupts_a_running_worker() {
    // Given: A worker stuck in a slow provider call
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let base = Arc::clone(&store) as Arc<dyn KeyValueStore<String>>;
    let cache = SmartCache::new(base, CacheConfig::default()).with_preloader(move |key: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, AccessError>(Some(key))
        }
    });

    cache.get("quote:SLOW").await;
    for _ in 0..2 {
        tokio::time::advance(Duration::from_secs(10)).await;
        cache.get("quote:SLOW").await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(cache.get_statistics().preload_worker_active);

    // When: Preloading is stopped
    let stop_timeout = cache.config().stop_timeout;
    let begun = Instant::now();
    cache.stop_preload().await;

    // Then: It returns well within stop_timeout and the worker is gone
    assert!(begun.elapsed() < stop_timeout);
    assert!(!cache.get_statistics().preload_worker_active);

    // And: The interrupted load stored nothing
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(store.get("quote:SLOW").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn worker_skips_key_cached_after_it_was_queued() {
    // Given: A key that just became predictable, with the worker spawned
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let cache = counting_cache(Arc::clone(&store), Arc::clone(&calls), CacheConfig::default());

    cache.get("quote:AMD").await;
    for _ in 0..2 {
        tokio::time::advance(Duration::from_secs(10)).await;
        cache.get("quote:AMD").await;
    }
    assert_eq!(cache.get_statistics().preload_queue_size, 1);

    // When: Someone else caches the key before the worker reaches it
    store
        .put(String::from("quote:AMD"), String::from("fresh"), None)
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Then: The provider is never called and the fresh value survives
    assert!(calls.lock().expect("calls lock").is_empty());
    assert_eq!(store.get("quote:AMD").await.as_deref(), Some("fresh"));
    assert_eq!(cache.get_statistics().preload_queue_size, 0);
    cache.stop_preload().await;
}

#[tokio::test(start_paused = true)]
async fn schedule_pass_caps_queue_at_max_preload_items() {
    // Given: A cache capped at two preload items, with the worker stopped
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let config = CacheConfig {
        max_preload_items: 2,
        ..CacheConfig::default()
    };
    let cache = counting_cache(store, Arc::clone(&calls), config);
    cache.stop_preload().await;

    // When: Three keys become predictable
    for round in 0..3 {
        if round > 0 {
            tokio::time::advance(Duration::from_secs(10)).await;
        }
        for key in ["a", "b", "c"] {
            cache.get(key).await;
        }
    }

    // Then: Only two of them are queued
    let stats = cache.get_statistics();
    assert_eq!(stats.preload_queue_size, 2);
    assert!(calls.lock().expect("calls lock").is_empty());
}

// =============================================================================
// Statistics and TTL
// =============================================================================

#[tokio::test]
async fn statistics_report_accesses_and_hot_keys() {
    // Given: Several keys with different popularity
    let cache: SmartCache<u32> =
        SmartCache::new(Arc::new(CacheStore::<u32>::with_default_ttl()), CacheConfig::default());
    let fetches = AtomicUsize::new(0);

    for (key, hits) in [("quote:AAPL", 4), ("quote:MSFT", 2), ("quote:NVDA", 1)] {
        for _ in 0..hits {
            cache
                .get_or_fetch(key, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, AccessError>(Some(1))
                })
                .await
                .expect("fetch succeeds");
        }
    }

    // When: Statistics are requested
    let stats = cache.get_statistics();

    // Then: They reflect every recorded access
    assert_eq!(stats.tracked_keys, 3);
    assert_eq!(stats.total_accesses, 7);
    assert_eq!(stats.hot_keys[0], (String::from("quote:AAPL"), 4));
    assert_eq!(cache.get_hot_keys(2), vec!["quote:AAPL", "quote:MSFT"]);
    assert_eq!(fetches.load(Ordering::SeqCst), 3);

    let json = serde_json::to_value(&stats).expect("statistics serialize");
    assert_eq!(json["tracked_keys"], 3);
}

#[tokio::test(start_paused = true)]
async fn values_are_stored_with_adaptive_ttl() {
    // Given: A key revisited far more often than the default TTL
    let store = Arc::new(CacheStore::<String>::with_default_ttl());
    let config = CacheConfig {
        default_ttl: Duration::from_secs(100),
        ..CacheConfig::default()
    };
    let cache: SmartCache<String> =
        SmartCache::new(Arc::clone(&store) as Arc<dyn KeyValueStore<String>>, config);

    cache.get("k").await;
    tokio::time::advance(Duration::from_secs(10)).await;

    // When: The value is written after the second access
    cache
        .get_or_fetch("k", || async { Ok::<_, AccessError>(Some(String::from("v"))) })
        .await
        .expect("fetch succeeds");

    // Then: It survives past the default TTL but not past 1.5x
    tokio::time::advance(Duration::from_secs(120)).await;
    assert!(store.get("k").await.is_some());
    tokio::time::advance(Duration::from_secs(40)).await;
    assert!(store.get("k").await.is_none());
}
