//! Read-result caching with request coalescing.
//!
//! Results are cached by [`CacheKey`], a hash of the permission-scoped
//! rendered query, its parameters, the caller's transaction id and an
//! operation context string. Requests without a transaction id bypass the
//! cache entirely.
//!
//! # Invalidation
//!
//! Every entry is indexed by `(transaction id, model)` for each model its
//! result depends on: the queried model, every nested model it serializes
//! and every model its predicates or ordering traverse. A write inside a
//! transaction drops the entries depending on the written model within the
//! same transaction; other transactions keep theirs until the TTL expires.
//! Entries that moka evicts or expires leave the index through an eviction
//! listener.
//!
//! # Coalescing
//!
//! On a miss the first caller computes the value while concurrent callers
//! for the same key wait up to `query_timeout + 1s` for it to land in the
//! cache. A follower whose wait times out computes independently.
//!
//! # Example
//!
//! ```rust,ignore
//! use scopeql_domain::cache::{CacheKey, ResultCache, ResultCacheConfig};
//!
//! let cache = ResultCache::new(ResultCacheConfig::default());
//! let key = CacheKey::for_request(&handle.render(), Some("txn-1"), "read");
//! let rows = cache
//!     .get_or_compute(key, "txn-1", &depends_on, || async { store.query(&handle).await })
//!     .await?;
//! ```

mod coalescer;
mod index;
mod key;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::notification::RemovalCause;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DomainResult;

pub use coalescer::{CoalesceSlot, Coalescer, LeaderGuard};
pub use key::CacheKey;

use index::ScopeIndex;

/// Configuration for the result cache.
#[derive(Debug, Clone)]
pub struct ResultCacheConfig {
    pub enabled: bool,
    /// Maximum number of cached results.
    pub max_capacity: u64,
    pub ttl: Duration,
    /// Expected upper bound for one query; followers wait one second longer.
    pub query_timeout: Duration,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 10_000,
            ttl: Duration::from_secs(3600),
            query_timeout: Duration::from_millis(1000),
        }
    }
}

impl ResultCacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// How long a follower waits for the leader's result.
    pub fn lock_wait(&self) -> Duration {
        self.query_timeout + Duration::from_secs(1)
    }
}

/// In-process counters for cache behaviour.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Lookups bypassed because caching was off or no transaction id was given.
    pub skips: AtomicU64,
    /// Followers served from a leader's result.
    pub coalesced: AtomicU64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    /// hits / (hits + misses), or 0.0 before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// A point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub skips: u64,
    pub coalesced: u64,
}

#[derive(Debug, Clone)]
struct CachedResult {
    /// Matches the index record written by the same `put`.
    generation: u64,
    value: Value,
}

/// Shared cache of serialized read results.
///
/// Safe to share across tasks; all state is behind concurrent maps.
pub struct ResultCache {
    cache: Cache<CacheKey, CachedResult>,
    config: ResultCacheConfig,
    index: Arc<ScopeIndex>,
    generation: AtomicU64,
    coalescer: Coalescer<CacheKey>,
    metrics: CacheMetrics,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .field("scope_index_size", &self.index.scope_count())
            .field("in_flight", &self.coalescer.in_flight())
            .finish()
    }
}

impl ResultCache {
    pub fn new(config: ResultCacheConfig) -> Self {
        let index = Arc::new(ScopeIndex::default());
        let listener_index = Arc::clone(&index);
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.ttl)
            .eviction_listener(move |key: Arc<CacheKey>, entry: CachedResult, cause: RemovalCause| {
                debug!(key = %key, ?cause, "result cache entry removed");
                listener_index.forget_generation(&key, entry.generation);
            })
            .build();

        Self {
            cache,
            config,
            index,
            generation: AtomicU64::new(0),
            coalescer: Coalescer::new(),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn config(&self) -> &ResultCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Looks up a cached result.
    ///
    /// # Metrics
    ///
    /// Records `scopeql_cache_hits_total` or `scopeql_cache_misses_total`.
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        let result = self.cache.get(key).await.map(|entry| entry.value);
        if result.is_some() {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("scopeql_cache_hits_total").increment(1);
            debug!(key = %key, "result cache hit");
        } else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("scopeql_cache_misses_total").increment(1);
            debug!(key = %key, "result cache miss");
        }
        result
    }

    /// Stores a result and indexes it under `(txn_id, model)` for every
    /// model in `depends_on`.
    pub async fn put(&self, key: CacheKey, txn_id: &str, depends_on: &BTreeSet<String>, value: Value) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.index.record(&key, generation, txn_id, depends_on);
        self.cache.insert(key, CachedResult { generation, value }).await;
        metrics::gauge!("scopeql_cache_size").set(self.cache.entry_count() as f64);
    }

    /// Claims `key` for computation. See [`CoalesceSlot`].
    pub fn acquire_lock(&self, key: &CacheKey) -> CoalesceSlot {
        self.coalescer.acquire(key.clone())
    }

    /// Drops every entry of `txn_id` whose result depends on `model`.
    pub async fn invalidate_model(&self, txn_id: &str, model: &str) {
        let keys = self.index.take(txn_id, model);
        if keys.is_empty() {
            return;
        }
        debug!(txn_id, model, entries = keys.len(), "invalidating cached results");
        for key in &keys {
            self.cache.invalidate(key).await;
        }
    }

    /// Returns the cached value for `key`, or computes and caches it.
    ///
    /// `key` is `None` when the request carries no transaction id; the
    /// computation then always runs and nothing is stored. Errors from
    /// `compute` are returned as-is and never cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: Option<CacheKey>,
        txn_id: &str,
        depends_on: &BTreeSet<String>,
        compute: F,
    ) -> DomainResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DomainResult<Value>>,
    {
        let Some(key) = key.filter(|_| self.config.enabled) else {
            self.metrics.skips.fetch_add(1, Ordering::Relaxed);
            return compute().await;
        };

        if let Some(hit) = self.get(&key).await {
            return Ok(hit);
        }

        match self.acquire_lock(&key) {
            CoalesceSlot::Leader => {
                let guard = LeaderGuard::new(&self.coalescer, key.clone());
                let value = compute().await?;
                self.put(key, txn_id, depends_on, value.clone()).await;
                guard.release();
                Ok(value)
            }
            CoalesceSlot::Follower(mut rx) => {
                match tokio::time::timeout(self.config.lock_wait(), rx.recv()).await {
                    Ok(Ok(())) => {
                        if let Some(CachedResult { value, .. }) = self.cache.get(&key).await {
                            self.metrics.coalesced.fetch_add(1, Ordering::Relaxed);
                            metrics::counter!("scopeql_cache_coalesced_total").increment(1);
                            return Ok(value);
                        }
                    }
                    Ok(Err(_)) => {
                        debug!(key = %key, "leader gave up, computing independently");
                    }
                    Err(_) => {
                        metrics::counter!("scopeql_cache_wait_timeouts_total").increment(1);
                        warn!(key = %key, "timed out waiting for in-flight query");
                    }
                }
                let value = compute().await?;
                self.put(key, txn_id, depends_on, value.clone()).await;
                Ok(value)
            }
        }
    }

    /// Approximate number of cached entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs moka's pending maintenance; used by tests observing eviction.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Describes the result cache metrics to the installed recorder.
///
/// # Metrics Registered
///
/// - `scopeql_cache_hits_total`
/// - `scopeql_cache_misses_total`
/// - `scopeql_cache_coalesced_total`
/// - `scopeql_cache_wait_timeouts_total`
/// - `scopeql_cache_size` (gauge)
pub fn register_result_cache_metrics() {
    metrics::describe_counter!("scopeql_cache_hits_total", "Total number of result cache hits");
    metrics::describe_counter!(
        "scopeql_cache_misses_total",
        "Total number of result cache misses"
    );
    metrics::describe_counter!(
        "scopeql_cache_coalesced_total",
        "Requests served from a concurrent request's result"
    );
    metrics::describe_counter!(
        "scopeql_cache_wait_timeouts_total",
        "Coalescing waits that timed out and executed independently"
    );
    metrics::describe_gauge!("scopeql_cache_size", "Current number of cached results");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::DomainError;
    use crate::query::{Predicate, QueryHandle};

    fn deps(models: &[&str]) -> BTreeSet<String> {
        models.iter().map(|m| m.to_string()).collect()
    }

    fn key_for(value: i64, txn: &str) -> CacheKey {
        let rendered = QueryHandle::new("item")
            .filter(Predicate::eq("value", json!(value)))
            .render();
        CacheKey::new(&rendered, txn, "read")
    }

    // ====== Section 1: Basic get/put ======

    #[tokio::test]
    async fn test_put_then_get_returns_value() {
        // Arrange
        let cache = ResultCache::new(ResultCacheConfig::default());
        let key = key_for(1, "t1");

        // Act
        cache.put(key.clone(), "t1", &deps(&["item"]), json!([1, 2])).await;

        // Assert
        assert_eq!(cache.get(&key).await, Some(json!([1, 2])));
        assert_eq!(cache.metrics().snapshot().hits, 1);
    }

    #[tokio::test]
    async fn test_miss_is_counted() {
        let cache = ResultCache::new(ResultCacheConfig::default());
        assert!(cache.get(&key_for(1, "t1")).await.is_none());
        assert_eq!(cache.metrics().snapshot().misses, 1);
        assert_eq!(cache.metrics().hit_ratio(), 0.0);
    }

    // ====== Section 2: Invalidation ======

    #[tokio::test]
    async fn test_invalidate_model_only_touches_same_transaction() {
        let cache = ResultCache::new(ResultCacheConfig::default());
        let k1 = key_for(1, "t1");
        let k2 = key_for(1, "t2");
        cache.put(k1.clone(), "t1", &deps(&["item"]), json!(1)).await;
        cache.put(k2.clone(), "t2", &deps(&["item"]), json!(2)).await;

        cache.invalidate_model("t1", "item").await;

        assert!(cache.get(&k1).await.is_none());
        assert_eq!(cache.get(&k2).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_invalidate_model_leaves_other_models() {
        let cache = ResultCache::new(ResultCacheConfig::default());
        let k1 = key_for(1, "t1");
        cache.put(k1.clone(), "t1", &deps(&["other"]), json!(1)).await;

        cache.invalidate_model("t1", "item").await;

        assert!(cache.get(&k1).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_model_drops_entries_depending_on_it() {
        // Arrange: a book read that nests authors
        let cache = ResultCache::new(ResultCacheConfig::default());
        let nested = key_for(1, "t1");
        let flat = key_for(2, "t1");
        cache.put(nested.clone(), "t1", &deps(&["author", "book"]), json!(1)).await;
        cache.put(flat.clone(), "t1", &deps(&["book"]), json!(2)).await;

        // Act
        cache.invalidate_model("t1", "author").await;

        // Assert
        assert!(cache.get(&nested).await.is_none());
        assert_eq!(cache.get(&flat).await, Some(json!(2)));
        assert_eq!(cache.index.key_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_leave_the_index() {
        // Arrange
        let cache = ResultCache::new(
            ResultCacheConfig::default().with_ttl(Duration::from_millis(5)),
        );
        for n in 0..100 {
            let txn = format!("txn-{n}");
            cache.put(key_for(n, &txn), &txn, &deps(&["item"]), json!(n)).await;
        }

        // Act
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.run_pending_tasks().await;

        // Assert
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.index.key_count(), 0);
        assert_eq!(cache.index.scope_count(), 0);
    }

    #[tokio::test]
    async fn test_replacing_an_entry_keeps_it_indexed() {
        let cache = ResultCache::new(ResultCacheConfig::default());
        let key = key_for(1, "t1");

        cache.put(key.clone(), "t1", &deps(&["item"]), json!(1)).await;
        cache.put(key.clone(), "t1", &deps(&["item"]), json!(2)).await;
        cache.run_pending_tasks().await;

        assert_eq!(cache.index.key_count(), 1);
        cache.invalidate_model("t1", "item").await;
        assert!(cache.get(&key).await.is_none());
    }

    // ====== Section 3: get_or_compute ======

    #[tokio::test]
    async fn test_no_key_always_computes() {
        let cache = ResultCache::new(ResultCacheConfig::default());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_compute(None, "", &deps(&["item"]), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(7))
                })
                .await
                .unwrap();
            assert_eq!(value, json!(7));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.metrics().snapshot().skips, 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_skips() {
        let cache = ResultCache::new(ResultCacheConfig::default().with_enabled(false));
        let key = key_for(1, "t1");
        cache
            .get_or_compute(Some(key.clone()), "t1", &deps(&["item"]), || async { Ok(json!(1)) })
            .await
            .unwrap();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.metrics().snapshot().skips, 1);
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let cache = ResultCache::new(ResultCacheConfig::default());
        let key = key_for(1, "t1");
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_compute(Some(key.clone()), "t1", &deps(&["item"]), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("rows"))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = ResultCache::new(ResultCacheConfig::default());
        let key = key_for(1, "t1");

        let err = cache
            .get_or_compute(Some(key.clone()), "t1", &deps(&["item"]), || async {
                Err(DomainError::internal("boom"))
            })
            .await;
        assert!(err.is_err());

        let ok = cache
            .get_or_compute(Some(key), "t1", &deps(&["item"]), || async { Ok(json!(1)) })
            .await
            .unwrap();
        assert_eq!(ok, json!(1));
    }

    // ====== Section 4: Coalescing ======

    #[tokio::test]
    async fn test_concurrent_misses_compute_once() {
        // Arrange
        let cache = Arc::new(ResultCache::new(ResultCacheConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = key_for(1, "t1");

        // Act
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let key = key.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute(Some(key), "t1", &deps(&["item"]), || async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(json!("shared"))
                        })
                        .await
                })
            })
            .collect();
        let results = collect_results(tasks).await;

        // Assert
        assert!(results.iter().all(|r| r == &json!("shared")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_times_out_and_computes_independently() {
        let cache = ResultCache::new(
            ResultCacheConfig::default().with_query_timeout(Duration::from_millis(10)),
        );
        let key = key_for(1, "t1");

        // Simulate a leader that never finishes.
        assert!(matches!(cache.acquire_lock(&key), CoalesceSlot::Leader));

        let value = cache
            .get_or_compute(Some(key), "t1", &deps(&["item"]), || async { Ok(json!("own")) })
            .await
            .unwrap();

        assert_eq!(value, json!("own"));
        assert_eq!(cache.metrics().snapshot().coalesced, 0);
    }

    async fn collect_results(
        tasks: Vec<tokio::task::JoinHandle<DomainResult<Value>>>,
    ) -> Vec<Value> {
        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            out.push(task.await.unwrap().unwrap());
        }
        out
    }
}
