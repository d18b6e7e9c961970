//! Content-addressed result caching: a scope-qualified key derived from the
//! request's identity, an async `ScopedCache` trait for a pluggable backing
//! store, and an in-process LRU used when no backing store is configured.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;

use crate::request::EngineRequest;
use crate::result::{EngineKind, EngineResult};

/// Default time-to-live for a cached result.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Compute the content-hash cache key for `request` against the engine it
/// will run on: a SHA-256 digest over the request's scope, data source id,
/// chosen engine, optimization flag, and (rewritten) SQL text, so identical
/// queries against the same source and engine within the same scope always
/// collide and anything else — including the same query with a different
/// optimization flag — never does.
#[must_use]
pub fn cache_key(request: &EngineRequest, engine: EngineKind, rewritten_sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.scope.as_bytes());
    hasher.update(b"\0");
    hasher.update(request.data_source.id.as_bytes());
    hasher.update(b"\0");
    hasher.update(engine.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update([u8::from(request.optimization_flag)]);
    hasher.update(b"\0");
    hasher.update(rewritten_sql.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// A pluggable cache keyed by the content-hash computed above. Implementors
/// may back this with an external store (Redis, a shared in-memory service);
/// this crate ships only [`InProcessCache`] as the local fallback.
#[async_trait]
pub trait ScopedCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<EngineResult>;
    async fn put(&self, key: &str, value: EngineResult, ttl: Duration);
}

struct Entry {
    value: EngineResult,
    expires_at: std::time::Instant,
}

/// An in-process, capacity-bounded LRU used when no external cache is wired
/// up. Entries are additionally expired by `ttl` on read.
pub struct InProcessCache {
    inner: Mutex<LruCache<String, Entry>>,
}

impl InProcessCache {
    /// Build a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is nonzero"));
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for InProcessCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ScopedCache for InProcessCache {
    async fn get(&self, key: &str) -> Option<EngineResult> {
        let mut guard = self.inner.lock();
        match guard.get(key) {
            Some(entry) if entry.expires_at > std::time::Instant::now() => {
                let mut result = entry.value.clone();
                result.cached = true;
                Some(result)
            }
            Some(_) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: EngineResult, ttl: Duration) {
        let mut guard = self.inner.lock();
        guard.put(
            key.to_string(),
            Entry {
                value,
                expires_at: std::time::Instant::now() + ttl,
            },
        );
    }
}

/// The two-tier lookup `MultiEngineExecutor` consults: an optional
/// scope-qualified external store (e.g. a shared Redis-class cache, short
/// TTL) checked first, falling back to the always-present in-process LRU
/// when the scoped store is absent or misses. A `dashmap`-backed per-key
/// lock table serializes concurrent fills of the same key, so a stampede of
/// requests for one popular query dispatches to the engine once rather than
/// once per waiter.
pub struct TieredCache {
    scoped: Option<Arc<dyn ScopedCache>>,
    local: InProcessCache,
    key_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl TieredCache {
    /// Build a tiered cache with `scoped` as the optional first tier and a
    /// default-capacity in-process LRU as the second.
    #[must_use]
    pub fn new(scoped: Option<Arc<dyn ScopedCache>>) -> Self {
        Self {
            scoped,
            local: InProcessCache::default(),
            key_locks: DashMap::new(),
        }
    }

    /// Replace the in-process tier's capacity.
    #[must_use]
    pub fn with_local_capacity(mut self, capacity: usize) -> Self {
        self.local = InProcessCache::new(capacity);
        self
    }

    /// Acquire the lock guarding concurrent fills for `key`. Hold the
    /// returned guard across a miss → dispatch → populate cycle so a second
    /// lookup for the same key blocks on the first one's fill instead of
    /// also dispatching to the engine.
    pub async fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.key_locks.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Tier 1 (scoped store), then tier 2 (in-process LRU).
    pub async fn get(&self, key: &str) -> Option<EngineResult> {
        if let Some(scoped) = &self.scoped {
            if let Some(hit) = scoped.get(key).await {
                return Some(hit);
            }
        }
        self.local.get(key).await
    }

    /// Writes through to every configured tier.
    pub async fn put(&self, key: &str, value: EngineResult, ttl: Duration) {
        if let Some(scoped) = &self.scoped {
            scoped.put(key, value.clone(), ttl).await;
        }
        self.local.put(key, value, ttl).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{DataSourceDescriptor, DataSourceKind, EngineOverride, Schema};
    use indexmap::IndexMap;

    fn request(scope: &str, source_id: &str, sql: &str) -> EngineRequest {
        EngineRequest {
            sql_text: sql.to_string(),
            data_source: DataSourceDescriptor {
                id: source_id.to_string(),
                kind: DataSourceKind::File,
                sub_kind: "csv".to_string(),
                connection_info: IndexMap::new(),
                schema: Schema::default(),
                inline_sample: None,
            },
            scope: scope.to_string(),
            read_only: true,
            allow_cache: true,
            optimization_flag: false,
            engine_override: EngineOverride::Auto,
        }
    }

    #[test]
    fn same_inputs_produce_same_key() {
        let r1 = request("org/proj", "src-1", "SELECT * FROM data");
        let r2 = request("org/proj", "src-1", "SELECT * FROM data");
        assert_eq!(
            cache_key(&r1, EngineKind::Embedded, "SELECT * FROM data"),
            cache_key(&r2, EngineKind::Embedded, "SELECT * FROM data")
        );
    }

    #[test]
    fn different_scope_changes_key() {
        let r1 = request("org/proj-a", "src-1", "SELECT * FROM data");
        let r2 = request("org/proj-b", "src-1", "SELECT * FROM data");
        assert_ne!(
            cache_key(&r1, EngineKind::Embedded, "SELECT * FROM data"),
            cache_key(&r2, EngineKind::Embedded, "SELECT * FROM data")
        );
    }

    #[test]
    fn different_engine_changes_key() {
        let r = request("org/proj", "src-1", "SELECT * FROM data");
        assert_ne!(
            cache_key(&r, EngineKind::Embedded, "SELECT * FROM data"),
            cache_key(&r, EngineKind::DirectSql, "SELECT * FROM data")
        );
    }

    #[test]
    fn different_optimization_flag_changes_key() {
        let mut r = request("org/proj", "src-1", "SELECT * FROM data");
        r.optimization_flag = false;
        let unoptimized = cache_key(&r, EngineKind::Embedded, "SELECT * FROM data");
        r.optimization_flag = true;
        let optimized = cache_key(&r, EngineKind::Embedded, "SELECT * FROM data");
        assert_ne!(unoptimized, optimized);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_and_flags_cached() {
        let cache = InProcessCache::default();
        let result = EngineResult::success(vec![], EngineKind::Embedded, 1);
        cache.put("k1", result, Duration::from_secs(60)).await;
        let got = cache.get("k1").await.expect("present");
        assert!(got.cached);
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = InProcessCache::default();
        let result = EngineResult::success(vec![], EngineKind::Embedded, 1);
        cache.put("k1", result, Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let cache = InProcessCache::default();
        assert!(cache.get("missing").await.is_none());
    }

    struct CountingScopedCache {
        store: Mutex<std::collections::HashMap<String, EngineResult>>,
        gets: std::sync::atomic::AtomicUsize,
    }

    impl CountingScopedCache {
        fn new() -> Self {
            Self { store: Mutex::new(std::collections::HashMap::new()), gets: std::sync::atomic::AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ScopedCache for CountingScopedCache {
        async fn get(&self, key: &str) -> Option<EngineResult> {
            self.gets.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.store.lock().get(key).cloned()
        }

        async fn put(&self, key: &str, value: EngineResult, _ttl: Duration) {
            self.store.lock().insert(key.to_string(), value);
        }
    }

    #[tokio::test]
    async fn tiered_cache_prefers_the_scoped_store_on_a_hit() {
        let scoped = Arc::new(CountingScopedCache::new());
        let tiered = TieredCache::new(Some(scoped.clone()));
        let result = EngineResult::success(vec![], EngineKind::Embedded, 1);
        scoped.put("k1", result, Duration::from_secs(60)).await;

        let got = tiered.get("k1").await.expect("present in scoped tier");
        assert_eq!(scoped.gets.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!got.cached, "scoped-store hits aren't re-flagged by the local tier");
    }

    #[tokio::test]
    async fn tiered_cache_falls_back_to_local_when_scoped_misses() {
        let scoped = Arc::new(CountingScopedCache::new());
        let tiered = TieredCache::new(Some(scoped.clone()));
        let result = EngineResult::success(vec![], EngineKind::Embedded, 1);
        tiered.local.put("k1", result, Duration::from_secs(60)).await;

        let got = tiered.get("k1").await.expect("present in local tier");
        assert_eq!(scoped.gets.load(std::sync::atomic::Ordering::SeqCst), 1, "scoped tier is still checked first");
        assert!(got.cached);
    }

    #[tokio::test]
    async fn tiered_cache_without_a_scoped_store_degrades_to_local_only() {
        let tiered = TieredCache::new(None);
        let result = EngineResult::success(vec![], EngineKind::Embedded, 1);
        tiered.put("k1", result, Duration::from_secs(60)).await;
        assert!(tiered.get("k1").await.is_some());
    }

    #[tokio::test]
    async fn tiered_cache_put_writes_through_to_both_tiers() {
        let scoped = Arc::new(CountingScopedCache::new());
        let tiered = TieredCache::new(Some(scoped.clone()));
        let result = EngineResult::success(vec![], EngineKind::Embedded, 1);
        tiered.put("k1", result, Duration::from_secs(60)).await;

        assert!(scoped.store.lock().contains_key("k1"));
        assert!(tiered.local.get("k1").await.is_some());
    }

    #[tokio::test]
    async fn lock_for_returns_the_same_lock_for_the_same_key() {
        let tiered = TieredCache::new(None);
        let a = tiered.lock_for("k1").await;
        let b = tiered.lock_for("k1").await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
