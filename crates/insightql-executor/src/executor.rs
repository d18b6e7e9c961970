//! The multi-engine façade: analyze a request's shape, select an engine,
//! rewrite its SQL for that engine's dialect, check the cache, dispatch, and
//! normalize/sample the result — the single entry point the workflow layer's
//! `execute_query` node calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use crate::cache::{cache_key, ScopedCache, TieredCache, DEFAULT_CACHE_TTL};
use crate::engine::Engine;
use crate::error::{ExecutorError, Result};
use crate::request::EngineRequest;
use crate::result::{EngineKind, EngineResult};
use crate::selection::{dialect_for_engine, select_engine};

/// Number of leading/trailing rows kept when a result is sampled.
pub const SAMPLE_HEAD: usize = 500;
pub const SAMPLE_TAIL: usize = 500;
/// Result sets at or below this size are never sampled.
pub const SAMPLE_THRESHOLD: usize = 1000;

/// Ties together engine registration, SQL rewriting, caching, and sampling.
/// One instance is shared across a workflow run (and typically across many
/// runs), since engines and the cache are expected to be long-lived.
pub struct MultiEngineExecutor {
    engines: HashMap<EngineKind, Arc<dyn Engine>>,
    cache: TieredCache,
    cache_ttl: Duration,
}

impl MultiEngineExecutor {
    /// Build an executor with no registered engines and no scoped store
    /// configured — only the in-process LRU tier serves cache lookups until
    /// [`Self::with_scoped_cache`] wires one in; engines are registered with
    /// [`Self::register`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            engines: HashMap::new(),
            cache: TieredCache::new(None),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Configure the scoped (tier-1) store consulted ahead of the in-process
    /// LRU — e.g. a shared Redis-class cache. Per `spec.md` §6 this tier is
    /// optional: when absent, lookups degrade gracefully to the in-process
    /// tier alone.
    #[must_use]
    pub fn with_scoped_cache(mut self, cache: Arc<dyn ScopedCache>) -> Self {
        self.cache = TieredCache::new(Some(cache));
        self
    }

    /// Override the default cache entry TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Register an engine implementation to serve its [`EngineKind`].
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.kind(), engine);
    }

    /// Run `request` end to end: select an engine, rewrite the SQL for its
    /// dialect, serve from cache if possible, otherwise dispatch and cache the
    /// normalized, sampled result.
    #[instrument(skip(self, request), fields(source_id = %request.data_source.id))]
    pub async fn execute(&self, request: &EngineRequest) -> Result<EngineResult> {
        if request.read_only {
            insightql_sql::validation::enforce_read_only(&request.sql_text)?;
        }

        let engine_kind = select_engine(request);
        let engine = self
            .engines
            .get(&engine_kind)
            .cloned()
            .ok_or(ExecutorError::EngineUnavailable)?;

        let dialect = dialect_for_engine(engine_kind, &request.data_source);
        let rewritten = dialect.rewrite(&request.sql_text);
        let rewritten = insightql_sql::validation::inject_limit_if_absent(&rewritten, insightql_sql::validation::DEFAULT_LIMIT);

        let key = cache_key(request, engine_kind, &rewritten);
        if !request.allow_cache {
            return self.dispatch(&engine, request, rewritten).await;
        }

        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!(engine = %engine_kind, "cache hit");
            return Ok(cached);
        }

        // Serialize concurrent fills of the same key: a second caller racing
        // on the same content hash waits here rather than also dispatching,
        // then re-checks the cache the first caller just populated.
        let fill_lock = self.cache.lock_for(&key).await;
        let _guard = fill_lock.lock().await;
        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!(engine = %engine_kind, "cache hit after awaiting in-flight fill");
            return Ok(cached);
        }

        let result = self.dispatch(&engine, request, rewritten).await?;
        if result.success {
            self.cache.put(&key, result.clone(), self.cache_ttl).await;
        }
        Ok(result)
    }

    async fn dispatch(&self, engine: &Arc<dyn Engine>, request: &EngineRequest, rewritten_sql: String) -> Result<EngineResult> {
        let mut rewritten_request = request.clone();
        rewritten_request.sql_text = rewritten_sql;

        let started = Instant::now();
        let mut result = engine.execute(&rewritten_request).await?;
        result.execution_time_ms = started.elapsed().as_millis() as u64;

        sample_in_place(&mut result);

        Ok(result)
    }
}

impl Default for MultiEngineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Trim `result.data` to the first [`SAMPLE_HEAD`] and last [`SAMPLE_TAIL`]
/// rows when it exceeds [`SAMPLE_THRESHOLD`] rows, preserving the original
/// `row_count` so callers can tell the data was sampled rather than short.
fn sample_in_place(result: &mut EngineResult) {
    let total = result.data.len();
    if total <= SAMPLE_THRESHOLD {
        return;
    }
    let mut sampled = Vec::with_capacity(SAMPLE_HEAD + SAMPLE_TAIL);
    sampled.extend(result.data.drain(..SAMPLE_HEAD.min(total)));
    let tail_start = result.data.len().saturating_sub(SAMPLE_TAIL);
    sampled.extend(result.data.drain(tail_start..));
    result.data = sampled;
    result.row_count = total as u64;
    result.is_sampled = true;
}
