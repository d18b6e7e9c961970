//! Big-data engine: the warehouse-scale tier, reserved for sources whose
//! declared row count crosses [`crate::selection::BIG_DATA_THRESHOLD`].
//!
//! A cluster/gateway connection (e.g. a Spark/Trino session) is expensive to
//! stand up, so it is constructed lazily on first use rather than at
//! registration, and only if the request actually reaches this engine. The
//! concrete cluster client is not vendored here — standing one up is
//! enterprise connector bring-up, out of scope for this crate — so this
//! module defines the [`ClusterGateway`] seam a deployment implements.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::engine::Engine;
use crate::error::{ExecutorError, Result};
use crate::request::{DataSourceDescriptor, EngineRequest};
use crate::result::{EngineKind, EngineResult};

/// The view name the dataframe backing a big-data query is registered
/// under, matching the embedded engine's own convention so SQL text is
/// portable between engines (`spec.md` §4.5).
pub const DATA_VIEW_NAME: &str = "data";

/// A live cluster/gateway SQL session: Spark, Trino, or an equivalent
/// cluster-SQL frontend. Implementations own their own connection
/// lifecycle; this engine only calls through the trait.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Whether the cluster/gateway is currently reachable. Checked before
    /// every dispatch, not just once at construction.
    async fn is_available(&self) -> bool;

    /// Register `descriptor`'s dataset as a temporary view named `view_name`
    /// so `sql` can reference it as an ordinary table.
    async fn register_view(&self, view_name: &str, descriptor: &DataSourceDescriptor) -> Result<()>;

    /// Run `sql` through the cluster's SQL engine and return its rows.
    async fn run_sql(&self, sql: &str) -> Result<EngineResult>;
}

/// A [`ClusterGateway`] with nothing behind it: always unavailable, and
/// every operation fails with [`ExecutorError::EngineUnavailable`]. The
/// default factory output when a deployment hasn't wired in a real cluster
/// client.
#[derive(Debug, Default)]
pub struct UnconfiguredClusterGateway;

#[async_trait]
impl ClusterGateway for UnconfiguredClusterGateway {
    async fn is_available(&self) -> bool {
        false
    }

    async fn register_view(&self, _view_name: &str, _descriptor: &DataSourceDescriptor) -> Result<()> {
        Err(ExecutorError::EngineUnavailable)
    }

    async fn run_sql(&self, _sql: &str) -> Result<EngineResult> {
        Err(ExecutorError::EngineUnavailable)
    }
}

/// Builds a [`ClusterGateway`] on first use. Boxed rather than generic so
/// [`BigDataEngine`] stays a concrete, object-safe type the executor can
/// register behind `Arc<dyn Engine>`.
pub type ClusterGatewayFactory = Box<dyn Fn() -> Arc<dyn ClusterGateway> + Send + Sync>;

/// Dispatches to a lazily-constructed [`ClusterGateway`]: registers the
/// source as a `data` view, then runs the (already dialect-rewritten) SQL
/// through the cluster's own engine.
pub struct BigDataEngine {
    factory: ClusterGatewayFactory,
    gateway: OnceCell<Arc<dyn ClusterGateway>>,
}

impl BigDataEngine {
    /// Build an engine that constructs its gateway with `factory` the first
    /// time a request reaches it.
    #[must_use]
    pub fn new(factory: ClusterGatewayFactory) -> Self {
        Self { factory, gateway: OnceCell::new() }
    }

    async fn gateway(&self) -> &Arc<dyn ClusterGateway> {
        self.gateway.get_or_init(|| async { (self.factory)() }).await
    }
}

impl Default for BigDataEngine {
    /// No cluster configured: every request fails with
    /// [`ExecutorError::EngineUnavailable`] until [`Self::new`] is given a
    /// real factory.
    fn default() -> Self {
        Self::new(Box::new(|| Arc::new(UnconfiguredClusterGateway) as Arc<dyn ClusterGateway>))
    }
}

#[async_trait]
impl Engine for BigDataEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::BigData
    }

    async fn is_available(&self) -> bool {
        self.gateway().await.is_available().await
    }

    async fn execute(&self, request: &EngineRequest) -> Result<EngineResult> {
        let gateway = self.gateway().await;
        if !gateway.is_available().await {
            return Err(ExecutorError::EngineUnavailable);
        }
        gateway.register_view(DATA_VIEW_NAME, &request.data_source).await?;
        let mut result = gateway.run_sql(&request.sql_text).await?;
        result.engine_used = EngineKind::BigData;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::request::{DataSourceKind, EngineOverride, Schema};

    struct CountingGateway {
        registered: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl ClusterGateway for CountingGateway {
        async fn is_available(&self) -> bool {
            true
        }

        async fn register_view(&self, view_name: &str, _descriptor: &DataSourceDescriptor) -> Result<()> {
            *self.registered.lock().unwrap() = Some(view_name.to_string());
            Ok(())
        }

        async fn run_sql(&self, _sql: &str) -> Result<EngineResult> {
            let mut row = IndexMap::new();
            row.insert("n".to_string(), serde_json::json!(1));
            Ok(EngineResult::success(vec![row], EngineKind::BigData, 0))
        }
    }

    fn request() -> EngineRequest {
        EngineRequest {
            sql_text: "SELECT * FROM data".to_string(),
            data_source: DataSourceDescriptor {
                id: "src-1".to_string(),
                kind: DataSourceKind::Warehouse,
                sub_kind: "clickhouse".to_string(),
                connection_info: IndexMap::new(),
                schema: Schema::default(),
                inline_sample: None,
            },
            scope: String::new(),
            read_only: true,
            allow_cache: false,
            optimization_flag: false,
            engine_override: EngineOverride::Auto,
        }
    }

    #[test]
    fn reports_bigdata_kind() {
        assert_eq!(BigDataEngine::default().kind(), EngineKind::BigData);
    }

    #[tokio::test]
    async fn unconfigured_gateway_is_unavailable() {
        let engine = BigDataEngine::default();
        assert!(!engine.is_available().await);
    }

    #[tokio::test]
    async fn gateway_is_constructed_lazily_and_only_once() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let counter = constructions.clone();
        let engine = BigDataEngine::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(CountingGateway { registered: Arc::new(std::sync::Mutex::new(None)) }) as Arc<dyn ClusterGateway>
        }));
        assert_eq!(constructions.load(Ordering::SeqCst), 0, "factory must not run before first use");

        engine.execute(&request()).await.unwrap();
        engine.execute(&request()).await.unwrap();
        assert_eq!(constructions.load(Ordering::SeqCst), 1, "gateway must be constructed at most once");
    }

    #[tokio::test]
    async fn execute_registers_the_data_view_before_running_sql() {
        let registered = Arc::new(std::sync::Mutex::new(None));
        let seen = registered.clone();
        let engine = BigDataEngine::new(Box::new(move || {
            Arc::new(CountingGateway { registered: seen.clone() }) as Arc<dyn ClusterGateway>
        }));
        let result = engine.execute(&request()).await.unwrap();
        assert_eq!(result.engine_used, EngineKind::BigData);
        assert_eq!(result.row_count, 1);
        assert_eq!(registered.lock().unwrap().as_deref(), Some(DATA_VIEW_NAME));
    }
}
