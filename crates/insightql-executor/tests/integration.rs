use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;

use insightql_executor::prelude::*;

struct CountingEngine {
    kind: EngineKind,
    calls: AtomicUsize,
}

#[async_trait]
impl Engine for CountingEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn execute(&self, _request: &EngineRequest) -> Result<EngineResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut row = IndexMap::new();
        row.insert("x".to_string(), serde_json::json!(1));
        Ok(EngineResult::success(vec![row], self.kind, 0))
    }
}

fn file_request(scope: &str) -> EngineRequest {
    EngineRequest {
        sql_text: "SELECT * FROM data".to_string(),
        data_source: DataSourceDescriptor {
            id: "sales.csv".to_string(),
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

#[tokio::test]
async fn two_scopes_against_the_same_source_never_share_a_cache_entry() {
    let mut executor = MultiEngineExecutor::new();
    let engine = Arc::new(CountingEngine { kind: EngineKind::Embedded, calls: AtomicUsize::new(0) });
    executor.register(engine.clone());

    executor.execute(&file_request("org-a/proj")).await.unwrap();
    executor.execute(&file_request("org-b/proj")).await.unwrap();

    assert_eq!(engine.calls.load(Ordering::SeqCst), 2, "different scopes must not share a cache entry");
}

#[tokio::test]
async fn disabling_cache_always_redispatches() {
    let mut executor = MultiEngineExecutor::new();
    let engine = Arc::new(CountingEngine { kind: EngineKind::Embedded, calls: AtomicUsize::new(0) });
    executor.register(engine.clone());

    let mut request = file_request("org/proj");
    request.allow_cache = false;
    executor.execute(&request).await.unwrap();
    executor.execute(&request).await.unwrap();

    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn read_only_violation_never_reaches_the_engine() {
    let mut executor = MultiEngineExecutor::new();
    let engine = Arc::new(CountingEngine { kind: EngineKind::Embedded, calls: AtomicUsize::new(0) });
    executor.register(engine.clone());

    let mut request = file_request("org/proj");
    request.sql_text = "DELETE FROM data".to_string();
    let err = executor.execute(&request).await.unwrap_err();

    assert!(matches!(err, ExecutorError::ReadOnlyViolation(_)));
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}
