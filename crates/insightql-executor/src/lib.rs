//! Dialect-aware, cache-fronted multi-engine query execution: pick the
//! cheapest engine capable of serving a request (embedded, aggregation,
//! big-data, direct-SQL, or data-frame), rewrite its SQL for that engine's
//! dialect, serve from cache when possible, and normalize/sample the result.
//!
//! The embedded and data-frame engines live in `insightql-embedded` and
//! `insightql-dataframe` respectively and implement the [`engine::Engine`]
//! trait defined here; the aggregation, big-data, and direct-SQL engines live
//! in this crate's [`engines`] module since they share a connection-pooling
//! transport.

pub mod cache;
pub mod engine;
pub mod engines;
pub mod error;
pub mod executor;
pub mod request;
pub mod result;
pub mod selection;

pub use engine::Engine;
pub use error::{ExecutorError, Result};
pub use executor::MultiEngineExecutor;
pub use request::{DataSourceDescriptor, DataSourceKind, EngineOverride, EngineRequest, QueryShape, Schema};
pub use result::{EngineKind, EngineResult};

/// Re-exports covering the common entry points: `use insightql_executor::prelude::*;`
pub mod prelude {
    pub use crate::cache::{InProcessCache, ScopedCache, TieredCache};
    pub use crate::engine::Engine;
    pub use crate::engines::{
        AggregationEngine, AggregationServiceClient, BigDataEngine, ClusterGateway, CubeQueryRequest,
        DirectSqlEngine,
    };
    pub use crate::error::{ExecutorError, Result};
    pub use crate::executor::MultiEngineExecutor;
    pub use crate::request::{
        ColumnSchema, DataSourceDescriptor, DataSourceKind, EngineOverride, EngineRequest, QueryShape, Schema,
        TableSchema,
    };
    pub use crate::result::{EngineKind, EngineResult};
    pub use crate::selection::{analyze_query_shape, select_engine};
}
