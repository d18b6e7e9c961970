//! The `Engine` trait every concrete execution backend implements: take a
//! fully-formed request, return a normalized result. Selection, caching,
//! rewriting, and sampling all live one layer up in [`crate::executor`].

use async_trait::async_trait;

use crate::error::Result;
use crate::request::EngineRequest;
use crate::result::{EngineKind, EngineResult};

/// One query-execution backend. Implementations: the in-process embedded
/// engine and the in-crate aggregation/big-data/direct-SQL engines live in
/// `insightql-executor`'s `engines` module and `insightql-embedded`;
/// `insightql-dataframe` provides the data-frame engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// This engine's identity, used for logging, cache scoping, and result
    /// tagging.
    fn kind(&self) -> EngineKind;

    /// Execute `request` and return a normalized result. Implementations
    /// should classify failures into [`crate::error::ExecutorError`]'s
    /// transient/permanent/syntactic buckets as precisely as they can, since
    /// the caller's retry behavior depends on it.
    async fn execute(&self, request: &EngineRequest) -> Result<EngineResult>;

    /// Whether this engine is currently able to serve requests (e.g. a
    /// warehouse connection pool is healthy). Default `true`; engines with a
    /// meaningful health check should override this.
    async fn is_available(&self) -> bool {
        true
    }
}
