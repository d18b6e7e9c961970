//! The embedded engine: implements [`insightql_executor::Engine`] over one
//! [`crate::session::DuckDbSession`] per data-source id, materializing inline
//! samples or fetched file bytes on first use and reusing the session for
//! every subsequent query against that source.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use insightql_executor::{
    DataSourceDescriptor, DataSourceKind, Engine, EngineKind, EngineRequest, EngineResult, ExecutorError,
    Result as ExecutorResult,
};

use crate::error::EmbeddedError;
use crate::session::DuckDbSession;

/// Fetches the raw bytes of a file-backed data source. Implemented by the
/// caller's storage layer (local disk, object storage, an upload service);
/// this crate only knows how to load bytes once it has them.
#[async_trait]
pub trait FileBytesProvider: Send + Sync {
    async fn fetch_bytes(&self, source_id: &str) -> std::result::Result<Vec<u8>, String>;
}

/// The in-process embedded analytic engine.
pub struct EmbeddedEngine {
    sessions: DashMap<String, Arc<Mutex<DuckDbSession>>>,
    file_provider: Option<Arc<dyn FileBytesProvider>>,
}

impl EmbeddedEngine {
    /// Build an engine with no file-byte provider; only inline-sample sources
    /// will resolve.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            file_provider: None,
        }
    }

    /// Build an engine able to fetch and materialize file-backed sources.
    #[must_use]
    pub fn with_file_provider(provider: Arc<dyn FileBytesProvider>) -> Self {
        Self {
            sessions: DashMap::new(),
            file_provider: Some(provider),
        }
    }

    async fn session_for(&self, descriptor: &DataSourceDescriptor) -> Result<Arc<Mutex<DuckDbSession>>, EmbeddedError> {
        if let Some(existing) = self.sessions.get(&descriptor.id) {
            return Ok(existing.clone());
        }

        let session = Arc::new(Mutex::new(DuckDbSession::open()?));
        if let Some(rows) = &descriptor.inline_sample {
            session.lock().load_inline_rows(rows, Some(&descriptor.id))?;
        } else if matches!(descriptor.kind, DataSourceKind::File) {
            let provider = self
                .file_provider
                .as_ref()
                .ok_or_else(|| EmbeddedError::NoFileProvider(descriptor.id.clone()))?;
            let bytes = provider
                .fetch_bytes(&descriptor.id)
                .await
                .map_err(EmbeddedError::FileFetch)?;
            session.lock().load_file_bytes(&bytes, &descriptor.sub_kind, Some(&descriptor.id))?;
        }

        self.sessions.insert(descriptor.id.clone(), session.clone());
        Ok(session)
    }
}

impl Default for EmbeddedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for EmbeddedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Embedded
    }

    async fn execute(&self, request: &EngineRequest) -> ExecutorResult<EngineResult> {
        let session = self
            .session_for(&request.data_source)
            .await
            .map_err(ExecutorError::from)?;
        let data = session
            .lock()
            .query(&request.sql_text)
            .map_err(ExecutorError::from)?;
        Ok(EngineResult::success(data, EngineKind::Embedded, 0))
    }
}
