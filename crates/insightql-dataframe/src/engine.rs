//! The data-frame engine: fetch a remote API's response, parse it into rows,
//! and answer queries against it the same way the embedded engine answers
//! queries against a file — by materializing the rows into a DuckDB session.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use insightql_embedded::DuckDbSession;
use insightql_executor::{DataSourceDescriptor, Engine, EngineKind, EngineRequest, EngineResult, Result as ExecutorResult};

use crate::error::DataFrameError;
use crate::fetch::fetch_bytes;
use crate::parse::parse_rows;

/// Fetches and parses each API source's rows on first use, then reuses the
/// resulting DuckDB session for subsequent queries against the same source.
pub struct DataFrameEngine {
    client: reqwest::Client,
    sessions: DashMap<String, Arc<Mutex<DuckDbSession>>>,
}

impl DataFrameEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            sessions: DashMap::new(),
        }
    }

    async fn session_for(&self, descriptor: &DataSourceDescriptor) -> Result<Arc<Mutex<DuckDbSession>>, DataFrameError> {
        if let Some(existing) = self.sessions.get(&descriptor.id) {
            return Ok(existing.clone());
        }

        let rows = if let Some(sample) = &descriptor.inline_sample {
            sample.clone()
        } else {
            let bytes = fetch_bytes(&self.client, &descriptor.connection_info).await?;
            parse_rows(&bytes, &descriptor.sub_kind)?
        };

        let session = Arc::new(Mutex::new(DuckDbSession::open()?));
        session.lock().load_inline_rows(&rows, Some(&descriptor.id))?;
        self.sessions.insert(descriptor.id.clone(), session.clone());
        Ok(session)
    }
}

impl Default for DataFrameEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for DataFrameEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DataFrame
    }

    async fn execute(&self, request: &EngineRequest) -> ExecutorResult<EngineResult> {
        let session = self.session_for(&request.data_source).await?;
        let data = session.lock().query(&request.sql_text)?;
        Ok(EngineResult::success(data, EngineKind::DataFrame, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use insightql_executor::{DataSourceKind, EngineOverride, Schema};

    #[tokio::test]
    async fn executes_against_inline_sample_without_fetching() {
        let engine = DataFrameEngine::new();
        let mut row = IndexMap::new();
        row.insert("n".to_string(), serde_json::json!(7));
        let descriptor = DataSourceDescriptor {
            id: "api-src".to_string(),
            kind: DataSourceKind::Api,
            sub_kind: "json".to_string(),
            connection_info: IndexMap::new(),
            schema: Schema::default(),
            inline_sample: Some(vec![row]),
        };
        let request = EngineRequest {
            sql_text: "SELECT n FROM data".to_string(),
            data_source: descriptor,
            scope: String::new(),
            read_only: true,
            allow_cache: false,
            optimization_flag: false,
            engine_override: EngineOverride::Auto,
        };
        let result = engine.execute(&request).await.unwrap();
        assert_eq!(result.data[0]["n"], serde_json::json!(7));
    }
}
