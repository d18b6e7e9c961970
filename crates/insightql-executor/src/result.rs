//! Result-side types: the engine that served a request and the normalized,
//! possibly-sampled rows it returned.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Which concrete engine served a request, recorded on the result for
/// observability and for cache-key scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// In-process DuckDB-compatible embedded analytic engine.
    Embedded,
    /// Dedicated engine for aggregation-heavy mid-size queries.
    Aggregation,
    /// Warehouse-scale engine for very large datasets.
    BigData,
    /// Direct passthrough SQL execution against a live database/warehouse
    /// connection.
    DirectSql,
    /// Tabular data fetched and parsed from a remote API.
    DataFrame,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Embedded => "embedded",
            Self::Aggregation => "aggregation",
            Self::BigData => "bigdata",
            Self::DirectSql => "direct_sql",
            Self::DataFrame => "dataframe",
        };
        f.write_str(s)
    }
}

/// The normalized outcome of executing one query, uniform across every
/// engine: rows as ordered string-keyed maps, the column order, and sampling
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
    pub success: bool,
    pub data: Vec<IndexMap<String, serde_json::Value>>,
    pub columns: Vec<String>,
    /// The *original* row count before any sampling was applied.
    pub row_count: u64,
    pub engine_used: EngineKind,
    pub execution_time_ms: u64,
    pub cached: bool,
    pub is_sampled: bool,
    pub error: Option<String>,
}

impl EngineResult {
    /// Build a successful result from `data`, deriving `columns` from the
    /// first row (empty if `data` is empty) and setting `row_count` to
    /// `data.len()` prior to any sampling.
    #[must_use]
    pub fn success(data: Vec<IndexMap<String, serde_json::Value>>, engine_used: EngineKind, execution_time_ms: u64) -> Self {
        let columns = data.first().map(|row| row.keys().cloned().collect()).unwrap_or_default();
        let row_count = data.len() as u64;
        Self {
            success: true,
            data,
            columns,
            row_count,
            engine_used,
            execution_time_ms,
            cached: false,
            is_sampled: false,
            error: None,
        }
    }

    /// Build a failed result carrying no rows.
    #[must_use]
    pub fn failure(engine_used: EngineKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            engine_used,
            execution_time_ms: 0,
            cached: false,
            is_sampled: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_derives_columns_from_first_row() {
        let mut row = IndexMap::new();
        row.insert("a".to_string(), serde_json::json!(1));
        row.insert("b".to_string(), serde_json::json!("x"));
        let result = EngineResult::success(vec![row], EngineKind::Embedded, 5);
        assert_eq!(result.columns, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.row_count, 1);
        assert!(result.success);
    }

    #[test]
    fn failure_carries_no_rows() {
        let result = EngineResult::failure(EngineKind::DirectSql, "boom");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.row_count, 0);
    }

    #[test]
    fn engine_kind_display_is_snake_case() {
        assert_eq!(EngineKind::DirectSql.to_string(), "direct_sql");
        assert_eq!(EngineKind::BigData.to_string(), "bigdata");
    }
}
