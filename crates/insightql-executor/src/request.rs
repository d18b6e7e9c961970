//! Request-side types: a data source descriptor, the shape analysis computed
//! from its SQL, and the fully-assembled request an [`crate::engine::Engine`]
//! executes.

use indexmap::IndexMap;
use insightql_sql::Dialect;
use serde::{Deserialize, Serialize};

/// The broad category of data source behind a query, driving both engine
/// selection and connection handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    /// A flat file (CSV, Excel, JSON, Parquet) loaded into the embedded engine.
    File,
    /// A conventional relational database reachable over a driver connection.
    Database,
    /// A column-oriented analytic warehouse queried over its native protocol.
    Warehouse,
    /// A remote HTTP endpoint returning tabular data.
    Api,
}

/// One column's declared name and type, as known from a prior schema
/// inspection (not necessarily the live source — may be stale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub type_name: String,
}

/// The columns and (if known) row count of one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
    pub row_count: Option<u64>,
}

/// The known schema of a data source: zero or more named tables. An empty
/// schema means "unknown" — grounding checks are skipped, not failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: IndexMap<String, TableSchema>,
}

impl Schema {
    /// Total row count across all tables with a known count, used as the
    /// `data_size` signal for engine selection.
    #[must_use]
    pub fn total_row_count(&self) -> u64 {
        self.tables.values().filter_map(|t| t.row_count).sum()
    }

    /// The set of table names this schema declares, for grounding checks.
    #[must_use]
    pub fn known_table_names(&self) -> std::collections::HashSet<String> {
        self.tables.keys().cloned().collect()
    }
}

/// A connection/addressing descriptor for a single data source. `connection_info`
/// is intentionally opaque key-value data (DSN, base URL, headers, auth) since
/// its shape varies per `sub_kind` and is owned by the caller's `DataService`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    pub id: String,
    pub kind: DataSourceKind,
    /// Specific flavor within `kind`, e.g. `"csv"`, `"clickhouse"`, `"postgres"`.
    pub sub_kind: String,
    pub connection_info: IndexMap<String, serde_json::Value>,
    pub schema: Schema,
    /// A small inline sample of rows, used by the embedded engine to answer
    /// queries against data that was never materialized into a table.
    pub inline_sample: Option<Vec<IndexMap<String, serde_json::Value>>>,
}

impl DataSourceDescriptor {
    /// The [`Dialect`] this source's SQL should be rewritten for.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        Dialect::from_sub_kind(&self.sub_kind)
    }
}

/// Structural features of a query detected from its text, used to pick an
/// engine independent of `data_size` (e.g. heavy aggregation prefers the
/// dedicated aggregation engine even over modestly sized data).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryShape {
    pub has_joins: bool,
    pub has_aggregations: bool,
    pub has_subqueries: bool,
    pub has_window_functions: bool,
}

impl QueryShape {
    /// Whether this query shape indicates analytically heavy work (any of
    /// aggregation, window functions, or subqueries), the signal `select_engine`
    /// uses to prefer the aggregation engine over the embedded one once data
    /// size crosses the mid-size threshold.
    #[must_use]
    pub fn is_aggregation_heavy(&self) -> bool {
        self.has_aggregations || self.has_window_functions || self.has_subqueries
    }
}

/// An explicit caller override bypassing automatic engine selection, used by
/// callers that already know which engine a query must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineOverride {
    Auto,
    Force(crate::result::EngineKind),
}

impl Default for EngineOverride {
    fn default() -> Self {
        Self::Auto
    }
}

/// A fully assembled request to execute `sql_text` against `data_source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRequest {
    pub sql_text: String,
    pub data_source: DataSourceDescriptor,
    /// Cache/selection scope, e.g. `"{org}/{project}"`, kept opaque to this
    /// crate but used verbatim as part of the cache key.
    pub scope: String,
    pub read_only: bool,
    /// Whether result caching may be used for this request.
    pub allow_cache: bool,
    /// Whether the engine should apply its own query-optimization pass
    /// (e.g. predicate pushdown, join reordering) before executing. Part of
    /// the cache key, since an optimized and unoptimized run of the same SQL
    /// are not guaranteed to return byte-identical results.
    pub optimization_flag: bool,
    pub engine_override: EngineOverride,
}

impl EngineRequest {
    /// Compute this request's [`QueryShape`] from its SQL text.
    #[must_use]
    pub fn query_shape(&self) -> QueryShape {
        crate::selection::analyze_query_shape(&self.sql_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_total_row_count_sums_known_counts() {
        let mut tables = IndexMap::new();
        tables.insert(
            "a".to_string(),
            TableSchema { columns: vec![], row_count: Some(10) },
        );
        tables.insert(
            "b".to_string(),
            TableSchema { columns: vec![], row_count: None },
        );
        let schema = Schema { tables };
        assert_eq!(schema.total_row_count(), 10);
    }

    #[test]
    fn aggregation_heavy_detects_any_heavy_feature() {
        let shape = QueryShape { has_subqueries: true, ..Default::default() };
        assert!(shape.is_aggregation_heavy());
        assert!(!QueryShape::default().is_aggregation_heavy());
    }

    #[test]
    fn engine_override_defaults_to_auto() {
        assert_eq!(EngineOverride::default(), EngineOverride::Auto);
    }
}
