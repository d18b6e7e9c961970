//! Aggregation-Model engine: converts a SQL query into a measures/dimensions/
//! time-dimensions/filters/limit request against a remote cube-style
//! aggregation service, rather than pushing raw SQL at a warehouse connection
//! the way [`crate::engines::direct_sql::DirectSqlEngine`] does.
//!
//! The concrete service (Cube.js-shaped or otherwise) is deliberately not
//! vendored here — bringing up a specific aggregation backend is enterprise
//! connector bring-up, out of scope for this crate — so this module defines
//! the [`AggregationServiceClient`] seam a deployment implements, the same
//! way `insightql-workflow`'s `LlmClient`/`DataService` traits have no
//! concrete production backend.

use async_trait::async_trait;

use insightql_sql::tokenizer::{tokenize_sql, SqlToken};

use crate::engine::Engine;
use crate::error::{ExecutorError, Result};
use crate::request::EngineRequest;
use crate::result::{EngineKind, EngineResult};

const AGGREGATE_FUNCTIONS: &[&str] = &["SUM", "AVG", "COUNT", "MIN", "MAX", "GROUP_CONCAT", "ARRAY_AGG"];
const TIME_FUNCTIONS: &[&str] = &["DATE_TRUNC", "TOSTARTOFMONTH", "TOMONTH", "TOYEAR", "TODATE"];

/// A SQL query converted into the shape a measures/dimensions-oriented cube
/// service expects. Built by [`cube_query_from_sql`] from the outer `SELECT`
/// projection, `GROUP BY` list, and `LIMIT`; `filters` is kept as the raw
/// `WHERE` clause text rather than decomposed further, since the cube
/// service's filter grammar is deployment-specific.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CubeQueryRequest {
    pub measures: Vec<String>,
    pub dimensions: Vec<String>,
    pub time_dimensions: Vec<String>,
    pub filters: Option<String>,
    pub limit: Option<u64>,
}

/// Anything capable of serving a [`CubeQueryRequest`]: a hosted aggregation
/// service client, or (in tests) a canned-response double. Reachability is
/// checked before every dispatch so an unreachable service is treated as an
/// engine-selection failure, not a critical one.
#[async_trait]
pub trait AggregationServiceClient: Send + Sync {
    /// Cheap liveness/reachability probe, checked before every query.
    async fn is_reachable(&self) -> bool;

    /// Run `request` against the cube service and return its rows in the
    /// uniform [`EngineResult`] shape.
    async fn query_cube(&self, request: &CubeQueryRequest) -> Result<EngineResult>;
}

/// An [`AggregationServiceClient`] with no backing service: always
/// unreachable. The default registered client when a deployment hasn't
/// wired in a real one, so engine selection degrades to
/// [`crate::error::ExecutorError::EngineUnavailable`] instead of panicking
/// or silently executing against the wrong engine.
#[derive(Debug, Default)]
pub struct UnconfiguredAggregationClient;

#[async_trait]
impl AggregationServiceClient for UnconfiguredAggregationClient {
    async fn is_reachable(&self) -> bool {
        false
    }

    async fn query_cube(&self, _request: &CubeQueryRequest) -> Result<EngineResult> {
        Err(ExecutorError::EngineUnavailable)
    }
}

/// Convert `sql`'s outer `SELECT`/`GROUP BY`/`WHERE`/`LIMIT` clauses into a
/// [`CubeQueryRequest`]: aggregate-function projections become `measures`,
/// time-bucketing projections become `time_dimensions`, plain `GROUP BY`
/// columns become `dimensions`, and the raw `WHERE` text (if any) is carried
/// as `filters` verbatim.
#[must_use]
pub fn cube_query_from_sql(sql: &str) -> CubeQueryRequest {
    // Tokenized directly off the raw SQL rather than through
    // `strip_sql_comments_and_strings`: that routine blanks string-literal
    // content, which would erase filter values (`WHERE region = 'us'`) this
    // function needs to carry through to the cube service. Best-effort only
    // — this feeds an external request builder, not a security boundary.
    let tokens = tokenize_sql(sql);

    let select_idx = tokens
        .iter()
        .position(|t| matches!(t, SqlToken::Word(w) if w.eq_ignore_ascii_case("SELECT")));
    let from_idx = tokens
        .iter()
        .position(|t| matches!(t, SqlToken::Word(w) if w.eq_ignore_ascii_case("FROM")));
    let group_by_idx = find_two_word_clause(&tokens, "GROUP", "BY");
    let where_idx = tokens
        .iter()
        .position(|t| matches!(t, SqlToken::Word(w) if w.eq_ignore_ascii_case("WHERE")));
    let order_by_idx = find_two_word_clause(&tokens, "ORDER", "BY");
    let limit_idx = tokens
        .iter()
        .position(|t| matches!(t, SqlToken::Word(w) if w.eq_ignore_ascii_case("LIMIT")));

    let mut measures = Vec::new();
    let mut dimensions = Vec::new();
    let mut time_dimensions = Vec::new();

    if let (Some(s), Some(f)) = (select_idx, from_idx) {
        for expr in split_projection(&tokens[s + 1..f]) {
            let joined = expr.join(" ");
            if expr.iter().any(|w| AGGREGATE_FUNCTIONS.iter().any(|f| w.eq_ignore_ascii_case(f))) {
                measures.push(joined);
            } else if expr.iter().any(|w| TIME_FUNCTIONS.iter().any(|f| w.eq_ignore_ascii_case(f))) {
                time_dimensions.push(joined);
            } else {
                dimensions.push(joined);
            }
        }
    }

    // `GROUP BY` re-confirms the dimension list when present; prefer it
    // verbatim since it is what the service will actually bucket on.
    if let Some(g) = group_by_idx {
        let end = where_idx.or(order_by_idx).or(limit_idx).unwrap_or(tokens.len());
        let group_cols: Vec<String> = split_projection(&tokens[g + 2..end])
            .into_iter()
            .map(|expr| expr.join(" "))
            .filter(|s| !s.is_empty())
            .collect();
        if !group_cols.is_empty() {
            dimensions = group_cols;
        }
    }

    let filters = where_idx.map(|w| {
        let end = group_by_idx.or(order_by_idx).or(limit_idx).unwrap_or(tokens.len());
        render_tokens(&tokens[w + 1..end])
    });

    let limit = limit_idx.and_then(|l| match tokens.get(l + 1) {
        Some(SqlToken::Word(w)) => w.parse::<u64>().ok(),
        _ => None,
    });

    CubeQueryRequest { measures, dimensions, time_dimensions, filters, limit }
}

fn find_two_word_clause(tokens: &[SqlToken<'_>], first: &str, second: &str) -> Option<usize> {
    tokens.windows(2).position(|w| {
        matches!(w[0], SqlToken::Word(a) if a.eq_ignore_ascii_case(first))
            && matches!(w[1], SqlToken::Word(b) if b.eq_ignore_ascii_case(second))
    })
}

fn split_projection(tokens: &[SqlToken<'_>]) -> Vec<Vec<&str>> {
    let mut exprs = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0i32;
    for tok in tokens {
        match tok {
            SqlToken::Punct('(') => {
                depth += 1;
                current.push("(");
            }
            SqlToken::Punct(')') => {
                depth -= 1;
                current.push(")");
            }
            SqlToken::Punct(',') if depth == 0 => {
                if !current.is_empty() {
                    exprs.push(std::mem::take(&mut current));
                }
            }
            SqlToken::Word(w) | SqlToken::Quoted(w) => current.push(w),
            SqlToken::Punct(_) => {}
        }
    }
    if !current.is_empty() {
        exprs.push(current);
    }
    exprs
}

fn render_tokens(tokens: &[SqlToken<'_>]) -> String {
    let mut out = String::new();
    for tok in tokens {
        match tok {
            SqlToken::Word(w) | SqlToken::Quoted(w) => {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(w);
            }
            SqlToken::Punct(c) => out.push(*c),
        }
    }
    out
}

/// Dispatches through an [`AggregationServiceClient`], checking reachability
/// first and tagging every result as [`EngineKind::Aggregation`].
pub struct AggregationEngine {
    client: std::sync::Arc<dyn AggregationServiceClient>,
}

impl AggregationEngine {
    #[must_use]
    pub fn new(client: std::sync::Arc<dyn AggregationServiceClient>) -> Self {
        Self { client }
    }
}

impl Default for AggregationEngine {
    /// No aggregation service configured: every request fails with
    /// [`ExecutorError::EngineUnavailable`] until [`Self::new`] is called
    /// with a real client.
    fn default() -> Self {
        Self::new(std::sync::Arc::new(UnconfiguredAggregationClient))
    }
}

#[async_trait]
impl Engine for AggregationEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Aggregation
    }

    async fn is_available(&self) -> bool {
        self.client.is_reachable().await
    }

    async fn execute(&self, request: &EngineRequest) -> Result<EngineResult> {
        if !self.client.is_reachable().await {
            return Err(ExecutorError::EngineUnavailable);
        }
        let cube_request = cube_query_from_sql(&request.sql_text);
        let mut result = self.client.query_cube(&cube_request).await?;
        result.engine_used = EngineKind::Aggregation;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use std::sync::Arc;

    struct CannedClient {
        reachable: bool,
        rows: Vec<IndexMap<String, serde_json::Value>>,
    }

    #[async_trait]
    impl AggregationServiceClient for CannedClient {
        async fn is_reachable(&self) -> bool {
            self.reachable
        }

        async fn query_cube(&self, _request: &CubeQueryRequest) -> Result<EngineResult> {
            Ok(EngineResult::success(self.rows.clone(), EngineKind::Aggregation, 0))
        }
    }

    #[test]
    fn reports_aggregation_kind() {
        assert_eq!(AggregationEngine::default().kind(), EngineKind::Aggregation);
    }

    #[tokio::test]
    async fn unconfigured_client_is_unavailable() {
        let engine = AggregationEngine::default();
        assert!(!engine.is_available().await);
    }

    #[tokio::test]
    async fn unreachable_client_returns_engine_unavailable_without_dispatch() {
        let engine = AggregationEngine::new(Arc::new(CannedClient { reachable: false, rows: vec![] }));
        let request = EngineRequest {
            sql_text: "SELECT region, SUM(amount) FROM sales GROUP BY region".to_string(),
            data_source: crate::request::DataSourceDescriptor {
                id: "src".to_string(),
                kind: crate::request::DataSourceKind::Warehouse,
                sub_kind: "clickhouse".to_string(),
                connection_info: IndexMap::new(),
                schema: crate::request::Schema::default(),
                inline_sample: None,
            },
            scope: String::new(),
            read_only: true,
            allow_cache: false,
            optimization_flag: false,
            engine_override: crate::request::EngineOverride::Auto,
        };
        let err = engine.execute(&request).await.unwrap_err();
        assert!(matches!(err, ExecutorError::EngineUnavailable));
    }

    #[test]
    fn converts_aggregate_projection_to_measures() {
        let req = cube_query_from_sql("SELECT region, SUM(amount) FROM sales GROUP BY region");
        assert_eq!(req.dimensions, vec!["region".to_string()]);
        assert!(req.measures[0].to_ascii_uppercase().contains("SUM"));
    }

    #[test]
    fn extracts_time_dimension_projection() {
        let req = cube_query_from_sql(
            "SELECT date_trunc(month, ts), COUNT(*) FROM events GROUP BY date_trunc(month, ts)",
        );
        assert_eq!(req.time_dimensions.len(), 1);
    }

    #[test]
    fn extracts_filters_and_limit() {
        let req = cube_query_from_sql("SELECT SUM(amount) FROM sales WHERE region = 'us' LIMIT 50");
        assert_eq!(req.filters.as_deref(), Some("region us"));
        assert_eq!(req.limit, Some(50));
    }

    #[test]
    fn query_without_where_or_limit_has_none_for_both() {
        let req = cube_query_from_sql("SELECT SUM(amount) FROM sales");
        assert!(req.filters.is_none());
        assert!(req.limit.is_none());
    }
}
