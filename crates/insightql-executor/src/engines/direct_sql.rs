//! Direct-SQL engine: passthrough execution against a live Postgres, MySQL,
//! or ClickHouse-class connection, for sources where pulling data locally
//! would be wasteful since a live connection already exists.
//!
//! Connection pools are created lazily per data-source id and cached for
//! reuse; ClickHouse has no `sqlx` driver here, so it goes over its native
//! HTTP interface directly.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;
use sqlx::{MySqlPool, PgPool};

use insightql_sql::Dialect;

use crate::engine::Engine;
use crate::engines::row_coercion::{mysql_row_to_map, pg_row_to_map};
use crate::error::{ExecutorError, Result};
use crate::request::EngineRequest;
use crate::result::{EngineKind, EngineResult};

enum Pool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

/// The direct-SQL engine: routes each request to the Postgres/MySQL pool for
/// its data source (creating and caching one on first use) or to
/// ClickHouse's HTTP interface.
pub struct DirectSqlEngine {
    pools: DashMap<String, Arc<Pool>>,
    http: reqwest::Client,
}

impl DirectSqlEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    async fn pool_for(&self, source_id: &str, dsn: &str, dialect: Dialect) -> Result<Arc<Pool>> {
        if let Some(existing) = self.pools.get(source_id) {
            return Ok(existing.clone());
        }
        let pool = match dialect {
            Dialect::Postgres => Pool::Postgres(
                PgPool::connect(dsn)
                    .await
                    .map_err(|e| ExecutorError::Transient(format!("postgres connect failed: {e}")))?,
            ),
            Dialect::MySql => Pool::MySql(
                MySqlPool::connect(dsn)
                    .await
                    .map_err(|e| ExecutorError::Transient(format!("mysql connect failed: {e}")))?,
            ),
            _ => return Err(ExecutorError::Permanent(format!("unsupported direct-sql dialect: {dialect:?}"))),
        };
        let pool = Arc::new(pool);
        self.pools.insert(source_id.to_string(), pool.clone());
        Ok(pool)
    }

    async fn execute_postgres(&self, pool: &PgPool, sql: &str) -> Result<Vec<IndexMap<String, Value>>> {
        let rows = sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(rows.iter().map(pg_row_to_map).collect())
    }

    async fn execute_mysql(&self, pool: &MySqlPool, sql: &str) -> Result<Vec<IndexMap<String, Value>>> {
        let rows = sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(rows.iter().map(mysql_row_to_map).collect())
    }

    async fn execute_clickhouse(&self, request: &EngineRequest, sql: &str) -> Result<Vec<IndexMap<String, Value>>> {
        let info = &request.data_source.connection_info;
        let base_url = info
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::Permanent("clickhouse source missing 'url'".to_string()))?;
        let database = info.get("database").and_then(Value::as_str).unwrap_or("default");

        let mut query = sql.trim_end().trim_end_matches(';').to_string();
        if !query.to_ascii_uppercase().contains("FORMAT JSON") {
            query.push_str(" FORMAT JSON");
        }

        let mut req = self.http.post(base_url).query(&[("database", database)]).body(query);
        if let Some(user) = info.get("username").and_then(Value::as_str) {
            req = req.basic_auth(user, info.get("password").and_then(Value::as_str));
        }

        let response = req.send().await.map_err(|e| ExecutorError::Transient(format!("clickhouse request failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Syntactic(format!("clickhouse returned {status}: {body}")));
        }

        let body: ClickHouseJsonResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::Other(format!("clickhouse response decode failed: {e}")))?;
        Ok(body.data)
    }
}

impl Default for DirectSqlEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(serde::Deserialize)]
struct ClickHouseJsonResponse {
    #[serde(default)]
    data: Vec<IndexMap<String, Value>>,
}

fn classify_sqlx_error(err: sqlx::Error) -> ExecutorError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ExecutorError::Transient(err.to_string()),
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::TypeNotFound { .. } => ExecutorError::Syntactic(err.to_string()),
        _ => ExecutorError::Permanent(err.to_string()),
    }
}

#[async_trait]
impl Engine for DirectSqlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DirectSql
    }

    async fn execute(&self, request: &EngineRequest) -> Result<EngineResult> {
        let dialect = request.data_source.dialect();
        let data = if dialect == Dialect::ClickHouse {
            self.execute_clickhouse(request, &request.sql_text).await?
        } else {
            let dsn = request
                .data_source
                .connection_info
                .get("dsn")
                .and_then(Value::as_str)
                .ok_or_else(|| ExecutorError::Permanent("database source missing 'dsn'".to_string()))?;
            let pool = self.pool_for(&request.data_source.id, dsn, dialect).await?;
            match pool.as_ref() {
                Pool::Postgres(p) => self.execute_postgres(p, &request.sql_text).await?,
                Pool::MySql(p) => self.execute_mysql(p, &request.sql_text).await?,
            }
        };
        Ok(EngineResult::success(data, EngineKind::DirectSql, 0))
    }
}
