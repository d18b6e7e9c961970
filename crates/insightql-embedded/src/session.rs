//! One in-process DuckDB session per data source: materializes inline row
//! samples or downloaded file bytes into a table named `data` (plus a view
//! aliased to the source's id, so a query written against either name
//! resolves), and answers queries against it.

use std::io::Write as _;

use duckdb::types::Value as DuckValue;
use duckdb::Connection;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{EmbeddedError, Result};

/// The canonical table name every embedded query is rewritten to target.
pub const CANONICAL_TABLE: &str = "data";

/// A single DuckDB in-memory connection plus the bookkeeping needed to avoid
/// re-materializing the same source twice.
pub struct DuckDbSession {
    conn: Connection,
    loaded: bool,
}

impl DuckDbSession {
    /// Open a fresh in-memory session.
    pub fn open() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, loaded: false })
    }

    /// Load `rows` into `data`, inferring each column's DuckDB type from the
    /// first row's JSON value, then aliasing `data` as a view named `alias`
    /// (if it differs) so queries naming the source id directly still work.
    pub fn load_inline_rows(&mut self, rows: &[IndexMap<String, JsonValue>], alias: Option<&str>) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let Some(first) = rows.first() else {
            self.conn.execute_batch(&format!("CREATE TABLE {CANONICAL_TABLE} (placeholder VARCHAR)"))?;
            self.loaded = true;
            return Ok(());
        };

        let columns: Vec<(String, &'static str)> =
            first.iter().map(|(name, value)| (name.clone(), duckdb_type_for(value))).collect();
        let ddl = columns
            .iter()
            .map(|(name, ty)| format!("\"{name}\" {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute_batch(&format!("CREATE TABLE {CANONICAL_TABLE} ({ddl})"))?;

        let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let column_names = columns.iter().map(|(n, _)| format!("\"{n}\"")).collect::<Vec<_>>().join(", ");
        let insert_sql = format!("INSERT INTO {CANONICAL_TABLE} ({column_names}) VALUES ({placeholders})");
        let mut stmt = self.conn.prepare(&insert_sql)?;

        for row in rows {
            let values: Vec<DuckValue> = columns.iter().map(|(name, _)| json_to_duck_value(row.get(name))).collect();
            stmt.execute(duckdb::params_from_iter(values))?;
        }

        if let Some(alias) = alias {
            if alias != CANONICAL_TABLE {
                self.conn
                    .execute_batch(&format!("CREATE VIEW \"{alias}\" AS SELECT * FROM {CANONICAL_TABLE}"))?;
            }
        }

        self.loaded = true;
        Ok(())
    }

    /// Write `bytes` to a temp file and load it via DuckDB's format-specific
    /// reader function, selected from `sub_kind` (`csv`, `json`, `parquet`,
    /// `excel`/`xlsx`).
    pub fn load_file_bytes(&mut self, bytes: &[u8], sub_kind: &str, alias: Option<&str>) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let reader_fn = match sub_kind.to_ascii_lowercase().as_str() {
            "csv" => "read_csv_auto",
            "json" | "jsonl" | "ndjson" => "read_json_auto",
            "parquet" => "read_parquet",
            other => return Err(EmbeddedError::UnsupportedFormat(other.to_string())),
        };

        let suffix = format!(".{}", sub_kind.to_ascii_lowercase());
        let mut file = tempfile::Builder::new()
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| EmbeddedError::FileFetch(e.to_string()))?;
        file.write_all(bytes).map_err(|e| EmbeddedError::FileFetch(e.to_string()))?;
        file.flush().map_err(|e| EmbeddedError::FileFetch(e.to_string()))?;

        let path = file.path().to_string_lossy().to_string();
        self.conn.execute_batch(&format!(
            "CREATE TABLE {CANONICAL_TABLE} AS SELECT * FROM {reader_fn}('{path}')"
        ))?;

        // Keep the tempfile alive only for the duration of the load; DuckDB
        // has already materialized the table into its own storage.
        drop(file);

        if let Some(alias) = alias {
            if alias != CANONICAL_TABLE {
                self.conn
                    .execute_batch(&format!("CREATE VIEW \"{alias}\" AS SELECT * FROM {CANONICAL_TABLE}"))?;
            }
        }

        self.loaded = true;
        Ok(())
    }

    /// Run `sql` against this session and return the rows as ordered,
    /// JSON-valued maps.
    pub fn query(&self, sql: &str) -> Result<Vec<IndexMap<String, JsonValue>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let names: Vec<String> = (0..column_count)
            .map(|i| stmt.column_name(i).map(ToString::to_string).unwrap_or_else(|_| format!("col_{i}")))
            .collect();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = IndexMap::new();
            for (i, name) in names.iter().enumerate() {
                let value: DuckValue = row.get(i)?;
                map.insert(name.clone(), duck_value_to_json(&value));
            }
            out.push(map);
        }
        Ok(out)
    }
}

fn duckdb_type_for(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Bool(_) => "BOOLEAN",
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => "BIGINT",
        JsonValue::Number(_) => "DOUBLE",
        _ => "VARCHAR",
    }
}

fn json_to_duck_value(value: Option<&JsonValue>) -> DuckValue {
    match value {
        None | Some(JsonValue::Null) => DuckValue::Null,
        Some(JsonValue::Bool(b)) => DuckValue::Boolean(*b),
        Some(JsonValue::Number(n)) => {
            if let Some(i) = n.as_i64() {
                DuckValue::BigInt(i)
            } else if let Some(f) = n.as_f64() {
                DuckValue::Double(f)
            } else {
                DuckValue::Null
            }
        }
        Some(JsonValue::String(s)) => DuckValue::Text(s.clone()),
        Some(other) => DuckValue::Text(other.to_string()),
    }
}

fn duck_value_to_json(value: &DuckValue) -> JsonValue {
    match value {
        DuckValue::Null => JsonValue::Null,
        DuckValue::Boolean(b) => JsonValue::Bool(*b),
        DuckValue::TinyInt(v) => JsonValue::Number((*v as i64).into()),
        DuckValue::SmallInt(v) => JsonValue::Number((*v as i64).into()),
        DuckValue::Int(v) => JsonValue::Number((*v as i64).into()),
        DuckValue::BigInt(v) => JsonValue::Number((*v).into()),
        DuckValue::UTinyInt(v) => JsonValue::Number((*v as i64).into()),
        DuckValue::USmallInt(v) => JsonValue::Number((*v as i64).into()),
        DuckValue::UInt(v) => JsonValue::Number((*v as i64).into()),
        DuckValue::UBigInt(v) => JsonValue::Number((*v as i64).into()),
        DuckValue::Float(v) => serde_json::Number::from_f64(f64::from(*v)).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        DuckValue::Double(v) => serde_json::Number::from_f64(*v).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        DuckValue::Text(s) => JsonValue::String(s.clone()),
        _ => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, JsonValue)]) -> IndexMap<String, JsonValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn infers_bigint_double_boolean_and_varchar() {
        assert_eq!(duckdb_type_for(&serde_json::json!(1)), "BIGINT");
        assert_eq!(duckdb_type_for(&serde_json::json!(1.5)), "DOUBLE");
        assert_eq!(duckdb_type_for(&serde_json::json!(true)), "BOOLEAN");
        assert_eq!(duckdb_type_for(&serde_json::json!("x")), "VARCHAR");
    }

    #[test]
    fn loads_inline_rows_and_queries_them_back() {
        let mut session = DuckDbSession::open().unwrap();
        let rows = vec![
            row(&[("name", serde_json::json!("alice")), ("age", serde_json::json!(30))]),
            row(&[("name", serde_json::json!("bob")), ("age", serde_json::json!(25))]),
        ];
        session.load_inline_rows(&rows, Some("people")).unwrap();

        let result = session.query("SELECT name, age FROM data ORDER BY age").unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0]["name"], serde_json::json!("bob"));

        let via_alias = session.query("SELECT COUNT(*) AS n FROM people").unwrap();
        assert_eq!(via_alias[0]["n"], serde_json::json!(2));
    }

    #[test]
    fn second_load_is_a_noop_once_loaded() {
        let mut session = DuckDbSession::open().unwrap();
        let rows = vec![row(&[("x", serde_json::json!(1))])];
        session.load_inline_rows(&rows, None).unwrap();
        session.load_inline_rows(&rows, None).unwrap();
        let result = session.query("SELECT COUNT(*) AS n FROM data").unwrap();
        assert_eq!(result[0]["n"], serde_json::json!(1));
    }
}
