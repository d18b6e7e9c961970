//! Positional-row-to-JSON coercion shared by the direct-SQL engines: `sqlx`
//! hands back rows addressed by position and a driver-specific type name
//! string, never structured JSON, so every row has to be walked column by
//! column and coerced by matching on that type name.

use indexmap::IndexMap;
use serde_json::Value;
use sqlx::{Column, Row, TypeInfo};

/// Coerce one `sqlx::postgres::PgRow` into a JSON-valued map keyed by column
/// name, matching Postgres's `type_info().name()` strings (`INT4`, `FLOAT8`,
/// `BOOL`, ...) the way the driver reports them.
#[must_use]
pub fn pg_row_to_map(row: &sqlx::postgres::PgRow) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        let type_name = col.type_info().name();
        let value = match type_name {
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" => row
                .try_get::<String, _>(i)
                .map(Value::String)
                .unwrap_or(Value::Null),
            "INT2" | "INT4" | "SERIAL" => row
                .try_get::<i32, _>(i)
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "INT8" | "BIGSERIAL" => row
                .try_get::<i64, _>(i)
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "FLOAT4" => row
                .try_get::<f32, _>(i)
                .ok()
                .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "FLOAT8" | "NUMERIC" => row
                .try_get::<f64, _>(i)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "BOOL" => row.try_get::<bool, _>(i).map(Value::Bool).unwrap_or(Value::Null),
            "JSON" | "JSONB" => row.try_get::<Value, _>(i).unwrap_or(Value::Null),
            "TIMESTAMP" | "TIMESTAMPTZ" | "DATE" => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .map(|v| Value::String(v.to_string()))
                .or_else(|_| row.try_get::<String, _>(i).map(Value::String))
                .unwrap_or(Value::Null),
            _ => row.try_get::<String, _>(i).map(Value::String).unwrap_or(Value::Null),
        };
        out.insert(name, value);
    }
    out
}

/// Coerce one `sqlx::mysql::MySqlRow` into a JSON-valued map keyed by column
/// name, matching MySQL's type name strings (`INT`, `DOUBLE`, `BOOLEAN`, ...).
#[must_use]
pub fn mysql_row_to_map(row: &sqlx::mysql::MySqlRow) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        let type_name = col.type_info().name();
        let value = match type_name {
            "VARCHAR" | "CHAR" | "TEXT" => row
                .try_get::<String, _>(i)
                .map(Value::String)
                .unwrap_or(Value::Null),
            "INT" | "INTEGER" | "TINYINT" | "SMALLINT" | "MEDIUMINT" => row
                .try_get::<i32, _>(i)
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "BIGINT" => row
                .try_get::<i64, _>(i)
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "FLOAT" => row
                .try_get::<f32, _>(i)
                .ok()
                .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "DOUBLE" | "DECIMAL" => row
                .try_get::<f64, _>(i)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "BOOLEAN" | "BOOL" => row.try_get::<bool, _>(i).map(Value::Bool).unwrap_or(Value::Null),
            "JSON" => row.try_get::<Value, _>(i).unwrap_or(Value::Null),
            "DATETIME" | "TIMESTAMP" | "DATE" => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .map(|v| Value::String(v.to_string()))
                .or_else(|_| row.try_get::<String, _>(i).map(Value::String))
                .unwrap_or(Value::Null),
            _ => row.try_get::<String, _>(i).map(Value::String).unwrap_or(Value::Null),
        };
        out.insert(name, value);
    }
    out
}
