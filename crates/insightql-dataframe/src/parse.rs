//! Parse a fetched response body into rows, dispatching on the source's
//! declared `sub_kind` (`json`, `csv`, `excel`/`xlsx`).

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, DataType, Reader};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{DataFrameError, Result};

/// Parse `bytes` according to `sub_kind` into ordered, JSON-valued rows.
pub fn parse_rows(bytes: &[u8], sub_kind: &str) -> Result<Vec<IndexMap<String, Value>>> {
    match sub_kind.to_ascii_lowercase().as_str() {
        "json" => parse_json(bytes),
        "csv" => parse_csv(bytes),
        "excel" | "xlsx" | "xls" => parse_excel(bytes),
        other => Err(DataFrameError::UnsupportedFormat(other.to_string())),
    }
}

/// Parse a JSON array of objects (or a single object, treated as one row).
fn parse_json(bytes: &[u8]) -> Result<Vec<IndexMap<String, Value>>> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| DataFrameError::Parse(e.to_string()))?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map.into_iter().collect()),
                other => Err(DataFrameError::Parse(format!("array element is not an object: {other}"))),
            })
            .collect(),
        Value::Object(map) => Ok(vec![map.into_iter().collect()]),
        other => Err(DataFrameError::Parse(format!("top-level JSON value is not an array or object: {other}"))),
    }
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<IndexMap<String, Value>>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers = reader.headers().map_err(|e| DataFrameError::Parse(e.to_string()))?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DataFrameError::Parse(e.to_string()))?;
        let mut row = IndexMap::new();
        for (name, field) in headers.iter().zip(record.iter()) {
            row.insert(name.to_string(), coerce_csv_field(field));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Coerce a CSV field into a JSON value, trying integer then float before
/// falling back to a plain string (CSV carries no type information).
fn coerce_csv_field(field: &str) -> Value {
    if field.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = field.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = field.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(field.to_string())
}

fn parse_excel(bytes: &[u8]) -> Result<Vec<IndexMap<String, Value>>> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor).map_err(|e| DataFrameError::Parse(e.to_string()))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DataFrameError::Parse("workbook has no sheets".to_string()))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .ok_or_else(|| DataFrameError::Parse(format!("sheet '{sheet_name}' not found")))?
        .map_err(|e| DataFrameError::Parse(e.to_string()))?;

    let mut rows_iter = range.rows();
    let Some(header_row) = rows_iter.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row.iter().map(calamine_cell_to_string).collect();

    let mut rows = Vec::new();
    for data_row in rows_iter {
        let mut row = IndexMap::new();
        for (name, cell) in headers.iter().zip(data_row.iter()) {
            row.insert(name.clone(), calamine_cell_to_json(cell));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn calamine_cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn calamine_cell_to_json(cell: &DataType) -> Value {
    match cell {
        DataType::Empty => Value::Null,
        DataType::String(s) => Value::String(s.clone()),
        DataType::Bool(b) => Value::Bool(*b),
        DataType::Int(i) => Value::Number((*i).into()),
        DataType::Float(f) | DataType::DateTime(f) => {
            serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
        }
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_of_objects() {
        let rows = parse_rows(br#"[{"a":1,"b":"x"},{"a":2,"b":"y"}]"#, "json").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["a"], serde_json::json!(1));
    }

    #[test]
    fn parses_single_json_object_as_one_row() {
        let rows = parse_rows(br#"{"a":1}"#, "json").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn parses_csv_with_mixed_types() {
        let rows = parse_rows(b"name,age,score\nalice,30,9.5\nbob,25,8.0\n", "csv").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], serde_json::json!("alice"));
        assert_eq!(rows[0]["age"], serde_json::json!(30));
        assert_eq!(rows[0]["score"], serde_json::json!(9.5));
    }

    #[test]
    fn empty_csv_field_becomes_null() {
        let rows = parse_rows(b"a,b\n1,\n", "csv").unwrap();
        assert_eq!(rows[0]["b"], Value::Null);
    }

    #[test]
    fn unsupported_format_is_rejected() {
        assert!(parse_rows(b"whatever", "parquet").is_err());
    }
}
