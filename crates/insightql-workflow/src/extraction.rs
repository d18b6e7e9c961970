//! Tolerant extraction of structured data out of LLM completions, and the
//! "did this actually produce something worth showing" rule used to decide
//! whether a stage succeeded.

use indexmap::IndexMap;
use insightql_sql::tokenizer::extract_select_column_names;
use serde_json::Value as JsonValue;

use crate::state::WorkflowState;

/// Strip a fenced ` ```json ... ``` ` (or bare ` ``` ... ``` `) block down
/// to its inner text, if present; otherwise return the input unchanged.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches('\n');
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Scan `text` for the first balanced `{ ... }` span, honoring string
/// literals so a brace inside a quoted value doesn't end the scan early.
fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull a JSON object out of a model completion that may wrap it in prose,
/// markdown fences, or nothing at all. Returns `None` only when no balanced
/// object can be found or it fails to parse.
#[must_use]
pub fn extract_json_object(raw: &str) -> Option<JsonValue> {
    let unfenced = strip_code_fence(raw);
    if let Ok(value) = serde_json::from_str::<JsonValue>(unfenced) {
        if value.is_object() {
            return Some(value);
        }
    }
    let candidate = first_balanced_object(unfenced).or_else(|| first_balanced_object(raw))?;
    serde_json::from_str(candidate).ok()
}

/// When a row's keys come back as `expr_0`, `expr_1`, ... (the tokenizer's
/// fallback for unaliased expressions) but the original `SELECT` list can
/// still be recovered from `sql_query`, rename the columns positionally so
/// the result reads naturally instead of leaking the fallback names.
#[must_use]
pub fn reconcile_column_names(sql_query: &str, columns: Vec<String>) -> Vec<String> {
    let selected = extract_select_column_names(sql_query);
    if selected.is_empty() || selected.len() != columns.len() {
        return columns;
    }
    let all_fallback = columns
        .iter()
        .enumerate()
        .all(|(i, c)| c == &format!("expr_{i}"));
    if all_fallback { selected } else { columns }
}

/// Re-key every row in `rows` to use `columns`, in order. Rows shorter or
/// longer than `columns` are left as-is rather than silently dropping data.
#[must_use]
pub fn rekey_rows(
    rows: Vec<IndexMap<String, JsonValue>>,
    columns: &[String],
) -> Vec<IndexMap<String, JsonValue>> {
    rows.into_iter()
        .map(|row| {
            if row.len() != columns.len() {
                return row;
            }
            row.into_values()
                .zip(columns.iter().cloned())
                .map(|(value, name)| (name, value))
                .collect()
        })
        .collect()
}

/// Narration shorter than this is not considered meaningful on its own.
const MIN_NARRATION_LEN: usize = 50;

/// Whether a state carries *anything* worth showing to the user: a SQL
/// query, a non-empty result set, a chart, insights, or narration of
/// reasonable length. Any one of these is sufficient — this is an OR, not
/// an AND, because a valid query can legitimately produce a chart with no
/// narrative, or insights over a result the chart step declined to
/// visualize, or a bare SQL query the caller can run themselves.
#[must_use]
pub fn has_meaningful_result(state: &WorkflowState) -> bool {
    state.sql_query.is_some()
        || state.query_result_row_count > 0
        || !state.insights.is_empty()
        || state.echarts_config.is_some()
        || state
            .narration
            .as_deref()
            .is_some_and(|n| n.chars().count() >= MIN_NARRATION_LEN)
}
