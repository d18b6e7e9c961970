//! Verifies a query result is non-empty and shape-consistent, and drives the
//! execute/retry loop's counter. The edge function in [`crate::graph`] reads
//! `query_result_row_count` and `query_execution_retry_count` to decide
//! whether to loop back to `execute_query` or hand off to `error_recovery`.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::orchestrator::WorkflowContext;
use crate::state::{ErrorRecord, Stage, WorkflowState};

/// Cap on `query_execution_retry_count`; once reached, an empty result
/// becomes a terminal failure for this branch instead of another retry.
const MAX_EXECUTION_RETRIES: u32 = 2;

pub async fn run(_ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    // execute_query already reported a definitive, non-retryable failure
    // (engine unavailable, syntactic rejection, etc.) — leave it as-is
    // rather than reclassifying it as a retryable empty result.
    if let Some(existing) = &state.query_execution_error {
        if existing.kind != "empty_results" {
            let message = existing.message.clone();
            state.set_progress(60.0, message, Stage::ValidateResults);
            return state;
        }
    }

    let is_empty = state.query_result_row_count == 0 || state.query_result.is_empty();

    if is_empty {
        if state.query_execution_retry_count < MAX_EXECUTION_RETRIES {
            state.query_execution_retry_count += 1;
            state.query_execution_error = Some(ErrorRecord {
                kind: "empty_results".to_string(),
                message: "query returned no rows, retrying".to_string(),
            });
        } else {
            state.query_execution_error = Some(ErrorRecord {
                kind: "empty_results".to_string(),
                message: "Query executed but returned no results after retries".to_string(),
            });
            state.error = Some("Query executed but returned no results after retries".to_string());
        }
        state.set_progress(60.0, "query returned no results", Stage::ValidateResults);
        return state;
    }

    if !rows_have_consistent_shape(&state.query_result) {
        state.query_execution_error = Some(ErrorRecord {
            kind: "invalid_result_shape".to_string(),
            message: "result rows do not share a consistent column set".to_string(),
        });
        state.set_progress(60.0, "inconsistent result shape", Stage::ValidateResults);
        return state;
    }

    state.query_execution_error = None;
    state.set_progress(65.0, "validated results", Stage::ValidateResults);
    state
}

fn rows_have_consistent_shape(rows: &[IndexMap<String, JsonValue>]) -> bool {
    let Some(first) = rows.first() else { return true };
    let expected: Vec<&String> = first.keys().collect();
    rows.iter().all(|row| row.keys().collect::<Vec<_>>() == expected)
}
