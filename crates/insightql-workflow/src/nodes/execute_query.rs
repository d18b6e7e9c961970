//! Dispatches the validated SQL through the Multi-Engine Executor and
//! normalizes its result onto the state record.

use std::sync::Arc;

use insightql_executor::request::EngineOverride;
use insightql_executor::EngineRequest;

use crate::error::WorkflowError;
use crate::extraction::{reconcile_column_names, rekey_rows};
use crate::orchestrator::WorkflowContext;
use crate::state::{ErrorRecord, Stage, WorkflowState};

pub async fn run(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    let Some(sql_text) = state.sql_query.clone() else {
        return fail(state, WorkflowError::ExecutionPermanent("no SQL query to execute".to_string()));
    };
    let Some(data_source_id) = state.data_source_id.clone() else {
        return fail(state, WorkflowError::ExecutionPermanent("no data source bound".to_string()));
    };

    let descriptor = match ctx.data_service.get_data_source_by_id(&data_source_id).await {
        Ok(descriptor) => descriptor,
        Err(err) => return fail(state, WorkflowError::ExecutionPermanent(err.to_string())),
    };

    let scope = format!("{}/{}", state.organization_id, state.project_id.clone().unwrap_or_default());
    let request = EngineRequest {
        sql_text: sql_text.clone(),
        data_source: descriptor,
        scope,
        read_only: true,
        allow_cache: true,
        optimization_flag: false,
        engine_override: EngineOverride::Auto,
    };

    match ctx.executor.execute(&request).await {
        Ok(result) => {
            if !result.success {
                return fail(
                    state,
                    WorkflowError::ExecutionPermanent(result.error.unwrap_or_else(|| "engine reported failure".to_string())),
                );
            }
            let columns = reconcile_column_names(&sql_text, result.columns);
            state.query_result = rekey_rows(result.data, &columns);
            state.query_result_columns = columns;
            state.query_result_row_count = result.row_count;
            state.query_execution_error = None;
            state.execution_metadata.timings_ms.insert("execute_query".to_string(), result.execution_time_ms);
            state.set_progress(55.0, "executed query", Stage::ExecuteQuery);
            state
        }
        Err(err) => fail(state, err.into()),
    }
}

fn fail(mut state: WorkflowState, err: WorkflowError) -> WorkflowState {
    state.query_execution_error = Some(ErrorRecord { kind: err.kind_tag().to_string(), message: err.to_string() });
    state.set_progress(55.0, err.to_string(), Stage::ExecuteQuery);
    state
}
