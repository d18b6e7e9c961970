//! Generates SQL for the bound data source's dialect, then runs the
//! programmatic post-checks a model call alone cannot be trusted to satisfy:
//! placeholder/corruption rejection and a syntax pre-check.

use std::sync::Arc;

use insightql_sql::placeholder::sanitize_generated_sql;
use insightql_sql::validation::check_syntax;
use serde_json::Value as JsonValue;

use crate::extraction::extract_json_object;
use crate::llm::CompletionRequest;
use crate::orchestrator::WorkflowContext;
use crate::state::{ErrorRecord, ReasoningStep, Stage, WorkflowState};

pub async fn run(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    let Some(data_source_id) = state.data_source_id.clone() else {
        return fail(state, "generation_failure", "no data source bound for SQL generation");
    };

    let descriptor = match ctx.data_service.get_data_source_by_id(&data_source_id).await {
        Ok(descriptor) => descriptor,
        Err(err) => return fail(state, "generation_failure", &format!("could not load data source: {err}")),
    };

    let prompt = build_prompt(&state, &descriptor);
    let request = CompletionRequest::new(prompt)
        .with_system_context(descriptor.dialect().generation_hints())
        .with_temperature(0.2);
    let response = ctx.llm.generate_completion(request).await;

    if !response.success {
        return fail(state, "generation_failure", response.error.as_deref().unwrap_or("model call failed"));
    }

    let Some(parsed) = extract_json_object(&response.content) else {
        return fail(state, "generation_failure", "model response did not contain a parseable JSON object");
    };

    let raw_sql = match parsed.get("sql_query").and_then(JsonValue::as_str) {
        Some(sql) => sql,
        None => return fail(state, "generation_failure", "model response had no sql_query field"),
    };

    let cleaned = match sanitize_generated_sql(raw_sql) {
        Ok(cleaned) => cleaned,
        Err(err) => return fail(state, "syntactic_sql", &err.to_string()),
    };

    if let Err(err) = check_syntax(&cleaned) {
        return fail(state, "syntactic_sql", &err.to_string());
    }

    state.sql_query = Some(cleaned);
    state.query_execution_error = None;
    state.execution_metadata.model_used = state.model.clone();
    state.execution_metadata.reasoning_steps.extend(extract_reasoning_steps(&parsed));
    state.set_progress(25.0, "generated SQL query", Stage::Nl2Sql);
    state
}

fn fail(mut state: WorkflowState, kind: &str, message: &str) -> WorkflowState {
    state.query_execution_error = Some(ErrorRecord { kind: kind.to_string(), message: message.to_string() });
    state.set_progress(25.0, message.to_string(), Stage::Nl2Sql);
    state
}

fn build_prompt(state: &WorkflowState, descriptor: &insightql_executor::request::DataSourceDescriptor) -> String {
    let mut prompt = format!(
        "Generate a SQL query answering: {}\n\nRespond as JSON with keys sql_query, dialect, explanation, confidence, reasoning_steps, success.\n\nSchema:\n",
        state.query
    );
    for (name, table) in &descriptor.schema.tables {
        let columns: Vec<String> = table.columns.iter().map(|c| format!("{} {}", c.name, c.type_name)).collect();
        prompt.push_str(&format!("- {name}({})\n", columns.join(", ")));
    }
    if let Some(previous) = &state.sql_query {
        prompt.push_str(&format!("\nPrevious attempt to refine: {previous}\n"));
    }
    if !state.conversation_history.is_empty() {
        prompt.push_str("\nRecent conversation, oldest first:\n");
        for turn in &state.conversation_history {
            prompt.push_str(&format!("- {:?}: {}\n", turn.role, turn.content));
        }
    }
    prompt
}

fn extract_reasoning_steps(parsed: &JsonValue) -> Vec<ReasoningStep> {
    let Some(steps) = parsed.get("reasoning_steps").and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    steps
        .iter()
        .filter_map(|step| {
            let detail = step.as_str().map(str::to_string).or_else(|| {
                step.get("detail").and_then(JsonValue::as_str).map(str::to_string)
            })?;
            Some(ReasoningStep { stage: "nl2sql".to_string(), detail, duration_ms: 0 })
        })
        .collect()
}
