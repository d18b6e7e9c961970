//! Classifies a request into one of the graph's top-level branches.
//!
//! Obvious cases — no bound data source, or `analysis_mode = deep` — are
//! decided by rule. Everything else is assumed analytical and routed to
//! `nl2sql`; a short model call breaks the remaining ambiguous case (a data
//! source is bound, but the question reads like small talk rather than an
//! analytics request).

use std::sync::Arc;

use insightql_executor::request::DataSourceKind;

use crate::llm::CompletionRequest;
use crate::orchestrator::WorkflowContext;
use crate::state::{AnalysisMode, Stage, WorkflowState};

const CLASSIFY_PROMPT_PREFIX: &str = "Classify the following user message as either \
ANALYTICAL (it asks a question about data that should be turned into a query) or \
CONVERSATIONAL (greeting, thanks, small talk, or a question not about the bound \
data source). Respond with exactly one word, ANALYTICAL or CONVERSATIONAL.\n\nMessage: ";

pub async fn run(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    if state.data_source_id.is_none() {
        state.set_progress(10.0, "no data source bound, answering conversationally", Stage::SupervisorConversationalComplete);
        populate_conversational_response(&ctx, &mut state).await;
        return state;
    }

    if state.analysis_mode == AnalysisMode::Deep && is_file_data_source(&ctx, &state).await {
        state.set_progress(10.0, "routing to deep file analysis", Stage::RoutedToDeepFileAnalysis);
        return state;
    }

    if looks_conversational(&ctx, &state).await {
        state.set_progress(10.0, "classified as conversational", Stage::SupervisorConversationalComplete);
        populate_conversational_response(&ctx, &mut state).await;
        return state;
    }

    state.set_progress(10.0, "routed to SQL generation", Stage::RoutedToNl2Sql);
    state
}

/// Deep mode only bypasses `nl2sql` when the bound source is a file; for
/// database/warehouse/API sources deep mode falls through to ordinary
/// classification instead, since there's no SQL-free path to inspect them.
async fn is_file_data_source(ctx: &WorkflowContext, state: &WorkflowState) -> bool {
    let Some(data_source_id) = &state.data_source_id else {
        return false;
    };
    matches!(
        ctx.data_service.get_data_source_by_id(data_source_id).await,
        Ok(descriptor) if descriptor.kind == DataSourceKind::File
    )
}

async fn looks_conversational(ctx: &WorkflowContext, state: &WorkflowState) -> bool {
    if is_obviously_analytical(&state.query) {
        return false;
    }
    let request = CompletionRequest::new(format!("{CLASSIFY_PROMPT_PREFIX}{}", state.query)).with_temperature(0.0);
    let response = ctx.llm.generate_completion(request).await;
    response.success && response.content.to_ascii_uppercase().contains("CONVERSATIONAL")
}

/// A cheap rule-based guard so a single LLM hiccup never misroutes an
/// obviously data-shaped question ("how many", "total", "average", ...).
fn is_obviously_analytical(query: &str) -> bool {
    const ANALYTICAL_MARKERS: &[&str] =
        &["how many", "how much", "total", "average", "sum of", "count of", "trend", "compare", "top "];
    let lower = query.to_ascii_lowercase();
    ANALYTICAL_MARKERS.iter().any(|m| lower.contains(m))
}

async fn populate_conversational_response(ctx: &WorkflowContext, state: &mut WorkflowState) {
    let request = CompletionRequest::new(&state.query)
        .with_system_context("Respond briefly and conversationally; no data analysis is available for this message.")
        .with_temperature(0.6);
    let response = ctx.llm.generate_completion(request).await;
    if response.success {
        state.message = Some(response.content.clone());
        state.narration = Some(response.content.clone());
        state.analysis = Some(response.content);
    } else {
        let fallback = "I'm not able to answer that without a connected data source.".to_string();
        state.message = Some(fallback.clone());
        state.narration = Some(fallback.clone());
        state.analysis = Some(fallback);
    }
    state.workflow_complete = true;
}
