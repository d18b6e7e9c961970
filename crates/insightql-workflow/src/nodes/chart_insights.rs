//! The unified chart+insights node and its two single-purpose fallbacks
//! (`generate_chart`, `generate_insights`), plus the terminal deep-file
//! branch that skips SQL entirely and reasons over a sample of a bound
//! file's rows.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::extraction::extract_json_object;
use crate::llm::CompletionRequest;
use crate::orchestrator::WorkflowContext;
use crate::state::{Insight, Recommendation, Stage, WorkflowState};

/// Below this length an executive summary is treated as a stub and
/// re-synthesized with a dedicated call rather than shown as-is.
const EXECUTIVE_SUMMARY_MIN_LEN: usize = 80;
/// How a raw completion may introduce a chart block when it declines to
/// return it as a JSON object's `chart` key.
const CHART_PREFIX_MARKER: &str = "ECharts Configuration:";
/// Rows beyond this are omitted from the prompt; the model only needs
/// enough of the shape to describe the result, not the whole set.
const PROMPT_SAMPLE_ROWS: usize = 20;

pub async fn run(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    let prompt = build_unified_prompt(&state);
    let request = CompletionRequest::new(prompt)
        .with_system_context(
            "Respond as a single JSON object with keys chart, insights, recommendations, \
             executive_summary. chart must be an ECharts-compatible option object.",
        )
        .with_temperature(0.4);
    let response = ctx.llm.generate_completion(request).await;

    if response.success {
        apply_unified_response(&mut state, &response.content);
    }

    if state.echarts_config.is_none() && state.insights.is_empty() {
        state.set_progress(
            80.0,
            "unified chart+insights call produced nothing usable",
            Stage::UnifiedChartInsights,
        );
        return state;
    }

    ensure_executive_summary(&ctx, &mut state).await;
    state.execution_metadata.generation_method = Some("unified".to_string());
    state.set_progress(85.0, "generated chart and insights", Stage::UnifiedChartInsights);
    state
}

pub async fn run_chart_fallback(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    let prompt = format!(
        "Produce only a chart configuration (an ECharts-compatible JSON option object) \
         visualizing the result of: {}\n\nColumns: {:?}\n\nRespond as JSON with a single key chart.",
        state.query, state.query_result_columns,
    );
    let request = CompletionRequest::new(prompt).with_temperature(0.3);
    let response = ctx.llm.generate_completion(request).await;
    if response.success {
        if let Some(chart) = extract_chart_value(&response.content) {
            apply_chart(&mut state, chart);
        }
    }
    append_generation_method(&mut state, "fallback_chart");
    state.set_progress(88.0, "generated fallback chart", Stage::GenerateChart);
    state
}

pub async fn run_insights_fallback(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    let prompt = format!(
        "Produce insights, recommendations, and an executive summary for the result of: \
         {}\n\nRespond as JSON with keys insights, recommendations, executive_summary.",
        state.query
    );
    let request = CompletionRequest::new(prompt).with_temperature(0.5);
    let response = ctx.llm.generate_completion(request).await;
    if response.success {
        if let Some(parsed) = extract_json_object(&response.content) {
            apply_insights_fields(&mut state, &parsed);
        }
    }
    ensure_executive_summary(&ctx, &mut state).await;
    append_generation_method(&mut state, "fallback_insights");
    state.set_progress(88.0, "generated fallback insights", Stage::GenerateInsights);
    state
}

/// Bypasses SQL entirely: pulls a sample of the bound file's rows straight
/// from its descriptor and asks the model to reason over them directly.
pub async fn run_deep_file_analysis(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    let Some(data_source_id) = state.data_source_id.clone() else {
        state.latch_critical_failure("deep file analysis requires a bound data source");
        return state;
    };
    let descriptor = match ctx.data_service.get_data_source_by_id(&data_source_id).await {
        Ok(descriptor) => descriptor,
        Err(err) => {
            state.latch_critical_failure(format!("data source unavailable for deep analysis: {err}"));
            return state;
        }
    };
    let sample = descriptor.inline_sample.unwrap_or_default();
    let sample_json = serde_json::to_string(&sample).unwrap_or_else(|_| "[]".to_string());

    let prompt = format!(
        "Analyze these sample rows directly, without writing SQL, to answer: {}\n\n\
         Sample rows (JSON array): {sample_json}\n\n\
         Respond as JSON with keys chart, insights, recommendations, executive_summary.",
        state.query
    );
    let request = CompletionRequest::new(prompt).with_temperature(0.4);
    let response = ctx.llm.generate_completion(request).await;
    if response.success {
        apply_unified_response(&mut state, &response.content);
    }
    ensure_executive_summary(&ctx, &mut state).await;

    if state.echarts_config.is_none() && state.insights.is_empty() && state.executive_summary.is_none() {
        state.latch_critical_failure("deep file analysis produced no usable output");
        return state;
    }

    state.execution_metadata.generation_method = Some("deep_file_analysis".to_string());
    state.workflow_complete = true;
    state.set_progress(100.0, "completed deep file analysis", Stage::DeepFileAnalysis);
    state
}

fn build_unified_prompt(state: &WorkflowState) -> String {
    let sample: Vec<_> = state.query_result.iter().take(PROMPT_SAMPLE_ROWS).collect();
    format!(
        "Query: {}\nColumns: {:?}\nSample rows (JSON): {}\n\n\
         Produce a chart configuration and narrative insights for this result.",
        state.query,
        state.query_result_columns,
        serde_json::to_string(&sample).unwrap_or_else(|_| "[]".to_string()),
    )
}

fn apply_unified_response(state: &mut WorkflowState, raw: &str) {
    if let Some(chart) = extract_chart_value(raw) {
        apply_chart(state, chart);
    }
    if let Some(parsed) = extract_json_object(raw) {
        apply_insights_fields(state, &parsed);
    }
}

fn apply_chart(state: &mut WorkflowState, chart: JsonValue) {
    state.chart_type = chart
        .get("chart_type")
        .or_else(|| chart.get("type"))
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    state.chart_title = chart.get("title").and_then(JsonValue::as_str).map(str::to_string);
    state.chart_data = Some(chart.clone());
    state.echarts_config = Some(chart);
}

fn apply_insights_fields(state: &mut WorkflowState, parsed: &JsonValue) {
    if let Some(insights) = parsed.get("insights").and_then(JsonValue::as_array) {
        let normalized = normalize_insights(insights);
        if !normalized.is_empty() {
            state.insights = normalized;
        }
    }
    if let Some(recommendations) = parsed.get("recommendations").and_then(JsonValue::as_array) {
        let normalized = normalize_recommendations(recommendations);
        if !normalized.is_empty() {
            state.recommendations = normalized;
        }
    }
    if let Some(summary) = parsed.get("executive_summary").and_then(JsonValue::as_str) {
        if !summary.trim().is_empty() {
            state.executive_summary = Some(summary.to_string());
        }
    }
}

/// A chart may come back either as `{"chart": {...}}`, as the object itself
/// (when the model skips the wrapper), or as an `ECharts Configuration:`
/// prefixed block when it ignores the JSON instruction altogether.
fn extract_chart_value(raw: &str) -> Option<JsonValue> {
    if let Some(parsed) = extract_json_object(raw) {
        if let Some(chart) = parsed.get("chart") {
            if is_populated_object(chart) {
                return Some(chart.clone());
            }
        }
        if parsed.get("insights").is_none() && is_populated_object(&parsed) {
            return Some(parsed);
        }
    }
    let after_marker = raw.find(CHART_PREFIX_MARKER).map(|idx| &raw[idx + CHART_PREFIX_MARKER.len()..]);
    after_marker
        .and_then(extract_json_object)
        .filter(is_populated_object)
}

fn is_populated_object(value: &JsonValue) -> bool {
    value.as_object().is_some_and(|map| !map.is_empty())
}

fn normalize_insights(raw: &[JsonValue]) -> Vec<Insight> {
    raw.iter()
        .enumerate()
        .filter_map(|(i, value)| match value.as_str() {
            Some(text) if !text.trim().is_empty() => Some(Insight::from_bare_string(i + 1, text)),
            Some(_) => None,
            None => serde_json::from_value::<Insight>(value.clone()).ok(),
        })
        .collect()
}

fn normalize_recommendations(raw: &[JsonValue]) -> Vec<Recommendation> {
    raw.iter().filter_map(|value| serde_json::from_value::<Recommendation>(value.clone()).ok()).collect()
}

async fn ensure_executive_summary(ctx: &WorkflowContext, state: &mut WorkflowState) {
    let needs_synthesis = state
        .executive_summary
        .as_deref()
        .map_or(true, |s| s.trim().chars().count() < EXECUTIVE_SUMMARY_MIN_LEN);
    if !needs_synthesis {
        return;
    }
    let insight_titles: Vec<&str> = state.insights.iter().map(|i| i.title.as_str()).collect();
    let prompt = format!(
        "Write a concise executive summary (at least {EXECUTIVE_SUMMARY_MIN_LEN} characters) \
         for the query \"{}\", which returned {} row(s){}.",
        state.query,
        state.query_result_row_count,
        if insight_titles.is_empty() {
            String::new()
        } else {
            format!(" and surfaced insights: {}", insight_titles.join(", "))
        },
    );
    let request = CompletionRequest::new(prompt).with_temperature(0.5);
    let response = ctx.llm.generate_completion(request).await;
    if response.success && !response.content.trim().is_empty() {
        state.executive_summary = Some(response.content);
    }
}

fn append_generation_method(state: &mut WorkflowState, suffix: &str) {
    state.execution_metadata.generation_method = Some(match state.execution_metadata.generation_method.take() {
        Some(existing) => format!("{existing}+{suffix}"),
        None => suffix.to_string(),
    });
}
