//! Assembles the workflow's node implementations into a runnable
//! [`insightql_core::graph::CompiledGraph`]: registers each node (wrapping
//! the plain, infallible `(ctx, state) -> state` functions in
//! [`crate::nodes`] with the history bookkeeping and timeout policy a node
//! doesn't manage itself), then wires the direct and conditional edges that
//! encode the routing rules between them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use insightql_core::graph::{CompiledGraph, StateGraph, END};

use crate::nodes::{chart_insights, error_recovery, execute_query, nl2sql, route_query, terminal, validate_results, validate_sql};
use crate::orchestrator::WorkflowContext;
use crate::state::{NodeOutcome, Stage, WorkflowState};

/// Every node name in the graph, in no particular order. Used by
/// [`crate::orchestrator`] to build the interrupt-after-every-node variant
/// of the compiled graph that backs node-by-node progress streaming.
pub const ALL_NODES: &[&str] = &[
    "route_query",
    "nl2sql",
    "validate_sql",
    "execute_query",
    "validate_results",
    "unified_chart_insights",
    "generate_chart",
    "generate_insights",
    "deep_file_analysis",
    "error_recovery",
    "critical_failure",
    "conversational_end",
];

/// Build and compile the workflow graph against a shared [`WorkflowContext`].
pub fn build_graph(ctx: Arc<WorkflowContext>) -> insightql_core::Result<CompiledGraph<WorkflowState>> {
    let mut graph: StateGraph<WorkflowState> = StateGraph::new();

    register(&mut graph, &ctx, "route_query", route_query::run);
    register(&mut graph, &ctx, "nl2sql", nl2sql::run);
    register(&mut graph, &ctx, "validate_sql", validate_sql::run);
    register(&mut graph, &ctx, "execute_query", execute_query::run);
    register(&mut graph, &ctx, "validate_results", validate_results::run);
    register(&mut graph, &ctx, "unified_chart_insights", chart_insights::run);
    register(&mut graph, &ctx, "generate_chart", chart_insights::run_chart_fallback);
    register(&mut graph, &ctx, "generate_insights", chart_insights::run_insights_fallback);
    register(&mut graph, &ctx, "deep_file_analysis", chart_insights::run_deep_file_analysis);
    register(&mut graph, &ctx, "error_recovery", error_recovery::run);
    register(&mut graph, &ctx, "critical_failure", terminal::critical_failure);
    register(&mut graph, &ctx, "conversational_end", terminal::conversational_end);

    graph.set_entry_point("route_query");

    graph.add_conditional_edges(
        "route_query",
        route_after_route_query,
        routes([
            ("conversational_end", "conversational_end"),
            ("deep_file_analysis", "deep_file_analysis"),
            ("nl2sql", "nl2sql"),
            ("critical_failure", "critical_failure"),
        ]),
    );

    graph.add_conditional_edges(
        "nl2sql",
        route_after_nl2sql,
        routes([("validate_sql", "validate_sql"), ("error_recovery", "error_recovery")]),
    );

    graph.add_conditional_edges(
        "validate_sql",
        route_after_validate_sql,
        routes([
            ("execute_query", "execute_query"),
            ("error_recovery", "error_recovery"),
            ("critical_failure", "critical_failure"),
        ]),
    );

    graph.add_edge("execute_query", "validate_results");

    graph.add_conditional_edges(
        "validate_results",
        route_after_validate_results,
        routes([
            ("unified_chart_insights", "unified_chart_insights"),
            ("execute_query", "execute_query"),
            ("error_recovery", "error_recovery"),
        ]),
    );

    graph.add_conditional_edges(
        "unified_chart_insights",
        route_after_unified_chart_insights,
        routes([
            ("end", END),
            ("generate_chart", "generate_chart"),
            ("generate_insights", "generate_insights"),
            ("error_recovery", "error_recovery"),
        ]),
    );

    graph.add_edge("generate_chart", END);
    graph.add_edge("generate_insights", END);

    graph.add_conditional_edges(
        "deep_file_analysis",
        route_after_deep_file_analysis,
        routes([("end", END), ("critical_failure", "critical_failure")]),
    );

    graph.add_conditional_edges(
        "error_recovery",
        route_after_error_recovery,
        routes([
            ("nl2sql", "nl2sql"),
            ("generate_insights", "generate_insights"),
            ("conversational_end", "conversational_end"),
            ("critical_failure", "critical_failure"),
        ]),
    );

    graph.add_edge("critical_failure", END);
    graph.add_edge("conversational_end", END);

    graph.with_node_timeout("route_query", Duration::from_secs(10));
    graph.with_node_timeout("nl2sql", Duration::from_secs(20));
    graph.with_node_timeout("validate_sql", Duration::from_secs(5));
    graph.with_node_timeout("execute_query", Duration::from_secs(45));
    graph.with_node_timeout("validate_results", Duration::from_secs(5));
    graph.with_node_timeout("unified_chart_insights", Duration::from_secs(25));
    graph.with_node_timeout("generate_chart", Duration::from_secs(15));
    graph.with_node_timeout("generate_insights", Duration::from_secs(15));
    graph.with_node_timeout("deep_file_analysis", Duration::from_secs(30));
    graph.with_node_timeout("error_recovery", Duration::from_secs(10));

    graph.compile()
}

fn routes<const N: usize>(pairs: [(&str, &str); N]) -> HashMap<String, String> {
    pairs.into_iter().map(|(key, target)| (key.to_string(), target.to_string())).collect()
}

// ===== Routers =====
//
// Each router is a plain `Fn(&WorkflowState) -> String` returning a route
// key looked up in the edge's route table above; the key names deliberately
// match the route table entries rather than node names directly, so the
// table stays the single place that knows the actual wiring.

fn route_after_route_query(state: &WorkflowState) -> String {
    if state.critical_failure {
        return "critical_failure".to_string();
    }
    match state.current_stage {
        Stage::SupervisorConversationalComplete => "conversational_end".to_string(),
        Stage::RoutedToDeepFileAnalysis => "deep_file_analysis".to_string(),
        _ => "nl2sql".to_string(),
    }
}

fn route_after_nl2sql(state: &WorkflowState) -> String {
    if state.query_execution_error.is_some() {
        "error_recovery".to_string()
    } else {
        "validate_sql".to_string()
    }
}

fn route_after_validate_sql(state: &WorkflowState) -> String {
    if state.critical_failure {
        "critical_failure".to_string()
    } else if state.query_execution_error.is_some() {
        "error_recovery".to_string()
    } else {
        "execute_query".to_string()
    }
}

/// `validate_results` either clears `query_execution_error` (success), sets
/// it to `"empty_results"` while `error` stays unset (retry loop still has
/// budget), or leaves a terminal error in place (retries exhausted, or an
/// error `execute_query` itself already classified as non-retryable).
fn route_after_validate_results(state: &WorkflowState) -> String {
    match &state.query_execution_error {
        None => "unified_chart_insights".to_string(),
        Some(record) if record.kind == "empty_results" && state.error.is_none() => "execute_query".to_string(),
        _ => "error_recovery".to_string(),
    }
}

fn route_after_unified_chart_insights(state: &WorkflowState) -> String {
    let has_chart = state.echarts_config.is_some();
    let has_insights = !state.insights.is_empty();
    match (has_chart, has_insights) {
        (true, true) => "end".to_string(),
        (true, false) => "generate_insights".to_string(),
        (false, true) => "generate_chart".to_string(),
        (false, false) => "error_recovery".to_string(),
    }
}

fn route_after_deep_file_analysis(state: &WorkflowState) -> String {
    if state.critical_failure {
        "critical_failure".to_string()
    } else {
        "end".to_string()
    }
}

/// `error_recovery` records its own decision on `current_stage`, reusing the
/// same routing-hint variants `route_query` uses for its branch choice.
fn route_after_error_recovery(state: &WorkflowState) -> String {
    if state.critical_failure {
        return "critical_failure".to_string();
    }
    match state.current_stage {
        Stage::RoutedToNl2Sql => "nl2sql".to_string(),
        Stage::RoutedToInsights => "generate_insights".to_string(),
        _ => "conversational_end".to_string(),
    }
}

/// Wrap a plain `(ctx, state) -> state` node function with the
/// `node_history` bookkeeping `insightql_core`'s engine doesn't know about,
/// and adapt its infallible signature to the `Result<S>` the engine expects.
fn register<F, Fut>(graph: &mut StateGraph<WorkflowState>, ctx: &Arc<WorkflowContext>, name: &'static str, body: F)
where
    F: Fn(Arc<WorkflowContext>, WorkflowState) -> Fut + Send + Sync + Copy + 'static,
    Fut: Future<Output = WorkflowState> + Send + 'static,
{
    let ctx = ctx.clone();
    graph.add_node_from_fn(name, move |mut state: WorkflowState| {
        let ctx = ctx.clone();
        async move {
            state.begin_node(name);
            let had_error_before = state.query_execution_error.is_some();
            let was_critical_before = state.critical_failure;
            let mut state = body(ctx, state).await;
            let outcome = node_outcome(&state, had_error_before, was_critical_before);
            state.finish_node(outcome);
            Ok(state)
        }
    });
}

fn node_outcome(state: &WorkflowState, had_error_before: bool, was_critical_before: bool) -> NodeOutcome {
    if state.critical_failure && !was_critical_before {
        return NodeOutcome::Failure {
            message: state.error.clone().unwrap_or_else(|| "critical failure".to_string()),
        };
    }
    match &state.query_execution_error {
        Some(record) if !had_error_before => NodeOutcome::Failure { message: record.message.clone() },
        _ => NodeOutcome::Success,
    }
}
