//! The graph's node implementations. Every node is a plain async function
//! `(Arc<WorkflowContext>, WorkflowState) -> WorkflowState` — per the
//! propagation policy, a node never fails across the edge; it always
//! returns a state, encoding any failure into `error`/`query_execution_error`
//! and, when fatal, `critical_failure`. [`crate::graph`] wraps each of these
//! with the history-bookkeeping supervisor before registering it.

pub mod chart_insights;
pub mod error_recovery;
pub mod execute_query;
pub mod nl2sql;
pub mod route_query;
pub mod terminal;
pub mod validate_results;
pub mod validate_sql;
