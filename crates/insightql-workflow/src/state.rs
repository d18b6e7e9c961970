//! The single state record threaded through every node of a workflow run.

use indexmap::IndexMap;
use insightql_core::state::StateVersion;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Whether a request should go through the full SQL→results pipeline or
/// bypass straight to a deep, file-only analysis branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    #[default]
    Standard,
    Deep,
}

/// The node a state record is currently at (or the routing/terminal outcome
/// that determines which node runs next). A closed enum rather than a bare
/// string, per the data model's own requirement that `current_stage` be "an
/// enum of node names".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Initial,
    RouteQuery,
    RoutedToNl2Sql,
    RoutedToChart,
    RoutedToInsights,
    RoutedToDeepFileAnalysis,
    SupervisorConversationalComplete,
    Nl2Sql,
    ValidateSql,
    ExecuteQuery,
    ValidateResults,
    UnifiedChartInsights,
    GenerateChart,
    GenerateInsights,
    ErrorRecovery,
    CriticalFailure,
    ConversationalEnd,
    DeepFileAnalysis,
    Complete,
}

impl Stage {
    /// The stable name reported on progress events and in `FinalResult`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::RouteQuery => "route_query",
            Self::RoutedToNl2Sql => "routed_to_nl2sql",
            Self::RoutedToChart => "routed_to_chart",
            Self::RoutedToInsights => "routed_to_insights",
            Self::RoutedToDeepFileAnalysis => "routed_to_deep_file_analysis",
            Self::SupervisorConversationalComplete => "supervisor_conversational_complete",
            Self::Nl2Sql => "nl2sql",
            Self::ValidateSql => "validate_sql",
            Self::ExecuteQuery => "execute_query",
            Self::ValidateResults => "validate_results",
            Self::UnifiedChartInsights => "unified_chart_insights",
            Self::GenerateChart => "generate_chart",
            Self::GenerateInsights => "generate_insights",
            Self::ErrorRecovery => "error_recovery",
            Self::CriticalFailure => "critical_failure",
            Self::ConversationalEnd => "conversational_end",
            Self::DeepFileAnalysis => "deep_file_analysis",
            Self::Complete => "complete",
        }
    }
}

/// How a single node execution concluded, recorded on `node_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    Success,
    Failure { message: String },
    TimedOut,
    Skipped,
}

/// One entry in the append-only execution ledger. `finished_at`/`outcome`
/// are populated by the supervisor once the node returns; a `None` pair
/// means the node is (or was, at checkpoint time) still running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHistoryEntry {
    pub node: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub outcome: Option<NodeOutcome>,
}

/// `{role, content}` — one turn of prior conversation, loaded (and
/// truncated) at the start of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: ConversationRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Assistant,
}

/// How impactful an insight or recommendation is judged to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
}

/// One observation surfaced alongside a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub impact: Impact,
}

impl Insight {
    /// Build the normalized shape a bare-string insight is promoted to, per
    /// the unified chart+insights node's contract.
    #[must_use]
    pub fn from_bare_string(index: usize, text: impl Into<String>) -> Self {
        Self {
            kind: "general".to_string(),
            title: format!("Insight {index}"),
            description: text.into(),
            confidence: 0.7,
            impact: Impact::Medium,
        }
    }
}

/// One suggested follow-up action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub priority: String,
    pub effort: String,
    pub impact: Impact,
    /// In `[0, 1]`.
    pub confidence: f64,
}

/// A single structured reasoning/telemetry step recorded by a node,
/// mirroring the teacher's structured introspection records rather than a
/// free-form string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub stage: String,
    pub detail: String,
    pub duration_ms: u64,
}

/// Free-form execution metadata accumulated over a run: which model served
/// which stage, how the chart/insights were ultimately produced, and the
/// structured reasoning trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub model_used: Option<String>,
    pub timings_ms: IndexMap<String, u64>,
    pub counters: IndexMap<String, u64>,
    pub reasoning_steps: Vec<ReasoningStep>,
    /// e.g. `"unified"`, `"unified+fallback_insights"`, `"unified+fallback_chart"`.
    pub generation_method: Option<String>,
}

/// A structured record of the last execution/generation failure, carried on
/// `query_execution_error` so nodes and the extractor can inspect *why* a
/// stage failed without re-parsing a message string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
}

/// The single record threaded through every node of a workflow run. Cheap to
/// clone (nodes receive an owned copy and return an updated one); every field
/// is serializable, satisfying `insightql_core::state::GraphState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    // ---- identity ----
    pub state_version: StateVersion,
    pub conversation_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub project_id: Option<String>,

    // ---- input ----
    pub query: String,
    pub data_source_id: Option<String>,
    pub analysis_mode: AnalysisMode,
    pub model: Option<String>,

    // ---- SQL stage ----
    pub sql_query: Option<String>,
    pub query_execution_error: Option<ErrorRecord>,

    // ---- result stage ----
    pub query_result: Vec<IndexMap<String, JsonValue>>,
    pub query_result_columns: Vec<String>,
    pub query_result_row_count: u64,

    // ---- chart stage ----
    pub echarts_config: Option<JsonValue>,
    pub chart_type: Option<String>,
    pub chart_title: Option<String>,
    pub chart_data: Option<JsonValue>,

    // ---- insights stage ----
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
    pub executive_summary: Option<String>,

    // ---- conversational branch outputs ----
    pub message: Option<String>,
    pub narration: Option<String>,
    pub analysis: Option<String>,

    // ---- control ----
    pub current_stage: Stage,
    pub retry_count: u32,
    pub error_recovery_count: u32,
    pub query_execution_retry_count: u32,
    pub node_history: Vec<NodeHistoryEntry>,
    pub critical_failure: bool,
    pub workflow_complete: bool,

    // ---- progress ----
    pub progress_percentage: f64,
    pub progress_message: String,
    pub error: Option<String>,

    // ---- memory ----
    pub conversation_history: Vec<ConversationMessage>,

    // ---- metadata ----
    pub execution_metadata: ExecutionMetadata,
}

impl WorkflowState {
    /// Build the initial state a run starts from; everything downstream is
    /// populated by the nodes.
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            state_version: StateVersion::default(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            project_id: None,
            query: query.into(),
            data_source_id: None,
            analysis_mode: AnalysisMode::default(),
            model: None,
            sql_query: None,
            query_execution_error: None,
            query_result: Vec::new(),
            query_result_columns: Vec::new(),
            query_result_row_count: 0,
            echarts_config: None,
            chart_type: None,
            chart_title: None,
            chart_data: None,
            insights: Vec::new(),
            recommendations: Vec::new(),
            executive_summary: None,
            message: None,
            narration: None,
            analysis: None,
            current_stage: Stage::Initial,
            retry_count: 0,
            error_recovery_count: 0,
            query_execution_retry_count: 0,
            node_history: Vec::new(),
            critical_failure: false,
            workflow_complete: false,
            progress_percentage: 0.0,
            progress_message: "starting".to_string(),
            error: None,
            conversation_history: Vec::new(),
            execution_metadata: ExecutionMetadata::default(),
        }
    }

    /// Record that `node` is about to run.
    pub(crate) fn begin_node(&mut self, node: &str) {
        self.node_history.push(NodeHistoryEntry {
            node: node.to_string(),
            started_at: chrono::Utc::now(),
            finished_at: None,
            outcome: None,
        });
    }

    /// Close out the most recent (open) `node_history` entry with its outcome.
    pub(crate) fn finish_node(&mut self, outcome: NodeOutcome) {
        if let Some(entry) = self.node_history.iter_mut().rev().find(|e| e.finished_at.is_none()) {
            entry.finished_at = Some(chrono::Utc::now());
            entry.outcome = Some(outcome);
        }
    }

    /// Advance progress, enforcing the monotonic-except-on-recovery invariant:
    /// percentage may only move backwards when `stage` is `ErrorRecovery`.
    pub(crate) fn set_progress(&mut self, percentage: f64, message: impl Into<String>, stage: Stage) {
        if !matches!(stage, Stage::ErrorRecovery) {
            self.progress_percentage = self.progress_percentage.max(percentage);
        } else {
            self.progress_percentage = percentage;
        }
        self.progress_message = message.into();
        self.current_stage = stage;
    }

    /// Latch a fatal, non-recoverable failure. Once set, only the
    /// `critical_failure` node may run; counters are frozen by convention
    /// (nodes check this flag before incrementing anything).
    pub(crate) fn latch_critical_failure(&mut self, message: impl Into<String>) {
        self.critical_failure = true;
        self.error = Some(message.into());
        self.current_stage = Stage::CriticalFailure;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_state_starts_at_initial_stage_with_zero_progress() {
        let state = WorkflowState::new("conv-1", "user-1", "org-1", "how many orders?");
        assert_eq!(state.current_stage, Stage::Initial);
        assert_eq!(state.progress_percentage, 0.0);
        assert!(!state.critical_failure);
        assert!(state.node_history.is_empty());
    }

    #[test]
    fn begin_then_finish_node_closes_the_open_entry() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.begin_node("route_query");
        assert!(state.node_history[0].finished_at.is_none());
        state.finish_node(NodeOutcome::Success);
        assert!(state.node_history[0].finished_at.is_some());
        assert_eq!(state.node_history[0].outcome, Some(NodeOutcome::Success));
    }

    #[test]
    fn progress_does_not_decrease_outside_error_recovery() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.set_progress(50.0, "halfway", Stage::Nl2Sql);
        state.set_progress(10.0, "regressing", Stage::ValidateSql);
        assert_eq!(state.progress_percentage, 50.0);
    }

    #[test]
    fn progress_may_decrease_entering_error_recovery() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.set_progress(80.0, "almost done", Stage::ExecuteQuery);
        state.set_progress(30.0, "recovering", Stage::ErrorRecovery);
        assert_eq!(state.progress_percentage, 30.0);
    }

    #[test]
    fn latch_critical_failure_sets_stage_and_error() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.latch_critical_failure("boom");
        assert!(state.critical_failure);
        assert_eq!(state.current_stage, Stage::CriticalFailure);
        assert_eq!(state.error.as_deref(), Some("boom"));
    }

    #[test]
    fn insight_from_bare_string_uses_default_confidence_and_impact() {
        let insight = Insight::from_bare_string(1, "sales are up");
        assert_eq!(insight.kind, "general");
        assert_eq!(insight.title, "Insight 1");
        assert_eq!(insight.confidence, 0.7);
        assert_eq!(insight.impact, Impact::Medium);
    }

    proptest! {
        /// Property: `node_history` is append-only and every entry started
        /// has exactly one matching `finished_at` before the next `begin_node`
        /// call, for any sequence of node names.
        #[test]
        fn prop_node_history_entries_close_before_the_next_begins(
            nodes in prop::collection::vec("[a-z_]{1,12}", 1..10),
        ) {
            let mut state = WorkflowState::new("c", "u", "o", "q");
            for node in &nodes {
                state.begin_node(node);
                prop_assert!(state.node_history.last().unwrap().finished_at.is_none());
                state.finish_node(NodeOutcome::Success);
                prop_assert!(state.node_history.last().unwrap().finished_at.is_some());
            }
            prop_assert_eq!(state.node_history.len(), nodes.len());
            prop_assert!(state.node_history.iter().all(|e| e.finished_at.is_some()));
        }

        /// Property: outside `ErrorRecovery`, progress is monotonically
        /// non-decreasing regardless of the sequence of reported percentages.
        #[test]
        fn prop_progress_is_monotonic_outside_error_recovery(
            percentages in prop::collection::vec(0.0f64..100.0, 1..10),
        ) {
            let mut state = WorkflowState::new("c", "u", "o", "q");
            let mut max_seen = 0.0f64;
            for p in percentages {
                state.set_progress(p, "step", Stage::Nl2Sql);
                max_seen = max_seen.max(p);
                prop_assert_eq!(state.progress_percentage, max_seen);
            }
        }

        /// Property: once `critical_failure` is latched, the stage is always
        /// `CriticalFailure` and an error message is always present,
        /// regardless of the message passed in.
        #[test]
        fn prop_latch_critical_failure_always_sets_stage_and_error(
            message in ".{0,80}",
        ) {
            let mut state = WorkflowState::new("c", "u", "o", "q");
            state.latch_critical_failure(message.clone());
            prop_assert!(state.critical_failure);
            prop_assert_eq!(state.current_stage, Stage::CriticalFailure);
            prop_assert_eq!(state.error, Some(message));
        }
    }
}
