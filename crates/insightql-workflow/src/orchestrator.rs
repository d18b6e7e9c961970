//! The two public entry points a host (HTTP handler, SSE endpoint, batch
//! job) drives a run through: [`WorkflowRunner::execute`] (run to terminal,
//! return one [`FinalResult`]) and [`WorkflowRunner::stream`] (the same run,
//! yielding a [`ProgressEvent`] at every node boundary). Everything a node
//! needs from the outside world — the model, the data catalog, conversation
//! history, the executor — is bundled in [`WorkflowContext`], built once per
//! process and shared across runs.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use insightql_core::graph::CompiledGraph;
use insightql_core::stream::{stream_workflow, ProgressDelta};
use insightql_sql::validation::enforce_read_only;
use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationStore, DedupeGuard};
use crate::data_service::DataService;
use crate::error::WorkflowError;
use crate::graph::build_graph;
use crate::llm::LlmClient;
use crate::state::{AnalysisMode, ConversationMessage, ExecutionMetadata, Insight, Recommendation, Stage, WorkflowState};

/// How many prior turns of conversation history are loaded before a run.
const CONVERSATION_HISTORY_DEPTH: usize = 10;

/// Name reported on [`FinalResult::ai_engine`]; identifies this engine to a
/// caller juggling more than one backend.
const AI_ENGINE_NAME: &str = "insightql";

/// Everything a node, the supervisor, or the orchestrator itself needs from
/// outside this crate. Built once (typically at process startup) and shared
/// via `Arc` across every concurrent run; runs are isolated from each other
/// by `conversation_id`, never by a separate `WorkflowContext`.
pub struct WorkflowContext {
    pub llm: Arc<dyn LlmClient>,
    pub data_service: Arc<dyn DataService>,
    pub executor: Arc<insightql_executor::executor::MultiEngineExecutor>,
    pub conversation_store: Arc<dyn ConversationStore>,
    pub dedupe_guard: DedupeGuard,
}

/// The inputs to one workflow run, per §6's `execute`/`stream_workflow`
/// entry points.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub query: String,
    pub conversation_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub project_id: Option<String>,
    pub data_source_id: Option<String>,
    pub analysis_mode: AnalysisMode,
    pub model: Option<String>,
}

impl ExecuteRequest {
    #[must_use]
    pub fn new(
        query: impl Into<String>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            project_id: None,
            data_source_id: None,
            analysis_mode: AnalysisMode::Standard,
            model: None,
        }
    }

    #[must_use]
    pub fn with_data_source_id(mut self, id: impl Into<String>) -> Self {
        self.data_source_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_analysis_mode(mut self, mode: AnalysisMode) -> Self {
        self.analysis_mode = mode;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// `{percentage, message, stage}`, embedded in both [`FinalResult`] and
/// every [`ProgressEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percentage: f64,
    pub message: String,
    pub stage: String,
}

impl ProgressSnapshot {
    fn from_state(state: &WorkflowState) -> Self {
        Self {
            percentage: state.progress_percentage,
            message: state.progress_message.clone(),
            stage: state.current_stage.as_str().to_string(),
        }
    }

    fn complete(message: impl Into<String>) -> Self {
        Self { percentage: 100.0, message: message.into(), stage: "complete".to_string() }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self { percentage: 100.0, message: message.into(), stage: "rejected".to_string() }
    }
}

/// The subset of state exposed mid-run so a client can render a partial
/// view before the terminal node completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialResults {
    pub sql_query: Option<String>,
    pub query_result_row_count: u64,
    pub has_chart: bool,
    pub has_insights: bool,
}

impl PartialResults {
    fn from_state(state: &WorkflowState) -> Self {
        Self {
            sql_query: state.sql_query.clone(),
            query_result_row_count: state.query_result_row_count,
            has_chart: state.echarts_config.is_some(),
            has_insights: !state.insights.is_empty(),
        }
    }
}

/// The wire contract returned by [`WorkflowRunner::execute`], per §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    pub success: bool,
    pub query: String,
    pub message: Option<String>,
    pub narration: Option<String>,
    pub analysis: Option<String>,
    pub sql_query: Option<String>,
    pub query_result: Vec<indexmap::IndexMap<String, serde_json::Value>>,
    pub query_result_row_count: u64,
    pub query_result_columns: Vec<String>,
    pub progress: ProgressSnapshot,
    pub echarts_config: Option<serde_json::Value>,
    /// Alias of `echarts_config`, carried for callers that look for
    /// `chart_config` instead (per §6's wire contract).
    pub chart_config: Option<serde_json::Value>,
    pub chart_data: Option<serde_json::Value>,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
    pub executive_summary: Option<String>,
    pub execution_metadata: ExecutionMetadata,
    pub error: Option<String>,
    pub conversation_id: String,
    pub ai_engine: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl FinalResult {
    fn input_rejected(request: &ExecuteRequest, err: &WorkflowError, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            success: false,
            query: request.query.clone(),
            message: Some(err.user_message()),
            narration: Some(err.user_message()),
            analysis: Some(err.user_message()),
            sql_query: None,
            query_result: Vec::new(),
            query_result_row_count: 0,
            query_result_columns: Vec::new(),
            progress: ProgressSnapshot::rejected(err.to_string()),
            echarts_config: None,
            chart_config: None,
            chart_data: None,
            insights: Vec::new(),
            recommendations: Vec::new(),
            executive_summary: None,
            execution_metadata: ExecutionMetadata::default(),
            error: Some(err.to_string()),
            conversation_id: request.conversation_id.clone(),
            ai_engine: AI_ENGINE_NAME.to_string(),
            timestamp: now,
        }
    }

    fn from_state(state: WorkflowState, now: chrono::DateTime<chrono::Utc>) -> Self {
        let success = crate::extraction::has_meaningful_result(&state) && !state.critical_failure;
        Self {
            success,
            query: state.query,
            message: state.message,
            narration: state.narration,
            analysis: state.analysis,
            sql_query: state.sql_query,
            query_result: state.query_result,
            query_result_row_count: state.query_result_row_count,
            query_result_columns: state.query_result_columns,
            progress: ProgressSnapshot { percentage: 100.0, message: state.progress_message, stage: "complete".to_string() },
            echarts_config: state.echarts_config.clone(),
            chart_config: state.echarts_config,
            chart_data: state.chart_data,
            insights: state.insights,
            recommendations: state.recommendations,
            executive_summary: state.executive_summary,
            execution_metadata: state.execution_metadata,
            error: state.error,
            conversation_id: state.conversation_id,
            ai_engine: AI_ENGINE_NAME.to_string(),
            timestamp: now,
        }
    }

    /// The text saved back to the conversation store as the assistant's
    /// turn: the narration if present, else the bare message, else a
    /// generic fallback — never raw internal error detail.
    fn answer_text(&self) -> String {
        self.narration
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "No response was generated.".to_string())
    }
}

/// One increment of progress from [`WorkflowRunner::stream`]. Per §6, a
/// stream always ends with exactly one terminal delta (`Complete` or
/// `Error`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        progress: ProgressSnapshot,
        partial_results: PartialResults,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        reasoning_steps: Vec<crate::state::ReasoningStep>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Complete {
        result: Box<FinalResult>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Error {
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Validates a request before it is ever handed to the graph: an empty
/// query, an injection-shaped query (sharing the same forbidden-keyword
/// check the SQL validator itself uses), or a malformed identifier are all
/// `input_validation` failures per §7 — non-recoverable, rejected without
/// running a single node.
fn validate_input(request: &ExecuteRequest) -> Result<(), WorkflowError> {
    if request.query.trim().is_empty() {
        return Err(WorkflowError::InputValidation("query is empty".to_string()));
    }
    if enforce_read_only(&request.query).is_err() {
        return Err(WorkflowError::InputValidation(
            "query contains SQL-injection-shaped content".to_string(),
        ));
    }
    for (field, value) in [
        ("conversation_id", &request.conversation_id),
        ("user_id", &request.user_id),
        ("organization_id", &request.organization_id),
    ] {
        if value.trim().is_empty() {
            return Err(WorkflowError::InputValidation(format!("{field} is empty")));
        }
    }
    Ok(())
}

/// Builds a [`WorkflowState`] from a validated request, loading and
/// truncating prior conversation history per §3's memory group.
async fn build_initial_state(ctx: &WorkflowContext, request: &ExecuteRequest) -> WorkflowState {
    let mut state = WorkflowState::new(
        request.conversation_id.clone(),
        request.user_id.clone(),
        request.organization_id.clone(),
        request.query.clone(),
    );
    state.project_id = request.project_id.clone();
    state.data_source_id = request.data_source_id.clone();
    state.analysis_mode = request.analysis_mode;
    state.model = request.model.clone();

    match ctx.conversation_store.load_last_n_messages(&request.conversation_id, CONVERSATION_HISTORY_DEPTH).await {
        Ok(history) => state.conversation_history = history,
        Err(err) => {
            tracing::warn!(error = %err, conversation_id = %request.conversation_id, "failed to load conversation history, continuing without it");
        }
    }
    state
}

/// Saves the user's turn and (once the run completes) the assistant's turn,
/// suppressing either side of a save the dedupe guard recognizes as a
/// repeat of a recent `(conversation_id, query, answer_prefix)` triple.
async fn persist_conversation(ctx: &WorkflowContext, request: &ExecuteRequest, result: &FinalResult) {
    let answer = result.answer_text();
    let answer_prefix: String = answer.chars().take(40).collect();
    if ctx.dedupe_guard.check_and_record(&request.conversation_id, &request.query, &answer_prefix) {
        return;
    }
    if let Err(err) = ctx.conversation_store.save_user_message(&request.conversation_id, &request.query).await {
        tracing::warn!(error = %err, "failed to save user message");
    }
    if let Err(err) = ctx.conversation_store.save_ai_message(&request.conversation_id, &answer).await {
        tracing::warn!(error = %err, "failed to save assistant message");
    }
}

/// Runs the compiled workflow graph to completion or streams its progress.
/// Construct once per [`WorkflowContext`] (building the graph is cheap, but
/// there is no reason to rebuild it per call) and reuse across runs.
pub struct WorkflowRunner {
    ctx: Arc<WorkflowContext>,
}

impl WorkflowRunner {
    #[must_use]
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    fn compile(&self) -> insightql_core::Result<CompiledGraph<WorkflowState>> {
        build_graph(self.ctx.clone())
    }

    /// Run a request to its terminal node and return one [`FinalResult`].
    /// Input validation happens before any node runs; a rejected request
    /// never touches the conversation store or the graph.
    pub async fn execute(&self, request: ExecuteRequest) -> FinalResult {
        let now = chrono::Utc::now();
        if let Err(err) = validate_input(&request) {
            return FinalResult::input_rejected(&request, &err, now);
        }

        let app = match self.compile() {
            Ok(app) => app,
            Err(err) => return FinalResult::input_rejected(&request, &WorkflowError::from(err), now),
        };

        let initial_state = build_initial_state(&self.ctx, &request).await;
        let final_state = match app.invoke(initial_state).await {
            Ok(graph_result) => graph_result.final_state,
            Err(err) => return FinalResult::input_rejected(&request, &WorkflowError::from(err), chrono::Utc::now()),
        };

        let result = FinalResult::from_state(final_state, chrono::Utc::now());
        persist_conversation(&self.ctx, &request, &result).await;
        result
    }

    /// Same inputs as [`execute`](Self::execute), yielding a [`ProgressEvent`]
    /// at every node boundary instead of waiting for the terminal one. Ends
    /// with exactly one `Complete` or `Error` event.
    pub fn stream(&self, request: ExecuteRequest) -> impl Stream<Item = ProgressEvent> + '_ {
        async_stream::stream! {
            let now = chrono::Utc::now();
            if let Err(err) = validate_input(&request) {
                let result = FinalResult::input_rejected(&request, &err, now);
                yield ProgressEvent::Complete { result: Box::new(result), timestamp: now };
                return;
            }

            let app = match self.compile() {
                Ok(app) => app,
                Err(err) => {
                    yield ProgressEvent::Error { message: WorkflowError::from(err).to_string(), timestamp: chrono::Utc::now() };
                    return;
                }
            };

            let initial_state = build_initial_state(&self.ctx, &request).await;
            let mut inner = Box::pin(stream_workflow(app, initial_state));

            while let Some(delta) = inner.next().await {
                match delta {
                    ProgressDelta::Progress { state, .. } | ProgressDelta::Interrupted { state, .. } => {
                        yield ProgressEvent::Progress {
                            progress: ProgressSnapshot::from_state(&state),
                            partial_results: PartialResults::from_state(&state),
                            reasoning_steps: state.execution_metadata.reasoning_steps.clone(),
                            timestamp: chrono::Utc::now(),
                        };
                    }
                    ProgressDelta::Complete { state, .. } => {
                        let result = FinalResult::from_state(state, chrono::Utc::now());
                        persist_conversation(&self.ctx, &request, &result).await;
                        yield ProgressEvent::Complete { result: Box::new(result), timestamp: chrono::Utc::now() };
                    }
                    ProgressDelta::Error { message } => {
                        yield ProgressEvent::Error { message, timestamp: chrono::Utc::now() };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationStoreError, DedupeGuard};
    use crate::data_service::DataServiceError;
    use crate::llm::{CompletionRequest, CompletionResponse};
    use async_trait::async_trait;
    use insightql_executor::executor::MultiEngineExecutor;
    use insightql_executor::request::{DataSourceDescriptor, DataSourceKind, EngineRequest, Schema};
    use insightql_executor::result::EngineKind;
    use insightql_executor::Result as ExecutorResult;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedLlm;

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate_completion(&self, request: CompletionRequest) -> CompletionResponse {
            let prompt = request.prompt.to_ascii_lowercase();
            if prompt.contains("sql") && !prompt.contains("chart") {
                CompletionResponse::ok(json!({"sql_query": "SELECT region, total FROM sales", "confidence": 0.9}).to_string())
            } else if prompt.contains("chart") || prompt.contains("insights") {
                CompletionResponse::ok(
                    json!({
                        "chart": {"type": "bar", "title": "Sales by region"},
                        "insights": [{"type": "trend", "title": "Top region", "description": "North leads by a wide margin", "confidence": 0.8, "impact": "high"}],
                        "executive_summary": "North region drove the majority of total sales across the period under review.",
                    })
                    .to_string(),
                )
            } else {
                CompletionResponse::ok("ANALYTICAL")
            }
        }
    }

    struct FixedDataService;

    #[async_trait]
    impl DataService for FixedDataService {
        async fn get_data_source_by_id(&self, id: &str) -> Result<DataSourceDescriptor, DataServiceError> {
            Ok(DataSourceDescriptor {
                id: id.to_string(),
                kind: DataSourceKind::Database,
                sub_kind: "postgres".to_string(),
                connection_info: indexmap::IndexMap::new(),
                schema: Schema::default(),
                inline_sample: None,
            })
        }
        async fn get_source_schema(&self, _id: &str) -> Result<Schema, DataServiceError> {
            Ok(Schema::default())
        }
    }

    #[derive(Default)]
    struct RecordingConversationStore {
        saved_user: Mutex<Vec<String>>,
        saved_ai: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConversationStore for RecordingConversationStore {
        async fn load_last_n_messages(&self, _conversation_id: &str, _n: usize) -> Result<Vec<ConversationMessage>, ConversationStoreError> {
            Ok(Vec::new())
        }
        async fn save_user_message(&self, _conversation_id: &str, content: &str) -> Result<(), ConversationStoreError> {
            self.saved_user.lock().unwrap().push(content.to_string());
            Ok(())
        }
        async fn save_ai_message(&self, _conversation_id: &str, content: &str) -> Result<(), ConversationStoreError> {
            self.saved_ai.lock().unwrap().push(content.to_string());
            Ok(())
        }
    }

    struct RowsEngine;

    #[async_trait]
    impl insightql_executor::engine::Engine for RowsEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::Embedded
        }
        async fn execute(&self, _request: &EngineRequest) -> ExecutorResult<insightql_executor::result::EngineResult> {
            let mut row = indexmap::IndexMap::new();
            row.insert("region".to_string(), json!("north"));
            row.insert("total".to_string(), json!(1000));
            Ok(insightql_executor::result::EngineResult::success(vec![row], EngineKind::Embedded, 1))
        }
    }

    fn test_runner() -> (WorkflowRunner, Arc<RecordingConversationStore>) {
        let mut executor = MultiEngineExecutor::new();
        executor.register(Arc::new(RowsEngine));
        let store = Arc::new(RecordingConversationStore::default());
        let ctx = Arc::new(WorkflowContext {
            llm: Arc::new(ScriptedLlm),
            data_service: Arc::new(FixedDataService),
            executor: Arc::new(executor),
            conversation_store: store.clone(),
            dedupe_guard: DedupeGuard::new(),
        });
        (WorkflowRunner::new(ctx), store)
    }

    #[tokio::test]
    async fn execute_rejects_empty_query_without_touching_the_store() {
        let (runner, store) = test_runner();
        let request = ExecuteRequest::new("", "conv-1", "user-1", "org-1");
        let result = runner.execute(request).await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(store.saved_user.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn execute_rejects_injection_shaped_query() {
        let (runner, _store) = test_runner();
        let request = ExecuteRequest::new("please DROP TABLE users", "conv-1", "user-1", "org-1");
        let result = runner.execute(request).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn execute_happy_path_produces_full_final_result_and_persists_conversation() {
        let (runner, store) = test_runner();
        let request = ExecuteRequest::new("total sales by region", "conv-1", "user-1", "org-1").with_data_source_id("src-1");
        let result = runner.execute(request).await;
        assert!(result.success);
        assert_eq!(result.progress.percentage, 100.0);
        assert_eq!(result.progress.stage, "complete");
        assert!(result.echarts_config.is_some());
        assert_eq!(result.chart_config, result.echarts_config);
        assert!(!result.insights.is_empty());
        assert_eq!(result.conversation_id, "conv-1");
        assert_eq!(result.ai_engine, AI_ENGINE_NAME);
        assert_eq!(store.saved_user.lock().unwrap().len(), 1);
        assert_eq!(store.saved_ai.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conversational_request_without_data_source_still_produces_a_final_result() {
        let (runner, _store) = test_runner();
        let request = ExecuteRequest::new("hello there", "conv-2", "user-1", "org-1");
        let result = runner.execute(request).await;
        assert!(result.success);
        assert!(result.message.is_some());
        assert!(result.sql_query.is_none());
    }

    #[tokio::test]
    async fn stream_yields_progress_then_exactly_one_terminal_complete() {
        let (runner, _store) = test_runner();
        let request = ExecuteRequest::new("total sales by region", "conv-3", "user-1", "org-1").with_data_source_id("src-1");
        let events: Vec<ProgressEvent> = runner.stream(request).collect().await;
        assert!(events.len() > 1);
        let (last, rest) = events.split_last().unwrap();
        assert!(matches!(last, ProgressEvent::Complete { .. }));
        assert!(rest.iter().all(|e| matches!(e, ProgressEvent::Progress { .. })));
    }

    #[tokio::test]
    async fn repeated_identical_request_within_dedupe_window_saves_only_once() {
        let (runner, store) = test_runner();
        for _ in 0..2 {
            let request = ExecuteRequest::new("total sales by region", "conv-4", "user-1", "org-1").with_data_source_id("src-1");
            runner.execute(request).await;
        }
        assert_eq!(store.saved_user.lock().unwrap().len(), 1);
    }
}
