//! The single re-entry point every recoverable failure passes through.
//! Decides whether to retry SQL generation, salvage partial results into an
//! insights-only response, give up conversationally, or escalate to
//! `critical_failure` — and records that decision on `current_stage` so the
//! conditional edge in [`crate::graph`] can route on it directly, the same
//! way `route_query` does for the entry branch.

use std::sync::Arc;

use crate::llm::CompletionRequest;
use crate::orchestrator::WorkflowContext;
use crate::state::Stage;
use crate::state::WorkflowState;

/// Recovery attempts at or beyond this are treated as unrecoverable. Checked
/// ahead of the partial-results and retry branches below, so it is the hard
/// ceiling on how many times this node will ever route anywhere but
/// `critical_failure`, independent of the generation-retry budget.
const MAX_ERROR_RECOVERY_ATTEMPTS: u32 = 2;
/// SQL regeneration attempts beyond this give up rather than looping forever.
const MAX_GENERATION_RETRIES: u32 = 2;

pub async fn run(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    if state.critical_failure {
        return state;
    }

    state.error_recovery_count += 1;
    let reason = failure_reason(&state);

    if state.error_recovery_count >= MAX_ERROR_RECOVERY_ATTEMPTS {
        state.latch_critical_failure(format!("exhausted error recovery attempts: {reason}"));
        return state;
    }

    if !state.query_result.is_empty() {
        // Partial success: the SQL ran and returned something before a
        // later stage failed. Salvage it rather than throwing it away.
        state.query_execution_error = None;
        state.set_progress(70.0, format!("salvaging partial results after: {reason}"), Stage::RoutedToInsights);
        return state;
    }

    if state.data_source_id.is_some() && state.retry_count < MAX_GENERATION_RETRIES {
        state.sql_query = None;
        state.query_execution_error = None;
        // A fresh SQL attempt gets its own execute/retry budget rather than
        // inheriting whatever the previous attempt already burned through.
        state.query_execution_retry_count = 0;
        state.retry_count += 1;
        state.set_progress(35.0, format!("retrying SQL generation after: {reason}"), Stage::RoutedToNl2Sql);
        return state;
    }

    populate_apology(&ctx, &mut state, &reason).await;
    state.set_progress(90.0, format!("giving up after: {reason}"), Stage::ConversationalEnd);
    state.workflow_complete = true;
    state
}

fn failure_reason(state: &WorkflowState) -> String {
    state
        .query_execution_error
        .as_ref()
        .map(|record| record.message.clone())
        .or_else(|| state.error.clone())
        .unwrap_or_else(|| "an unspecified error occurred".to_string())
}

async fn populate_apology(ctx: &WorkflowContext, state: &mut WorkflowState, reason: &str) {
    let prompt = format!(
        "Briefly and politely tell the user their request (\"{}\") could not be answered \
         because: {reason}. Do not mention internal error codes.",
        state.query
    );
    let request = CompletionRequest::new(prompt).with_temperature(0.4);
    let response = ctx.llm.generate_completion(request).await;
    let message = if response.success && !response.content.trim().is_empty() {
        response.content
    } else {
        "I wasn't able to complete that request. Please try rephrasing it or check the data source.".to_string()
    };
    state.message = Some(message.clone());
    state.narration = Some(message.clone());
    state.analysis = Some(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::conversation::{ConversationStore, ConversationStoreError, DedupeGuard};
    use crate::data_service::{DataService, DataServiceError};
    use crate::llm::{CompletionResponse, LlmClient};
    use crate::state::{ConversationMessage, ErrorRecord};
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use insightql_executor::executor::MultiEngineExecutor;
    use insightql_executor::request::{DataSourceDescriptor, Schema};
    use serde_json::json;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn generate_completion(&self, _request: CompletionRequest) -> CompletionResponse {
            CompletionResponse::ok("sorry about that")
        }
    }

    struct NoopDataService;

    #[async_trait]
    impl DataService for NoopDataService {
        async fn get_data_source_by_id(&self, _id: &str) -> Result<DataSourceDescriptor, DataServiceError> {
            Err(DataServiceError::NotFound("unused".to_string()))
        }
        async fn get_source_schema(&self, _id: &str) -> Result<Schema, DataServiceError> {
            Ok(Schema::default())
        }
    }

    struct NoopConversationStore;

    #[async_trait]
    impl ConversationStore for NoopConversationStore {
        async fn load_last_n_messages(&self, _conversation_id: &str, _n: usize) -> Result<Vec<ConversationMessage>, ConversationStoreError> {
            Ok(Vec::new())
        }
        async fn save_user_message(&self, _conversation_id: &str, _content: &str) -> Result<(), ConversationStoreError> {
            Ok(())
        }
        async fn save_ai_message(&self, _conversation_id: &str, _content: &str) -> Result<(), ConversationStoreError> {
            Ok(())
        }
    }

    fn test_context() -> Arc<WorkflowContext> {
        Arc::new(WorkflowContext {
            llm: Arc::new(EchoLlm),
            data_service: Arc::new(NoopDataService),
            executor: Arc::new(MultiEngineExecutor::new()),
            conversation_store: Arc::new(NoopConversationStore),
            dedupe_guard: DedupeGuard::new(),
        })
    }

    #[tokio::test]
    async fn recoverable_generation_failure_retries_nl2sql() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.data_source_id = Some("src-1".to_string());
        state.query_execution_error = Some(ErrorRecord { kind: "generation_failure".to_string(), message: "bad output".to_string() });
        let state = run(test_context(), state).await;
        assert_eq!(state.current_stage, Stage::RoutedToNl2Sql);
        assert!(state.sql_query.is_none());
        assert_eq!(state.retry_count, 1);
    }

    #[tokio::test]
    async fn partial_results_are_salvaged_into_insights_path() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.data_source_id = Some("src-1".to_string());
        let mut row = IndexMap::new();
        row.insert("n".to_string(), json!(1));
        state.query_result = vec![row];
        state.query_execution_error = Some(ErrorRecord { kind: "post_processing".to_string(), message: "chart step failed".to_string() });
        let state = run(test_context(), state).await;
        assert_eq!(state.current_stage, Stage::RoutedToInsights);
        assert!(state.query_execution_error.is_none());
    }

    #[tokio::test]
    async fn exhausting_generation_retries_gives_up_conversationally() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.data_source_id = Some("src-1".to_string());
        state.retry_count = MAX_GENERATION_RETRIES;
        state.query_execution_error = Some(ErrorRecord { kind: "syntactic_sql".to_string(), message: "still invalid".to_string() });
        let state = run(test_context(), state).await;
        assert_eq!(state.current_stage, Stage::ConversationalEnd);
        assert!(state.workflow_complete);
        assert!(state.message.is_some());
    }

    #[tokio::test]
    async fn exceeding_recovery_attempt_cap_escalates_to_critical_failure() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.error_recovery_count = MAX_ERROR_RECOVERY_ATTEMPTS;
        state.query_execution_error = Some(ErrorRecord { kind: "engine_unavailable".to_string(), message: "no engine".to_string() });
        let state = run(test_context(), state).await;
        assert!(state.critical_failure);
        assert_eq!(state.current_stage, Stage::CriticalFailure);
    }

    #[tokio::test]
    async fn already_critical_is_left_untouched() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.latch_critical_failure("boom");
        let before = state.error_recovery_count;
        let state = run(test_context(), state).await;
        assert_eq!(state.error_recovery_count, before);
    }

    proptest! {
        /// Property: whenever `error_recovery_count` is already at or beyond
        /// the cap on entry, this node always escalates to `critical_failure`
        /// regardless of any other counter or the failure reason.
        #[test]
        fn prop_recovery_count_at_or_beyond_cap_always_escalates(
            starting_count in MAX_ERROR_RECOVERY_ATTEMPTS..(MAX_ERROR_RECOVERY_ATTEMPTS + 5),
            reason in ".{0,40}",
        ) {
            tokio::runtime::Runtime::new().unwrap().block_on(async {
                let mut state = WorkflowState::new("c", "u", "o", "q");
                state.error_recovery_count = starting_count;
                state.query_execution_error = Some(ErrorRecord { kind: "engine_unavailable".to_string(), message: reason });
                let state = run(test_context(), state).await;
                prop_assert!(state.critical_failure);
                prop_assert_eq!(state.current_stage, Stage::CriticalFailure);
                Ok(())
            })?;
        }
    }
}
