//! The two terminal finalizer nodes. Both are idempotent: run again on an
//! already-finalized state, they leave it unchanged rather than overwriting
//! a message a previous pass already populated.

use std::sync::Arc;

use crate::orchestrator::WorkflowContext;
use crate::state::{Stage, WorkflowState};

pub async fn critical_failure(_ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    state.critical_failure = true;
    state.workflow_complete = true;
    state.current_stage = Stage::CriticalFailure;

    let fallback = state
        .error
        .clone()
        .unwrap_or_else(|| "The request could not be completed due to an internal error.".to_string());
    if state.message.is_none() {
        state.message = Some(fallback.clone());
    }
    if state.narration.is_none() {
        state.narration = Some(fallback.clone());
    }
    if state.analysis.is_none() {
        state.analysis = Some(fallback);
    }
    state.progress_percentage = 100.0;
    state.progress_message = "critical failure".to_string();
    state
}

pub async fn conversational_end(_ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    state.workflow_complete = true;
    state.current_stage = Stage::ConversationalEnd;

    if state.message.is_none() {
        let fallback = "Here's what I found.".to_string();
        state.message = Some(fallback.clone());
        if state.narration.is_none() {
            state.narration = Some(fallback.clone());
        }
        if state.analysis.is_none() {
            state.analysis = Some(fallback);
        }
    }
    state.progress_percentage = 100.0;
    state.progress_message = "done".to_string();
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationStore, ConversationStoreError, DedupeGuard};
    use crate::data_service::{DataService, DataServiceError};
    use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};
    use crate::state::ConversationMessage;
    use async_trait::async_trait;
    use insightql_executor::executor::MultiEngineExecutor;
    use insightql_executor::request::{DataSourceDescriptor, Schema};

    struct NoopLlm;

    #[async_trait]
    impl LlmClient for NoopLlm {
        async fn generate_completion(&self, _request: CompletionRequest) -> CompletionResponse {
            CompletionResponse::ok("")
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
            llm: Arc::new(NoopLlm),
            data_service: Arc::new(NoopDataService),
            executor: Arc::new(MultiEngineExecutor::new()),
            conversation_store: Arc::new(NoopConversationStore),
            dedupe_guard: DedupeGuard::new(),
        })
    }

    #[tokio::test]
    async fn critical_failure_fills_message_from_error_when_absent() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.error = Some("engine offline".to_string());
        let state = critical_failure(test_context(), state).await;
        assert_eq!(state.message.as_deref(), Some("engine offline"));
        assert!(state.critical_failure);
        assert!(state.workflow_complete);
    }

    #[tokio::test]
    async fn critical_failure_does_not_overwrite_an_existing_message() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.message = Some("already set".to_string());
        let state = critical_failure(test_context(), state).await;
        assert_eq!(state.message.as_deref(), Some("already set"));
    }

    #[tokio::test]
    async fn conversational_end_marks_workflow_complete() {
        let state = conversational_end(test_context(), WorkflowState::new("c", "u", "o", "q")).await;
        assert!(state.workflow_complete);
        assert_eq!(state.current_stage, Stage::ConversationalEnd);
        assert!(state.message.is_some());
    }

    #[tokio::test]
    async fn conversational_end_preserves_message_set_upstream() {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.message = Some("thanks for asking".to_string());
        let state = conversational_end(test_context(), state).await;
        assert_eq!(state.message.as_deref(), Some("thanks for asking"));
    }
}
