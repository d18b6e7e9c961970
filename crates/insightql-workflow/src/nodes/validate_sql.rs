//! Static safety and schema grounding: read-only enforcement, syntax sanity,
//! table grounding with file-source canonicalization, and `LIMIT` injection.

use std::sync::Arc;

use insightql_executor::request::DataSourceKind;
use insightql_sql::validation::{check_syntax, enforce_read_only, inject_limit_if_absent, rewrite_table_reference, tables_are_grounded, DEFAULT_LIMIT};
use insightql_sql::tokenizer::extract_referenced_table_names;

use crate::orchestrator::WorkflowContext;
use crate::state::{ErrorRecord, Stage, WorkflowState};

const CANONICAL_FILE_TABLE: &str = "data";

pub async fn run(ctx: Arc<WorkflowContext>, mut state: WorkflowState) -> WorkflowState {
    let Some(sql) = state.sql_query.clone() else {
        return reject(state, "no SQL to validate");
    };

    if let Err(err) = enforce_read_only(&sql) {
        return reject(state, &err.to_string());
    }
    if let Err(err) = check_syntax(&sql) {
        return reject(state, &err.to_string());
    }

    let Some(data_source_id) = state.data_source_id.clone() else {
        return reject(state, "no data source bound for validation");
    };

    let descriptor = match ctx.data_service.get_data_source_by_id(&data_source_id).await {
        Ok(descriptor) => descriptor,
        Err(err) => {
            state.latch_critical_failure(format!("data source unavailable during validation: {err}"));
            return state;
        }
    };

    let schema = match ctx.data_service.get_source_schema(&data_source_id).await {
        Ok(schema) => schema,
        Err(err) => {
            state.latch_critical_failure(format!("schema lookup failed during validation: {err}"));
            return state;
        }
    };

    let known_tables = schema.known_table_names();
    let mut sql = sql;
    if !known_tables.is_empty() {
        if let Err(err) = tables_are_grounded(&sql, &known_tables) {
            if descriptor.kind == DataSourceKind::File {
                for referenced in extract_referenced_table_names(&sql) {
                    if !known_tables.iter().any(|k| k.eq_ignore_ascii_case(&referenced)) {
                        sql = rewrite_table_reference(&sql, &referenced, CANONICAL_FILE_TABLE, descriptor.dialect());
                    }
                }
            } else {
                return reject(state, &err.to_string());
            }
        }
    }

    let sql = inject_limit_if_absent(&sql, DEFAULT_LIMIT);
    state.sql_query = Some(sql);
    state.query_execution_error = None;
    state.set_progress(35.0, "validated SQL query", Stage::ValidateSql);
    state
}

fn reject(mut state: WorkflowState, message: &str) -> WorkflowState {
    state.query_execution_error = Some(ErrorRecord { kind: "syntactic_sql".to_string(), message: message.to_string() });
    state.set_progress(35.0, message.to_string(), Stage::ValidateSql);
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
    use indexmap::IndexMap;
    use insightql_executor::executor::MultiEngineExecutor;
    use insightql_executor::request::{ColumnSchema, DataSourceDescriptor, Schema, TableSchema};

    struct NoopLlm;

    #[async_trait]
    impl LlmClient for NoopLlm {
        async fn generate_completion(&self, _request: CompletionRequest) -> CompletionResponse {
            CompletionResponse::ok("")
        }
    }

    struct FixedDataService {
        descriptor: DataSourceDescriptor,
    }

    #[async_trait]
    impl DataService for FixedDataService {
        async fn get_data_source_by_id(&self, _id: &str) -> Result<DataSourceDescriptor, DataServiceError> {
            Ok(self.descriptor.clone())
        }
        async fn get_source_schema(&self, _id: &str) -> Result<Schema, DataServiceError> {
            Ok(self.descriptor.schema.clone())
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

    fn file_descriptor() -> DataSourceDescriptor {
        let mut tables = IndexMap::new();
        tables.insert(
            "data".to_string(),
            TableSchema {
                columns: vec![ColumnSchema { name: "Amount".to_string(), type_name: "number".to_string() }],
                row_count: Some(10),
            },
        );
        DataSourceDescriptor {
            id: "src-1".to_string(),
            kind: DataSourceKind::File,
            sub_kind: "csv".to_string(),
            connection_info: IndexMap::new(),
            schema: Schema { tables },
            inline_sample: None,
        }
    }

    fn test_context(descriptor: DataSourceDescriptor) -> Arc<WorkflowContext> {
        Arc::new(WorkflowContext {
            llm: Arc::new(NoopLlm),
            data_service: Arc::new(FixedDataService { descriptor }),
            executor: Arc::new(MultiEngineExecutor::new()),
            conversation_store: Arc::new(NoopConversationStore),
            dedupe_guard: DedupeGuard::new(),
        })
    }

    fn state_with_sql(sql: &str) -> WorkflowState {
        let mut state = WorkflowState::new("c", "u", "o", "q");
        state.data_source_id = Some("src-1".to_string());
        state.sql_query = Some(sql.to_string());
        state
    }

    #[tokio::test]
    async fn drop_statement_is_rejected_before_touching_schema() {
        let ctx = test_context(file_descriptor());
        let state = run(ctx, state_with_sql("DROP TABLE data")).await;
        assert_eq!(state.query_execution_error.as_ref().unwrap().kind, "syntactic_sql");
    }

    #[tokio::test]
    async fn unrecognized_file_table_is_rewritten_to_canonical_name() {
        let ctx = test_context(file_descriptor());
        let state = run(ctx, state_with_sql("SELECT * FROM sales_file")).await;
        let sql = state.sql_query.unwrap();
        assert!(sql.contains("\"data\""));
        assert!(state.query_execution_error.is_none());
    }

    #[tokio::test]
    async fn limit_is_injected_when_absent() {
        let ctx = test_context(file_descriptor());
        let state = run(ctx, state_with_sql("SELECT * FROM data")).await;
        assert!(state.sql_query.unwrap().contains("LIMIT 1000"));
    }

    #[tokio::test]
    async fn existing_limit_is_left_untouched() {
        let ctx = test_context(file_descriptor());
        let state = run(ctx, state_with_sql("SELECT * FROM data LIMIT 5")).await;
        assert_eq!(state.sql_query.unwrap(), "SELECT * FROM data LIMIT 5");
    }

    #[tokio::test]
    async fn unknown_table_on_a_database_source_is_rejected_not_rewritten() {
        let mut descriptor = file_descriptor();
        descriptor.kind = DataSourceKind::Database;
        let ctx = test_context(descriptor);
        let state = run(ctx, state_with_sql("SELECT * FROM made_up_table")).await;
        assert_eq!(state.query_execution_error.as_ref().unwrap().kind, "syntactic_sql");
    }
}
