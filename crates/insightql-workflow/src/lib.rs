//! Natural-language-to-analytics workflow orchestration: turns a user's
//! question plus a target data source into SQL, runs it through
//! `insightql-executor`, and produces a chart, insights, and an executive
//! summary — all as one [`insightql_core::graph::StateGraph`] run over
//! [`state::WorkflowState`].
//!
//! Collaborators (the model, the data catalog, conversation history) are
//! seams defined here ([`llm::LlmClient`], [`data_service::DataService`],
//! [`conversation::ConversationStore`]) rather than concrete clients, so the
//! graph itself is fully testable against in-memory doubles.

pub mod conversation;
pub mod data_service;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod llm;
pub mod nodes;
pub mod orchestrator;
pub mod state;

pub use error::{Result, WorkflowError};
pub use orchestrator::{FinalResult, WorkflowContext, WorkflowRunner};
pub use state::WorkflowState;

/// Re-exports covering the common entry points: `use insightql_workflow::prelude::*;`
pub mod prelude {
    pub use crate::conversation::{ConversationStore, ConversationStoreError, DedupeGuard};
    pub use crate::data_service::{DataService, DataServiceError};
    pub use crate::error::{Result, WorkflowError};
    pub use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};
    pub use crate::orchestrator::{FinalResult, WorkflowContext, WorkflowRunner};
    pub use crate::state::{
        AnalysisMode, ConversationMessage, ConversationRole, ErrorRecord, ExecutionMetadata,
        Impact, Insight, NodeHistoryEntry, NodeOutcome, Recommendation, ReasoningStep, Stage,
        WorkflowState,
    };
}
