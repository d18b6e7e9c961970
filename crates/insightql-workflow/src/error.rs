//! The workflow's own error taxonomy and the substring rules that turn a
//! raw collaborator error into one of its variants.

use insightql_executor::ExecutorError;
use insightql_sql::SqlError;
use thiserror::Error;

/// The eight kinds of failure a workflow run can end in. Each carries enough
/// detail for `error_recovery` to decide whether to retry, and for the
/// terminal nodes to produce a user-facing message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkflowError {
    #[error("input validation failed: {0}")]
    InputValidation(String),

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("generated SQL rejected: {0}")]
    SyntacticSql(String),

    #[error("no engine available to run this query")]
    EngineUnavailable,

    #[error("query execution failed transiently: {0}")]
    ExecutionTransient(String),

    #[error("query execution failed: {0}")]
    ExecutionPermanent(String),

    #[error("query returned no usable results")]
    EmptyResults,

    #[error("post-processing failed: {0}")]
    PostProcessing(String),
}

impl WorkflowError {
    /// The taxonomy tag this error is recorded under on `ErrorRecord::kind`,
    /// matching the eight kinds used throughout node and recovery logic.
    #[must_use]
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::InputValidation(_) => "input_validation",
            Self::GenerationFailure(_) => "generation_failure",
            Self::SyntacticSql(_) => "syntactic_sql",
            Self::EngineUnavailable => "engine_unavailable",
            Self::ExecutionTransient(_) => "execution_transient",
            Self::ExecutionPermanent(_) => "execution_permanent",
            Self::EmptyResults => "empty_results",
            Self::PostProcessing(_) => "post_processing",
        }
    }

    /// Whether `error_recovery` should attempt another pass for this kind,
    /// distinct from whether the *graph* retries a node automatically.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailure(_)
                | Self::SyntacticSql(_)
                | Self::ExecutionTransient(_)
                | Self::EmptyResults
        )
    }

    /// The message shown to the end user, independent of the internal
    /// `Display` wording used in logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InputValidation(_) => {
                "We couldn't understand that request. Try rephrasing it.".to_string()
            }
            Self::GenerationFailure(_) | Self::SyntacticSql(_) => {
                "We couldn't turn that into a valid query. Try rephrasing it.".to_string()
            }
            Self::EngineUnavailable => {
                "The data engine needed for this request is unavailable right now.".to_string()
            }
            Self::ExecutionTransient(_) => {
                "The query failed due to a temporary issue. Please try again.".to_string()
            }
            Self::ExecutionPermanent(_) => {
                "The query could not be run against this data source.".to_string()
            }
            Self::EmptyResults => "That query didn't return any data to analyze.".to_string(),
            Self::PostProcessing(_) => {
                "We ran the query but couldn't finish analyzing the results.".to_string()
            }
        }
    }
}

impl From<SqlError> for WorkflowError {
    fn from(err: SqlError) -> Self {
        match err {
            SqlError::NotReadOnly { .. }
            | SqlError::UnknownTable(_)
            | SqlError::SyntaxCheck(_)
            | SqlError::Placeholder(_)
            | SqlError::Corrupted(_) => Self::SyntacticSql(err.to_string()),
            _ => Self::SyntacticSql(err.to_string()),
        }
    }
}

impl From<ExecutorError> for WorkflowError {
    fn from(err: ExecutorError) -> Self {
        let fallback = err.to_string();
        match err {
            ExecutorError::Transient(msg) => Self::ExecutionTransient(msg),
            ExecutorError::Syntactic(msg) => Self::SyntacticSql(msg),
            ExecutorError::Permanent(msg) => Self::ExecutionPermanent(msg),
            ExecutorError::EngineUnavailable => Self::EngineUnavailable,
            ExecutorError::ReadOnlyViolation(sql_err) => Self::from(sql_err),
            ExecutorError::Other(msg) => Self::ExecutionPermanent(msg),
            _ => Self::ExecutionPermanent(fallback),
        }
    }
}

impl From<insightql_core::error::Error> for WorkflowError {
    fn from(err: insightql_core::error::Error) -> Self {
        Self::PostProcessing(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
