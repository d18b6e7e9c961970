//! The seam nodes use to resolve a data source id into something an
//! executor request can target, without the workflow crate owning any
//! connection or catalog logic itself.

use async_trait::async_trait;
use insightql_executor::request::{DataSourceDescriptor, Schema};

/// Errors resolving a data source or its schema. Deliberately small: both
/// variants collapse to [`crate::error::WorkflowError::EngineUnavailable`]
/// or [`crate::error::WorkflowError::ExecutionPermanent`] at the call site.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DataServiceError {
    #[error("data source not found: {0}")]
    NotFound(String),
    #[error("data source lookup failed: {0}")]
    Other(String),
}

/// Looks up data sources and their schemas on behalf of the workflow.
/// Implemented against whatever catalog/metadata store a deployment uses;
/// the workflow crate only depends on this trait.
#[async_trait]
pub trait DataService: Send + Sync {
    async fn get_data_source_by_id(
        &self,
        data_source_id: &str,
    ) -> Result<DataSourceDescriptor, DataServiceError>;

    async fn get_source_schema(&self, data_source_id: &str) -> Result<Schema, DataServiceError>;
}
