//! Error taxonomy for the embedded engine, and its translation into
//! [`insightql_executor::ExecutorError`].

use insightql_core::retry::Retryable;

/// Failures raised while materializing data into, or querying, the embedded
/// DuckDB session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EmbeddedError {
    /// The underlying `duckdb` call failed.
    #[error("duckdb error: {0}")]
    Duckdb(#[from] duckdb::Error),

    /// Fetching the file bytes to materialize failed.
    #[error("file fetch failed: {0}")]
    FileFetch(String),

    /// No [`crate::engine::FileBytesProvider`] was configured, but a file
    /// source with no inline sample needed one.
    #[error("data source '{0}' requires byte fetching but no file provider is configured")]
    NoFileProvider(String),

    /// The source's `sub_kind` has no known DuckDB reader function.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
}

impl Retryable for EmbeddedError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::FileFetch(_))
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, EmbeddedError>;

impl From<EmbeddedError> for insightql_executor::ExecutorError {
    fn from(err: EmbeddedError) -> Self {
        match &err {
            EmbeddedError::FileFetch(_) => Self::Transient(err.to_string()),
            EmbeddedError::Duckdb(duckdb::Error::InvalidParameterName(_) | duckdb::Error::InvalidColumnName(_)) => {
                Self::Syntactic(err.to_string())
            }
            _ => Self::Permanent(err.to_string()),
        }
    }
}
