//! Error taxonomy for fetching and parsing remote tabular data, and its
//! translation into [`insightql_executor::ExecutorError`].

use insightql_core::retry::Retryable;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DataFrameError {
    #[error("http fetch failed: {0}")]
    Fetch(String),

    #[error("response parsing failed: {0}")]
    Parse(String),

    #[error("unsupported response format: {0}")]
    UnsupportedFormat(String),

    #[error("embedded engine error: {0}")]
    Embedded(#[from] insightql_embedded::EmbeddedError),
}

impl Retryable for DataFrameError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_))
    }
}

pub type Result<T> = std::result::Result<T, DataFrameError>;

impl From<DataFrameError> for insightql_executor::ExecutorError {
    fn from(err: DataFrameError) -> Self {
        match err {
            DataFrameError::Fetch(msg) => Self::Transient(msg),
            DataFrameError::Parse(msg) | DataFrameError::UnsupportedFormat(msg) => Self::Syntactic(msg),
            DataFrameError::Embedded(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fetch_is_retryable() {
        assert!(DataFrameError::Fetch("timeout".into()).is_retryable());
        assert!(!DataFrameError::Parse("bad json".into()).is_retryable());
    }
}
