//! Executor error taxonomy: every failure mode an `Engine` or the façade can
//! raise, tagged with the retry class the workflow layer needs to decide
//! whether to retry, reroute, or surface to the user untouched.

use insightql_core::retry::Retryable;
use insightql_sql::SqlError;

/// Failures raised while selecting an engine, rewriting SQL, dispatching a
/// query, or normalizing its result.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The underlying engine failed in a way that is likely to succeed on
    /// retry (connection reset, timeout, rate limit).
    #[error("transient engine failure: {0}")]
    Transient(String),

    /// The underlying engine failed in a way retrying will not fix (auth
    /// failure, missing table, engine misconfiguration).
    #[error("permanent engine failure: {0}")]
    Permanent(String),

    /// The SQL itself was rejected by validation or by the engine's parser.
    #[error("syntactic failure: {0}")]
    Syntactic(String),

    /// No engine capable of serving this request is currently reachable.
    #[error("no engine available for this request")]
    EngineUnavailable,

    /// Rejected before dispatch by the read-only/validation layer.
    #[error(transparent)]
    ReadOnlyViolation(#[from] SqlError),

    /// Anything else, wrapped without a specific retry classification.
    #[error("executor error: {0}")]
    Other(String),
}

/// Retry classification: only [`ExecutorError::Transient`] is retried by
/// default; everything else either needs a different engine/SQL or should
/// surface to the caller immediately.
impl Retryable for ExecutorError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ExecutorError::Transient("x".into()).is_retryable());
        assert!(!ExecutorError::Permanent("x".into()).is_retryable());
        assert!(!ExecutorError::Syntactic("x".into()).is_retryable());
        assert!(!ExecutorError::EngineUnavailable.is_retryable());
        assert!(!ExecutorError::Other("x".into()).is_retryable());
    }

    #[test]
    fn sql_error_converts_via_from() {
        let sql_err = SqlError::NotReadOnly { keyword: "DROP".to_string() };
        let err: ExecutorError = sql_err.into();
        assert!(matches!(err, ExecutorError::ReadOnlyViolation(_)));
        assert!(!err.is_retryable());
    }
}
