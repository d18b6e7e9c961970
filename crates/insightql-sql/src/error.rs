//! Error types for SQL validation and dialect rewriting.

use thiserror::Error;

/// Why a candidate SQL statement was rejected before ever reaching an engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SqlError {
    /// The statement contains a top-level DDL/DML keyword.
    #[error("statement is not read-only: found '{keyword}'")]
    NotReadOnly {
        /// The forbidden keyword that was found.
        keyword: String,
    },

    /// Unbalanced quotes, parentheses, or a `SELECT` with no `FROM`.
    #[error("SQL syntax check failed: {0}")]
    SyntaxCheck(String),

    /// The model's output was a placeholder shape (`table_name`, `column_name`, …).
    #[error("generated SQL looks like an unfilled placeholder: {0}")]
    Placeholder(String),

    /// The model's output looks corrupted (repeated groups, unbalanced structure,
    /// instructions-in-place-of-SQL, embedded JSON).
    #[error("generated SQL appears corrupted: {0}")]
    Corrupted(String),

    /// A table referenced by the query is not present in the declared schema.
    #[error("referenced table not found in schema: {0}")]
    UnknownTable(String),
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, SqlError>;
