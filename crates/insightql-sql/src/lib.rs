//! SQL-layer primitives shared by validation, dialect rewriting, and the
//! multi-engine executor: a quote/comment-aware tokenizer, read-only
//! enforcement, schema grounding, dialect adapters, and placeholder/corruption
//! detection for model-generated SQL.
//!
//! This crate has no opinion about *how* a query reaches an engine (that's
//! `insightql-executor`) or how it was generated (that's `insightql-workflow`'s
//! `nl2sql` node) — it only knows how to look at SQL text and a schema and
//! answer "is this safe and grounded, and how does it need to be rewritten for
//! dialect X".

pub mod dialect;
pub mod error;
pub mod placeholder;
pub mod tokenizer;
pub mod validation;

pub use dialect::Dialect;
pub use error::{Result, SqlError};

/// Re-exports covering the common entry points: `use insightql_sql::prelude::*;`
pub mod prelude {
    pub use crate::dialect::Dialect;
    pub use crate::error::{Result, SqlError};
    pub use crate::placeholder::{clean_sql_text, looks_corrupted, looks_like_placeholder, sanitize_generated_sql};
    pub use crate::tokenizer::{extract_referenced_table_names, extract_select_column_names, tokenize_sql};
    pub use crate::validation::{
        check_syntax, enforce_read_only, inject_limit_if_absent, rewrite_table_reference, tables_are_grounded,
        DEFAULT_LIMIT,
    };
}
