//! The embedded analytic engine: an in-process DuckDB session per data
//! source, used whenever a dataset is small enough (or file-backed) to
//! materialize and query locally instead of pushing the query down to a live
//! connection.

pub mod engine;
pub mod error;
pub mod session;

pub use engine::{EmbeddedEngine, FileBytesProvider};
pub use error::{EmbeddedError, Result};
pub use session::DuckDbSession;

/// Re-exports covering the common entry points: `use insightql_embedded::prelude::*;`
pub mod prelude {
    pub use crate::engine::{EmbeddedEngine, FileBytesProvider};
    pub use crate::error::{EmbeddedError, Result};
    pub use crate::session::{DuckDbSession, CANONICAL_TABLE};
}
