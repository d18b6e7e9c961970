//! The data-frame engine: fetches tabular data from a remote HTTP API,
//! parses it (JSON, CSV, or Excel), and answers queries against it through
//! the same embedded DuckDB materialization the file-backed embedded engine
//! uses.

pub mod engine;
pub mod error;
pub mod fetch;
pub mod parse;

pub use engine::DataFrameEngine;
pub use error::{DataFrameError, Result};

/// Re-exports covering the common entry points: `use insightql_dataframe::prelude::*;`
pub mod prelude {
    pub use crate::engine::DataFrameEngine;
    pub use crate::error::{DataFrameError, Result};
    pub use crate::fetch::fetch_bytes;
    pub use crate::parse::parse_rows;
}
