//! Orchestration core: the stateful graph engine every InsightQL workflow node
//! runs on, plus checkpointing, retry, and progress streaming.
//!
//! This crate has no opinion about natural-language-to-SQL, chart generation,
//! or any of the domain logic that makes up the analytics pipeline — that
//! lives in `insightql-workflow`, built on top of the primitives here:
//!
//! - [`graph`] — [`graph::StateGraph`], node/edge registration, compilation,
//!   and execution, including interrupt/resume.
//! - [`checkpoint`] — the [`checkpoint::Checkpointer`] trait and its in-memory
//!   and file-backed implementations.
//! - [`retry`] — [`retry::RetryPolicy`] and the [`retry::with_retry`] driver.
//! - [`stream`] — [`stream::stream_workflow`], a progress-streaming wrapper
//!   around a compiled graph.
//! - [`state`] — the [`state::GraphState`] and [`state::MergeableState`]
//!   traits every workflow state type implements.

pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod retry;
pub mod state;
pub mod stream;

pub use error::{CheckpointError, Error, Result};

/// Re-exports covering the common entry points: `use insightql_core::prelude::*;`
pub mod prelude {
    pub use crate::checkpoint::{
        Checkpoint, CheckpointMetadata, Checkpointer, FileCheckpointer, MemoryCheckpointer,
        ThreadInfo,
    };
    pub use crate::error::{CheckpointError, Error, Result};
    pub use crate::graph::{CompiledGraph, GraphResult, GraphValidation, NodeConfig, StateGraph, END};
    pub use crate::retry::{with_retry, RetryPolicy, Retryable};
    pub use crate::state::{GraphState, MergeableState, StateMigration, StateVersion, CURRENT_STATE_VERSION};
    pub use crate::stream::{run_to_completion, stream_workflow, ProgressDelta};
}
