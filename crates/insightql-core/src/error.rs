//! Error types for the workflow graph engine.

use thiserror::Error;

/// Errors raised by the graph engine itself (building, compiling, running).
///
/// This is distinct from [`crate::state::WorkflowError`]-style domain errors that a
/// node may choose to record on its state record; this enum covers failures of the
/// *engine*, not of the business logic a node implements.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A node name was referenced (as an edge target, entry point, …) that was never
    /// registered with `add_node_from_fn`.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// `compile()` was called before `set_entry_point()`.
    #[error("graph has no entry point")]
    NoEntryPoint,

    /// Structural validation failed: unreachable nodes, dead ends, or no path to END.
    #[error("graph validation failed: {0}")]
    InvalidGraph(String),

    /// A node exceeded its per-node timeout budget.
    #[error("node '{node}' timed out after {elapsed_ms}ms")]
    NodeTimeout {
        /// Name of the node that timed out.
        node: String,
        /// How long the node ran before being cancelled.
        elapsed_ms: u64,
    },

    /// A node returned an error and its retry budget (if any) was exhausted.
    #[error("node '{node}' failed after {attempts} attempt(s): {source}")]
    NodeFailed {
        /// Name of the failing node.
        node: String,
        /// Number of attempts made, including the first.
        attempts: u32,
        /// The underlying error from the last attempt.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// `with_interrupt_before`/`with_interrupt_after` was set but no checkpointer is
    /// attached; interrupts are meaningless without somewhere to resume from.
    #[error("interrupt configured on node '{0}' without a checkpointer")]
    InterruptWithoutCheckpointer(String),

    /// A checkpointer is attached and an interrupt is configured, but `invoke` was
    /// called without a `thread_id`, so the checkpoint could not be keyed.
    #[error("interrupt configured on node '{0}' without a thread_id")]
    InterruptWithoutThreadId(String),

    /// `resume()` was called on a graph with no checkpointer attached.
    #[error("cannot resume: no checkpointer attached")]
    ResumeWithoutCheckpointer,

    /// `resume()` was called on a graph with a checkpointer but no `thread_id`.
    #[error("cannot resume: no thread_id set")]
    ResumeWithoutThreadId,

    /// `resume()` found no checkpoint for the given thread.
    #[error("no checkpoint to resume for thread '{0}'")]
    NoCheckpointToResume(String),

    /// Checkpoint storage failed (I/O, serialization, integrity check).
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A resumed checkpoint's `state_version` does not match the graph's expected
    /// version and no migration was registered for it.
    #[error("unsupported state version: found '{found}', expected '{expected}'")]
    UnsupportedStateVersion {
        /// The version tag found in the loaded checkpoint.
        found: String,
        /// The version tag the running graph expects.
        expected: String,
    },

    /// Generic catch-all for conditions that don't warrant their own variant.
    #[error("{0}")]
    Generic(String),
}

/// Errors specific to checkpoint persistence and integrity.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CheckpointError {
    /// Underlying filesystem I/O failure.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `bincode` (de)serialization failure.
    #[error("checkpoint serialization failed: {reason}")]
    SerializationFailed {
        /// Human-readable description of the failure.
        reason: String,
    },

    /// The checkpoint file's magic bytes, version, or checksum did not validate.
    #[error("checkpoint integrity check failed: {0}")]
    Integrity(String),

    /// No checkpoint exists for the requested id or thread.
    #[error("checkpoint not found: {checkpoint_id}")]
    NotFound {
        /// The checkpoint id that was requested.
        checkpoint_id: String,
    },

    /// A checkpointer operation that the backend does not implement.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Connection to a remote checkpoint store was lost or never established.
    #[error("lost connection to {backend} checkpoint store: {reason}")]
    ConnectionLost {
        /// Name of the backend (e.g. "file", "memory").
        backend: String,
        /// Description of the failure.
        reason: String,
    },

    /// Catch-all for backend-specific failures that don't fit the above.
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
