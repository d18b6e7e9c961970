//! Checkpointing: persisting and resuming workflow state by `conversation_id`.
//!
//! A checkpoint is a point-in-time snapshot of a [`GraphState`] taken by the
//! supervisor between node executions. Checkpointing enables:
//! - resuming a run that crashed or was cancelled between nodes
//! - streaming: the client reconnects and continues from the last delta
//! - audit trails of exactly what state existed before/after each node
//!
//! ```rust,no_run
//! use insightql_core::checkpoint::{Checkpointer, MemoryCheckpointer, Checkpoint};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct MyState { value: i32 }
//!
//! # async fn example() -> insightql_core::Result<()> {
//! let checkpointer = MemoryCheckpointer::<MyState>::new();
//! let checkpoint = Checkpoint::new("conversation-1", "route_query", MyState { value: 1 });
//! checkpointer.save(checkpoint).await?;
//! let latest = checkpointer.get_latest("conversation-1").await?;
//! assert!(latest.is_some());
//! # Ok(())
//! # }
//! ```

use crate::error::{CheckpointError, Error, Result};
use crate::state::GraphState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Opaque checkpoint identifier: `{conversation_id}-{monotonic counter}`.
pub type CheckpointId = String;
/// A conversation (thread) identifier; checkpoints are keyed and listed per thread.
pub type ThreadId = String;

/// A single persisted snapshot of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<S: GraphState> {
    /// Unique id of this checkpoint.
    pub id: CheckpointId,
    /// The conversation/thread this checkpoint belongs to.
    pub thread_id: ThreadId,
    /// The node that just finished (or is about to run, for `interrupt_before`).
    pub node: String,
    /// The state snapshot itself.
    pub state: S,
    /// Wall-clock time the checkpoint was taken.
    pub timestamp: SystemTime,
}

impl<S: GraphState> Checkpoint<S> {
    /// Build a new checkpoint with a fresh id derived from a process-local counter.
    pub fn new(thread_id: impl Into<String>, node: impl Into<String>, state: S) -> Self {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let thread_id = thread_id.into();
        Self {
            id: format!("{thread_id}-{seq:020}"),
            thread_id,
            node: node.into(),
            state,
            timestamp: SystemTime::now(),
        }
    }
}

/// Lightweight metadata about a checkpoint, without the (potentially large)
/// state payload — used for `list()` so callers can pick a checkpoint before
/// paying the cost of loading it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// The checkpoint's id.
    pub id: CheckpointId,
    /// The conversation/thread this checkpoint belongs to.
    pub thread_id: ThreadId,
    /// The node this checkpoint was taken at.
    pub node: String,
    /// When this checkpoint was taken.
    pub timestamp: SystemTime,
}

impl<S: GraphState> From<&Checkpoint<S>> for CheckpointMetadata {
    fn from(cp: &Checkpoint<S>) -> Self {
        Self {
            id: cp.id.clone(),
            thread_id: cp.thread_id.clone(),
            node: cp.node.clone(),
            timestamp: cp.timestamp,
        }
    }
}

/// Summary of a conversation's checkpoint history, used for session pickers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadInfo {
    /// The thread (conversation) id.
    pub thread_id: ThreadId,
    /// The most recent checkpoint for this thread.
    pub latest_checkpoint_id: CheckpointId,
    /// When the latest checkpoint was taken.
    pub updated_at: SystemTime,
    /// Total checkpoints stored for this thread, if known.
    pub checkpoint_count: Option<usize>,
}

/// Storage backend for checkpoints.
///
/// `save`/`load`/`list`/`delete` are the required primitives; `get_latest`,
/// `delete_thread`, and `list_threads` have default implementations built on
/// top of them, which backends may override for efficiency.
#[async_trait::async_trait]
pub trait Checkpointer<S: GraphState>: Send + Sync {
    /// Persist a checkpoint.
    async fn save(&self, checkpoint: Checkpoint<S>) -> Result<()>;

    /// Load a checkpoint by id, or `None` if it does not exist.
    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint<S>>>;

    /// List checkpoint metadata for a thread, newest first.
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>>;

    /// Delete a single checkpoint.
    async fn delete(&self, checkpoint_id: &str) -> Result<()>;

    /// Return the most recent checkpoint for a thread.
    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>> {
        let metadata = self.list(thread_id).await?;
        match metadata.first() {
            Some(m) => self.load(&m.id).await,
            None => Ok(None),
        }
    }

    /// Delete every checkpoint belonging to a thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        for metadata in self.list(thread_id).await? {
            self.delete(&metadata.id).await?;
        }
        Ok(())
    }

    /// List every thread with at least one checkpoint, most recently updated first.
    ///
    /// Backends that cannot efficiently enumerate threads may leave the default,
    /// which reports "not implemented" rather than silently returning nothing.
    async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
        Err(Error::Checkpoint(CheckpointError::NotImplemented(
            "list_threads".to_string(),
        )))
    }
}

/// In-memory checkpoint storage: fast, never persists across process restarts.
/// The default choice for tests and short-lived runs.
#[derive(Clone)]
pub struct MemoryCheckpointer<S: GraphState> {
    checkpoints: Arc<Mutex<HashMap<CheckpointId, Checkpoint<S>>>>,
}

impl<S: GraphState> MemoryCheckpointer<S> {
    /// Create an empty in-memory checkpointer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            checkpoints: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of checkpoints currently stored, across all threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns `true` if no checkpoints are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: GraphState> Default for MemoryCheckpointer<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<S: GraphState> Checkpointer<S> for MemoryCheckpointer<S> {
    async fn save(&self, checkpoint: Checkpoint<S>) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(checkpoint.id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint<S>>> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(checkpoint_id)
            .cloned())
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        let checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<CheckpointMetadata> = checkpoints
            .values()
            .filter(|cp| cp.thread_id == thread_id)
            .map(CheckpointMetadata::from)
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(matching)
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(checkpoint_id);
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
        let checkpoints = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        let mut by_thread: HashMap<ThreadId, (CheckpointId, SystemTime, usize)> = HashMap::new();
        for cp in checkpoints.values() {
            let entry = by_thread
                .entry(cp.thread_id.clone())
                .or_insert_with(|| (cp.id.clone(), cp.timestamp, 0));
            entry.2 += 1;
            if cp.timestamp > entry.1 || (cp.timestamp == entry.1 && cp.id > entry.0) {
                entry.0 = cp.id.clone();
                entry.1 = cp.timestamp;
            }
        }
        let mut threads: Vec<ThreadInfo> = by_thread
            .into_iter()
            .map(|(thread_id, (id, updated_at, count))| ThreadInfo {
                thread_id,
                latest_checkpoint_id: id,
                updated_at,
                checkpoint_count: Some(count),
            })
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads)
    }
}

// ---------------------------------------------------------------------------
// File-backed checkpointer with an integrity header
// ---------------------------------------------------------------------------

/// Magic bytes identifying a checkpoint file on disk: "IQCK".
const CHECKPOINT_MAGIC: &[u8; 4] = b"IQCK";
/// Checkpoint file format version; bump when the header layout changes.
const CHECKPOINT_FORMAT_VERSION: u32 = 1;
/// Header size: magic(4) + version(4) + crc32(4) + payload length(8) = 20 bytes.
const CHECKPOINT_HEADER_SIZE: usize = 20;

fn encode_checkpoint_file(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CHECKPOINT_HEADER_SIZE + payload.len());
    out.extend_from_slice(CHECKPOINT_MAGIC);
    out.extend_from_slice(&CHECKPOINT_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_checkpoint_file(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < CHECKPOINT_HEADER_SIZE {
        return Err(Error::Checkpoint(CheckpointError::Integrity(format!(
            "checkpoint file too small: {} bytes (minimum {CHECKPOINT_HEADER_SIZE})",
            bytes.len()
        ))));
    }
    let magic = &bytes[0..4];
    if magic != CHECKPOINT_MAGIC {
        return Err(Error::Checkpoint(CheckpointError::Integrity(format!(
            "invalid checkpoint magic bytes: expected {CHECKPOINT_MAGIC:?}, found {magic:?}"
        ))));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default());
    if version > CHECKPOINT_FORMAT_VERSION {
        return Err(Error::Checkpoint(CheckpointError::Integrity(format!(
            "unsupported checkpoint format version: found {version}, supported up to {CHECKPOINT_FORMAT_VERSION}"
        ))));
    }
    let expected_crc = u32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default());
    let length = u64::from_le_bytes(bytes[12..20].try_into().unwrap_or_default()) as usize;
    let payload = bytes
        .get(CHECKPOINT_HEADER_SIZE..CHECKPOINT_HEADER_SIZE + length)
        .ok_or_else(|| {
            Error::Checkpoint(CheckpointError::Integrity(
                "checkpoint payload shorter than declared length".to_string(),
            ))
        })?;
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != expected_crc {
        return Err(Error::Checkpoint(CheckpointError::Integrity(format!(
            "checksum mismatch (data corruption): expected 0x{expected_crc:08X}, computed 0x{computed_crc:08X}"
        ))));
    }
    Ok(payload.to_vec())
}

/// File-based checkpoint storage: one bincode-encoded, checksummed file per
/// checkpoint, plus an in-memory index of `thread_id -> latest checkpoint` kept
/// in sync with the directory contents. Persists across process restarts.
pub struct FileCheckpointer<S: GraphState> {
    directory: PathBuf,
    index: Arc<Mutex<HashMap<ThreadId, Vec<CheckpointMetadata>>>>,
    _phantom: PhantomData<S>,
}

impl<S: GraphState> FileCheckpointer<S> {
    /// Open (creating if needed) a directory of checkpoint files.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| Error::Checkpoint(CheckpointError::Io(e)))?;
        Ok(Self {
            directory,
            index: Arc::new(Mutex::new(HashMap::new())),
            _phantom: PhantomData,
        })
    }

    fn path_for(&self, checkpoint_id: &str) -> PathBuf {
        self.directory.join(format!("{checkpoint_id}.cpkt"))
    }
}

#[async_trait::async_trait]
impl<S: GraphState> Checkpointer<S> for FileCheckpointer<S> {
    async fn save(&self, checkpoint: Checkpoint<S>) -> Result<()> {
        let payload = bincode::serialize(&checkpoint).map_err(|e| {
            Error::Checkpoint(CheckpointError::SerializationFailed {
                reason: e.to_string(),
            })
        })?;
        let encoded = encode_checkpoint_file(&payload);
        std::fs::write(self.path_for(&checkpoint.id), encoded)
            .map_err(|e| Error::Checkpoint(CheckpointError::Io(e)))?;

        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        let entry = index.entry(checkpoint.thread_id.clone()).or_default();
        entry.push(CheckpointMetadata::from(&checkpoint));
        entry.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint<S>>> {
        let path = self.path_for(checkpoint_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|e| Error::Checkpoint(CheckpointError::Io(e)))?;
        let payload = decode_checkpoint_file(&bytes)?;
        let checkpoint: Checkpoint<S> = bincode::deserialize(&payload).map_err(|e| {
            Error::Checkpoint(CheckpointError::SerializationFailed {
                reason: e.to_string(),
            })
        })?;
        Ok(Some(checkpoint))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMetadata>> {
        Ok(self
            .index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<()> {
        let path = self.path_for(checkpoint_id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| Error::Checkpoint(CheckpointError::Io(e)))?;
        }
        let mut index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        for entries in index.values_mut() {
            entries.retain(|m| m.id != checkpoint_id);
        }
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadInfo>> {
        let index = self.index.lock().unwrap_or_else(|e| e.into_inner());
        let mut threads: Vec<ThreadInfo> = index
            .iter()
            .filter_map(|(thread_id, entries)| {
                entries.first().map(|latest| ThreadInfo {
                    thread_id: thread_id.clone(),
                    latest_checkpoint_id: latest.id.clone(),
                    updated_at: latest.timestamp,
                    checkpoint_count: Some(entries.len()),
                })
            })
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads)
    }
}
