//! Conversation history persistence, plus the short-window dedupe guard
//! that sits in front of it so a double-submitted request doesn't get
//! answered (and saved) twice.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use crate::state::ConversationMessage;

/// How long a `(conversation_id, query, answer_prefix)` triple is
/// remembered before a repeat of it is allowed through again.
const DEDUPE_WINDOW: Duration = Duration::from_secs(30);

/// How many recent triples the dedupe guard keeps before evicting the
/// least recently seen one.
const DEDUPE_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConversationStoreError {
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),
}

/// Loads and appends to a conversation's message history. Implemented
/// against whatever durable store a deployment uses.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load_last_n_messages(
        &self,
        conversation_id: &str,
        n: usize,
    ) -> Result<Vec<ConversationMessage>, ConversationStoreError>;

    async fn save_user_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), ConversationStoreError>;

    async fn save_ai_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), ConversationStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupeKey {
    conversation_id: String,
    query: String,
    answer_prefix: String,
}

/// An in-process guard in front of a [`ConversationStore`]: suppresses a
/// save/answer when the same `(conversation_id, query, answer_prefix)`
/// triple was seen within [`DEDUPE_WINDOW`]. This exists to absorb
/// accidental double-submits (retried requests, duplicate webhook
/// deliveries) without requiring the store itself to be idempotent.
pub struct DedupeGuard {
    window: Duration,
    seen: Mutex<LruCache<DedupeKey, Instant>>,
}

impl DedupeGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEDUPE_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self { window: DEDUPE_WINDOW, seen: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns `true` if this exact triple was already recorded within the
    /// dedupe window (the caller should skip saving/answering again), and
    /// otherwise records it and returns `false`.
    pub fn check_and_record(
        &self,
        conversation_id: &str,
        query: &str,
        answer_prefix: &str,
    ) -> bool {
        let key = DedupeKey {
            conversation_id: conversation_id.to_string(),
            query: query.to_string(),
            answer_prefix: answer_prefix.to_string(),
        };
        let now = Instant::now();
        let mut seen = self.seen.lock();
        if let Some(last_seen) = seen.get(&key) {
            if now.duration_since(*last_seen) < self.window {
                return true;
            }
        }
        seen.put(key, now);
        false
    }
}

impl Default for DedupeGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_of_a_triple_is_never_a_duplicate() {
        let guard = DedupeGuard::new();
        assert!(!guard.check_and_record("conv-1", "how many orders", "Here are"));
    }

    #[test]
    fn repeating_the_same_triple_immediately_is_flagged_as_duplicate() {
        let guard = DedupeGuard::new();
        assert!(!guard.check_and_record("conv-1", "how many orders", "Here are"));
        assert!(guard.check_and_record("conv-1", "how many orders", "Here are"));
    }

    #[test]
    fn different_conversations_never_collide() {
        let guard = DedupeGuard::new();
        assert!(!guard.check_and_record("conv-1", "q", "a"));
        assert!(!guard.check_and_record("conv-2", "q", "a"));
    }

    #[test]
    fn a_different_answer_prefix_is_not_a_duplicate() {
        let guard = DedupeGuard::new();
        assert!(!guard.check_and_record("conv-1", "q", "a"));
        assert!(!guard.check_and_record("conv-1", "q", "b"));
    }
}
