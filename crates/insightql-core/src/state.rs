//! State traits shared by every node in a compiled graph.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The bound every state record threaded through a [`crate::graph::StateGraph`]
/// must satisfy: cheap to clone between node invocations, serializable for
/// checkpointing, and safe to move across the `tokio` task boundary each node
/// suspends on.
pub trait GraphState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> GraphState for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// States that can be merged, used when parallel branches of a graph converge on
/// the same successor node and their individual updates must be combined rather
/// than one silently overwriting the other.
///
/// Implementors decide, field by field, how conflicting updates resolve. The
/// common conventions (mirrored by `#[derive(MergeableState)]` in
/// `insightql-derive`) are:
/// - strings/vectors: concatenate
/// - bools: OR
/// - numbers: max
/// - `Option<T>`: `other` wins when it is `Some`
pub trait MergeableState: GraphState {
    /// Fold `other`'s updates into `self` in place.
    fn merge(&mut self, other: &Self);
}

/// A migration-tagged version string carried on every persisted state record.
///
/// Checkpoints whose `StateVersion` does not match [`CURRENT_STATE_VERSION`] are
/// rejected at load time rather than silently accepted with stale field
/// semantics: a resumed state must either carry the current version tag or be
/// upgraded to it by a registered [`StateMigration`] before a node ever sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion(pub String);

impl StateVersion {
    /// Construct a version tag from a static string, e.g. `StateVersion::new("v1")`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the version tag as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StateVersion {
    fn default() -> Self {
        Self::new(CURRENT_STATE_VERSION)
    }
}

impl std::fmt::Display for StateVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state schema version this build of the engine understands. Bump this and
/// register a [`StateMigration`] when a breaking change to a workflow state shape
/// ships.
pub const CURRENT_STATE_VERSION: &str = "v1";

/// A single migration step from one state version to the next, applied to the
/// raw JSON representation of a checkpoint before it is deserialized into the
/// caller's concrete state type.
pub trait StateMigration: Send + Sync {
    /// The version this migration upgrades *from*.
    fn from_version(&self) -> &str;

    /// The version this migration upgrades *to*.
    fn to_version(&self) -> &str;

    /// Rewrite the raw JSON state in place.
    fn migrate(&self, value: &mut serde_json::Value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_version_matches_current() {
        assert_eq!(StateVersion::default().as_str(), CURRENT_STATE_VERSION);
    }

    #[test]
    fn version_display_matches_inner_string() {
        let v = StateVersion::new("v7");
        assert_eq!(format!("{v}"), "v7");
    }

    #[test]
    fn version_equality_is_string_equality() {
        assert_eq!(StateVersion::new("v1"), StateVersion::new("v1"));
        assert_ne!(StateVersion::new("v1"), StateVersion::new("v2"));
    }
}
