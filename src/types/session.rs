//! Session types for the trace graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an audit session.
///
/// Numeric and local to one snapshot: two independently-evolved snapshots
/// assign session ids independently, so cross-snapshot identity is carried by
/// the session `name` (the natural key), never by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(i64);

impl SessionId {
    /// Create a new SessionId from a raw integer.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner integer.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SessionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// One audit session: a named body of work tracing flows through a codebase.
///
/// The `name` is the natural key used for snapshot reconciliation. `status`
/// stays free text (the authoring workflow owns its vocabulary); timestamps
/// are ISO-8601 text compared lexicographically during merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Snapshot-local identifier.
    pub id: SessionId,
    /// Natural key across snapshots.
    pub name: String,
    /// What this session set out to audit.
    pub purpose: String,
    /// Longer free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Tracing granularity declared by the author.
    pub granularity: String,
    /// Commit the session was captured against, when known.
    #[serde(default)]
    pub git_commit: Option<String>,
    /// Branch the session was captured against, when known.
    #[serde(default)]
    pub git_branch: Option<String>,
    /// Whether the working tree was dirty at capture time.
    #[serde(default)]
    pub git_dirty: bool,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// ISO-8601 last-update timestamp; the merge tiebreaker.
    pub updated_at: String,
    /// Free-text lifecycle status.
    pub status: String,
}

impl Session {
    /// True when the session carries any captured git context.
    pub fn has_git_context(&self) -> bool {
        self.git_commit.is_some() || self.git_branch.is_some()
    }

    /// Create a minimal session (for testing).
    #[cfg(test)]
    pub fn minimal(id: i64, name: &str) -> Self {
        Self {
            id: SessionId::new(id),
            name: name.to_string(),
            purpose: String::new(),
            description: None,
            granularity: "flow".to_string(),
            git_commit: None,
            git_branch: None,
            git_dirty: false,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            status: "active".to_string(),
        }
    }
}
