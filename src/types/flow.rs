//! Flow types for the trace graph.

use super::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a traced flow, local to one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(i64);

impl FlowId {
    /// Create a new FlowId from a raw integer.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner integer.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for FlowId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// One traced flow inside a session.
///
/// Identified across snapshots by (owning session name, flow name). The
/// optional `entry_point` is a free-text hint matched against node text when
/// picking the primary entry node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Snapshot-local identifier.
    pub id: FlowId,
    /// Owning session.
    pub session_id: SessionId,
    /// Second half of the natural key (session name, flow name).
    pub name: String,
    /// Hint text for entry-node selection.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// Free-text lifecycle status.
    pub status: String,
}

impl Flow {
    /// Create a minimal flow (for testing).
    #[cfg(test)]
    pub fn minimal(id: i64, session_id: i64, name: &str) -> Self {
        Self {
            id: FlowId::new(id),
            session_id: SessionId::new(session_id),
            name: name.to_string(),
            entry_point: None,
            description: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            status: "active".to_string(),
        }
    }
}
