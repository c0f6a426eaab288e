//! Finding types for the trace graph.

use super::flow::FlowId;
use super::node::{NodeId, RecordStatus};
use super::session::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a finding, local to one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FindingId(i64);

impl FindingId {
    /// Create a new FindingId from a raw integer.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner integer.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for FindingId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Severity of a finding.
///
/// Declaration order is the report order: sorting by `Severity` puts the most
/// severe findings first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Exploitable now.
    Critical,
    /// Serious weakness.
    High,
    /// Worth fixing.
    Medium,
    /// Minor issue.
    Low,
    /// Informational note.
    Info,
}

impl Severity {
    /// All severities in report order, most severe first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Parse severity from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Info
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// One analyst finding against a session, optionally scoped to a flow.
///
/// Identified across snapshots by (session name, category, description).
/// `node_refs` points at supporting trace nodes; after a merge any reference
/// that no longer resolves is pruned, and a flow reference that no longer
/// resolves is cleared, demoting the finding to session level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Snapshot-local identifier.
    pub id: FindingId,
    /// Owning session.
    pub session_id: SessionId,
    /// Flow scope, if any.
    #[serde(default)]
    pub flow_id: Option<FlowId>,
    /// Severity.
    pub severity: Severity,
    /// Natural-key component: finding category.
    pub category: String,
    /// Natural-key component: finding description.
    pub description: String,
    /// Supporting node references, in citation order.
    #[serde(default)]
    pub node_refs: Vec<NodeId>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: RecordStatus,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// ISO-8601 last-update timestamp.
    pub updated_at: String,
}

impl Finding {
    /// `node_refs` as the JSON array text stored in interchange and store rows.
    pub fn node_refs_json(&self) -> String {
        serde_json::to_string(&self.node_refs).unwrap_or_else(|_| "[]".to_string())
    }

    /// Parse the JSON array text form of `node_refs`.
    pub fn parse_node_refs(text: &str) -> Result<Vec<NodeId>, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(text)
    }

    /// Create a minimal finding (for testing).
    #[cfg(test)]
    pub fn minimal(id: i64, session_id: i64, category: &str, description: &str) -> Self {
        Self {
            id: FindingId::new(id),
            session_id: SessionId::new(session_id),
            flow_id: None,
            severity: Severity::Medium,
            category: category.to_string(),
            description: description.to_string(),
            node_refs: Vec::new(),
            status: RecordStatus::Active,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }
}
