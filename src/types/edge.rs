//! Edge types for the trace graph.

use super::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an edge, local to one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(i64);

impl EdgeId {
    /// Create a new EdgeId from a raw integer.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner integer.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EdgeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Relation carried by a directed edge between two trace nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Relation {
    /// Control flow: the source step causes the target to run.
    Triggers,
    /// Data flow: the source reads what the target holds.
    Reads,
    /// Data flow: the source writes into the target.
    Writes,
    /// The source checks or verifies the target.
    Validates,
    /// The source reshapes data consumed by the target.
    Transforms,
    /// Conditional control flow; requires a `condition`.
    Branches,
    /// Control flow joins back together.
    Merges,
}

impl Relation {
    /// Parse relation from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TRIGGERS" => Some(Self::Triggers),
            "READS" => Some(Self::Reads),
            "WRITES" => Some(Self::Writes),
            "VALIDATES" => Some(Self::Validates),
            "TRANSFORMS" => Some(Self::Transforms),
            "BRANCHES" => Some(Self::Branches),
            "MERGES" => Some(Self::Merges),
            _ => None,
        }
    }
}

impl Default for Relation {
    fn default() -> Self {
        Self::Triggers
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triggers => write!(f, "TRIGGERS"),
            Self::Reads => write!(f, "READS"),
            Self::Writes => write!(f, "WRITES"),
            Self::Validates => write!(f, "VALIDATES"),
            Self::Transforms => write!(f, "TRANSFORMS"),
            Self::Branches => write!(f, "BRANCHES"),
            Self::Merges => write!(f, "MERGES"),
        }
    }
}

/// Directed edge between two nodes of the same flow.
///
/// Valid input never crosses flows; the merge enforces this by dropping
/// violators rather than raising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Snapshot-local identifier.
    pub id: EdgeId,
    /// Source node.
    pub from_node: NodeId,
    /// Target node.
    pub to_node: NodeId,
    /// Relation between the two steps.
    pub relation: Relation,
    /// Condition text for BRANCHES edges.
    #[serde(default)]
    pub condition: Option<String>,
    /// Opaque JSON properties, passed through verbatim.
    #[serde(default)]
    pub props: Option<String>,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
}

impl Edge {
    /// Create a minimal edge (for testing).
    #[cfg(test)]
    pub fn minimal(id: i64, from: i64, to: i64, relation: Relation) -> Self {
        Self {
            id: EdgeId::new(id),
            from_node: NodeId::new(from),
            to_node: NodeId::new(to),
            relation,
            condition: None,
            props: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_parsing() {
        assert_eq!(Relation::from_str("TRIGGERS"), Some(Relation::Triggers));
        assert_eq!(Relation::from_str("reads"), Some(Relation::Reads));
        assert_eq!(Relation::from_str("points-at"), None);
    }

    #[test]
    fn test_relation_display_roundtrip() {
        for rel in [
            Relation::Triggers,
            Relation::Reads,
            Relation::Writes,
            Relation::Validates,
            Relation::Transforms,
            Relation::Branches,
            Relation::Merges,
        ] {
            assert_eq!(Relation::from_str(&rel.to_string()), Some(rel));
        }
    }
}
