//! Node types for the trace graph.

use super::flow::FlowId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a trace node, local to one snapshot.
///
/// Nodes have no natural key: a node's identity is wholly owned by its flow,
/// and the merge regenerates node ids rather than matching them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(i64);

impl NodeId {
    /// Create a new NodeId from a raw integer.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner integer.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NodeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Architectural layer a traced step belongs to.
///
/// `ALL` fixes the rendering order of layer subgraphs in diagram output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Layer {
    /// Application code.
    Code,
    /// API surface and handlers.
    Api,
    /// Authentication and authorization.
    Auth,
    /// Network boundary, transport.
    Network,
    /// Storage and data access.
    Data,
}

impl Layer {
    /// All layers in canonical rendering order.
    pub const ALL: [Layer; 5] = [
        Layer::Code,
        Layer::Api,
        Layer::Auth,
        Layer::Network,
        Layer::Data,
    ];

    /// Parse layer from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CODE" => Some(Self::Code),
            "API" => Some(Self::Api),
            "AUTH" => Some(Self::Auth),
            "NETWORK" => Some(Self::Network),
            "DATA" => Some(Self::Data),
            _ => None,
        }
    }
}

impl Default for Layer {
    fn default() -> Self {
        Self::Code
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code => write!(f, "CODE"),
            Self::Api => write!(f, "API"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Data => write!(f, "DATA"),
        }
    }
}

/// Lifecycle status of a node or finding.
///
/// Transitions (active → concern → deleted) happen in the external authoring
/// workflow; this crate only reads the current value. `Concern` drives the
/// flow/observation classification in the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Live record.
    Active,
    /// Flagged by an analyst; not part of the executed flow.
    Concern,
    /// Soft-deleted; excluded from rendering but preserved by merge.
    Deleted,
}

impl RecordStatus {
    /// Parse status from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "concern" => Some(Self::Concern),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Concern => write!(f, "concern"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// One traced step inside a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Snapshot-local identifier.
    pub id: NodeId,
    /// Owning flow.
    pub flow_id: FlowId,
    /// ISO-8601 capture timestamp; rendering order within a flow.
    pub timestamp: String,
    /// Architectural layer.
    pub layer: Layer,
    /// Short verb phrase for what the step does.
    pub action: String,
    /// What the step acts on.
    pub subject: String,
    /// Source location reference, when captured.
    #[serde(default)]
    pub file_ref: Option<String>,
    /// Opaque JSON properties, passed through verbatim.
    #[serde(default)]
    pub props: Option<String>,
    /// Analyst notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: RecordStatus,
}

impl Node {
    /// True when the node is flagged as an analyst concern.
    pub fn is_concern(&self) -> bool {
        self.status == RecordStatus::Concern
    }

    /// True when the node is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.status == RecordStatus::Deleted
    }

    /// Case-insensitive substring match of an entry-point hint against the
    /// node's action or subject text.
    pub fn matches_hint(&self, hint: &str) -> bool {
        let hint = hint.to_lowercase();
        self.action.to_lowercase().contains(&hint) || self.subject.to_lowercase().contains(&hint)
    }

    /// Create a minimal node (for testing).
    #[cfg(test)]
    pub fn minimal(id: i64, flow_id: i64, action: &str) -> Self {
        Self {
            id: NodeId::new(id),
            flow_id: FlowId::new(flow_id),
            timestamp: format!("2024-01-01T00:00:{:02}Z", id.rem_euclid(60)),
            layer: Layer::Code,
            action: action.to_string(),
            subject: String::new(),
            file_ref: None,
            props: None,
            notes: None,
            status: RecordStatus::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_parsing() {
        assert_eq!(Layer::from_str("CODE"), Some(Layer::Code));
        assert_eq!(Layer::from_str("auth"), Some(Layer::Auth));
        assert_eq!(Layer::from_str("kernel"), None);
    }

    #[test]
    fn test_layer_order() {
        assert_eq!(Layer::ALL[0], Layer::Code);
        assert_eq!(Layer::ALL[4], Layer::Data);
        assert_eq!(Layer::Network.to_string(), "NETWORK");
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(RecordStatus::from_str("active"), Some(RecordStatus::Active));
        assert_eq!(RecordStatus::from_str("CONCERN"), Some(RecordStatus::Concern));
        assert_eq!(RecordStatus::from_str("gone"), None);
        assert_eq!(RecordStatus::default(), RecordStatus::Active);
    }

    #[test]
    fn test_hint_matching() {
        let mut node = Node::minimal(1, 1, "validate token");
        node.subject = "SessionGuard".to_string();
        assert!(node.matches_hint("Token"));
        assert!(node.matches_hint("sessionguard"));
        assert!(!node.matches_hint("logout"));
    }
}
