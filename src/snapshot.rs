//! In-memory snapshot of the five entity tables.
//!
//! A `Snapshot` is a complete copy of one trace graph at a point in time,
//! held as plain vectors in row order. Stores read and write whole snapshots;
//! the merge consumes two and produces a third. `SnapshotStamp` captures a
//! deterministic fingerprint of snapshot content for provenance in merge
//! reports and for determinism tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::canonical::{canonical_hash_hex, to_canonical_bytes};
use crate::types::{Edge, Finding, Flow, FlowId, Node, Session, SessionId};
use crate::TRACE_SCHEMA_VERSION;

/// A complete copy of all five entity tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// All sessions, in row order.
    pub sessions: Vec<Session>,
    /// All flows, in row order.
    pub flows: Vec<Flow>,
    /// All nodes, in row order.
    pub nodes: Vec<Node>,
    /// All edges, in row order.
    pub edges: Vec<Edge>,
    /// All findings, in row order.
    pub findings: Vec<Finding>,
}

/// Result of resolving a user-supplied session key.
///
/// Resolution is an explicit two-step: a key that parses as an integer is
/// first matched against session ids; on a miss (or a non-numeric key) it is
/// matched against session names. The discriminant records which field
/// matched, so callers never silently treat an id as a name or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLookup<'a> {
    /// The key matched a session id.
    ById(&'a Session),
    /// The key matched a session name.
    ByName(&'a Session),
    /// Neither field matched.
    NotFound,
}

impl<'a> SessionLookup<'a> {
    /// The matched session, if any.
    pub fn session(&self) -> Option<&'a Session> {
        match self {
            Self::ById(s) | Self::ByName(s) => Some(s),
            Self::NotFound => None,
        }
    }
}

/// The five entity tables, in parent-before-child order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    /// Session rows.
    Sessions,
    /// Flow rows.
    Flows,
    /// Node rows.
    Nodes,
    /// Edge rows.
    Edges,
    /// Finding rows.
    Findings,
}

impl Table {
    /// All tables, parents before children.
    pub const ALL: [Table; 5] = [
        Table::Sessions,
        Table::Flows,
        Table::Nodes,
        Table::Edges,
        Table::Findings,
    ];

    /// The table's name in schema and interchange files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Flows => "flows",
            Self::Nodes => "nodes",
            Self::Edges => "edges",
            Self::Findings => "findings",
        }
    }

    /// Parse a table name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sessions" => Some(Self::Sessions),
            "flows" => Some(Self::Flows),
            "nodes" => Some(Self::Nodes),
            "edges" => Some(Self::Edges),
            "findings" => Some(Self::Findings),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    /// Session rows.
    pub sessions: u64,
    /// Flow rows.
    pub flows: u64,
    /// Node rows.
    pub nodes: u64,
    /// Edge rows.
    pub edges: u64,
    /// Finding rows.
    pub findings: u64,
}

impl TableCounts {
    /// Total rows across all tables.
    pub fn total(&self) -> u64 {
        self.sessions + self.flows + self.nodes + self.edges + self.findings
    }
}

impl fmt::Display for TableCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sessions, {} flows, {} nodes, {} edges, {} findings",
            self.sessions, self.flows, self.nodes, self.edges, self.findings
        )
    }
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every table is empty.
    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }

    /// Row counts per table.
    pub fn counts(&self) -> TableCounts {
        TableCounts {
            sessions: self.sessions.len() as u64,
            flows: self.flows.len() as u64,
            nodes: self.nodes.len() as u64,
            edges: self.edges.len() as u64,
            findings: self.findings.len() as u64,
        }
    }

    /// Look up a session by id.
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Look up a session by its natural key.
    pub fn session_by_name(&self, name: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.name == name)
    }

    /// Resolve a user-supplied key against id first, then name.
    ///
    /// A numeric key that misses every id still falls through to the name
    /// match, so a session literally named "42" stays addressable.
    pub fn resolve_session(&self, key: &str) -> SessionLookup<'_> {
        if let Ok(id) = key.parse::<i64>() {
            if let Some(session) = self.session(SessionId::new(id)) {
                return SessionLookup::ById(session);
            }
        }
        match self.session_by_name(key) {
            Some(session) => SessionLookup::ByName(session),
            None => SessionLookup::NotFound,
        }
    }

    /// All flows owned by a session, in row order.
    pub fn flows_of(&self, session_id: SessionId) -> Vec<&Flow> {
        self.flows
            .iter()
            .filter(|f| f.session_id == session_id)
            .collect()
    }

    /// Look up a flow by name within a session.
    pub fn flow_by_name(&self, session_id: SessionId, name: &str) -> Option<&Flow> {
        self.flows
            .iter()
            .find(|f| f.session_id == session_id && f.name == name)
    }

    /// All nodes of a flow, in row order, deleted included.
    pub fn nodes_of(&self, flow_id: FlowId) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.flow_id == flow_id).collect()
    }

    /// Nodes of a flow as presented: deleted excluded, ordered by timestamp
    /// with id as the tiebreak.
    pub fn render_nodes_of(&self, flow_id: FlowId) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| n.flow_id == flow_id && !n.is_deleted())
            .collect();
        nodes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        nodes
    }

    /// Edges between presented nodes of a flow, in row order.
    pub fn render_edges_of(&self, flow_id: FlowId) -> Vec<&Edge> {
        let members: BTreeSet<_> = self
            .nodes
            .iter()
            .filter(|n| n.flow_id == flow_id && !n.is_deleted())
            .map(|n| n.id)
            .collect();
        self.edges
            .iter()
            .filter(|e| members.contains(&e.from_node) && members.contains(&e.to_node))
            .collect()
    }

    /// All edges whose endpoints both belong to a flow, in row order.
    pub fn edges_of(&self, flow_id: FlowId) -> Vec<&Edge> {
        let members: BTreeSet<_> = self
            .nodes
            .iter()
            .filter(|n| n.flow_id == flow_id)
            .map(|n| n.id)
            .collect();
        self.edges
            .iter()
            .filter(|e| members.contains(&e.from_node) && members.contains(&e.to_node))
            .collect()
    }

    /// All findings scoped to a flow, in row order.
    pub fn findings_of_flow(&self, flow_id: FlowId) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.flow_id == Some(flow_id))
            .collect()
    }

    /// All findings of a session, flow-scoped or not, in row order.
    pub fn findings_of_session(&self, session_id: SessionId) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.session_id == session_id)
            .collect()
    }

    /// Session-level findings (no flow scope), in row order.
    pub fn session_findings(&self, session_id: SessionId) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.session_id == session_id && f.flow_id.is_none())
            .collect()
    }

    /// Compute this snapshot's stamp.
    pub fn stamp(&self) -> SnapshotStamp {
        SnapshotStamp::compute(self)
    }
}

/// A deterministic fingerprint of snapshot content.
///
/// The `stamp_id` is stable across row reordering (each table is hashed in
/// canonical sort order) but changes for any content change, ids included.
/// `computed_at` is provenance only and excluded from the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStamp {
    /// Unique identifier for this content state (xxh64 of all components).
    pub stamp_id: String,
    /// Row counts per table.
    pub counts: TableCounts,
    /// Lexicographic maximum `updated_at` across sessions and findings.
    pub max_updated_at: Option<String>,
    /// Schema version the snapshot was stamped under.
    pub schema_version: String,
    /// Per-table content hashes, in table order.
    pub table_hashes: [String; 5],
    /// When this stamp was computed.
    pub computed_at: DateTime<Utc>,
}

impl SnapshotStamp {
    /// Compute a stamp for a snapshot.
    pub fn compute(snapshot: &Snapshot) -> Self {
        let counts = snapshot.counts();
        let max_updated_at = snapshot
            .sessions
            .iter()
            .map(|s| s.updated_at.as_str())
            .chain(snapshot.findings.iter().map(|f| f.updated_at.as_str()))
            .max()
            .map(str::to_string);

        let table_hashes = [
            table_hash(&snapshot.sessions),
            table_hash(&snapshot.flows),
            table_hash(&snapshot.nodes),
            table_hash(&snapshot.edges),
            table_hash(&snapshot.findings),
        ];

        let id_input = StampIdInput {
            counts,
            max_updated_at: max_updated_at.clone(),
            schema_version: TRACE_SCHEMA_VERSION.to_string(),
            table_hashes: table_hashes.clone(),
        };
        let stamp_id = canonical_hash_hex(&id_input);

        Self {
            stamp_id,
            counts,
            max_updated_at,
            schema_version: TRACE_SCHEMA_VERSION.to_string(),
            table_hashes,
            computed_at: Utc::now(),
        }
    }

    /// Verify that this stamp still matches a snapshot's content.
    pub fn verify(&self, snapshot: &Snapshot) -> bool {
        self.stamp_id == Self::compute(snapshot).stamp_id
    }
}

/// Hash one table's rows independent of row order.
fn table_hash<T: Serialize>(rows: &[T]) -> String {
    let mut canon: Vec<Vec<u8>> = rows.iter().map(to_canonical_bytes).collect();
    canon.sort();
    canonical_hash_hex(&canon)
}

/// Internal struct for computing the stamp id.
#[derive(Serialize)]
struct StampIdInput {
    counts: TableCounts,
    max_updated_at: Option<String>,
    schema_version: String,
    table_hashes: [String; 5],
}
