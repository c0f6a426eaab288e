//! Entity storage backends.
//!
//! Stores expose batch semantics only: read the whole snapshot, replace the
//! whole snapshot, check foreign keys. No partial updates, no locking, no
//! async. The merge drivers use `write_snapshot` followed by
//! `check_integrity`, and a flagged violation never rolls the write back.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::snapshot::{Snapshot, SnapshotStamp, Table};

/// One foreign-key violation with row-level detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    /// Table holding the broken row.
    pub table: Table,
    /// Id of the broken row.
    pub row_id: i64,
    /// Table the dangling reference points into.
    pub references: Table,
    /// Human-readable description of the broken reference.
    pub detail: String,
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row {} -> {}: {}",
            self.table, self.row_id, self.references, self.detail
        )
    }
}

/// Trait for entity storage backends.
///
/// Implementations must return rows in id order so repeated reads of the
/// same state produce identical snapshots.
pub trait EntityStore {
    /// Error type for store operations.
    type Error: std::error::Error;

    /// Read all five tables as one snapshot.
    fn read_snapshot(&self) -> Result<Snapshot, Self::Error>;

    /// Replace all five tables with the given snapshot.
    fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), Self::Error>;

    /// Run the foreign-key consistency check over current contents.
    fn check_integrity(&self) -> Result<Vec<IntegrityViolation>, Self::Error>;

    /// Stamp the store's current contents.
    fn stamp(&self) -> Result<SnapshotStamp, Self::Error> {
        Ok(self.read_snapshot()?.stamp())
    }
}

/// Structural foreign-key scan over an in-memory snapshot.
///
/// The same checks `PRAGMA foreign_key_check` runs against the SQLite
/// schema: flow -> session, node -> flow, edge endpoints -> nodes,
/// finding -> session and (when set) flow. Finding `node_refs` are a JSON
/// list rather than a schema-level reference and are not scanned here.
pub fn referential_violations(snapshot: &Snapshot) -> Vec<IntegrityViolation> {
    let session_ids: BTreeSet<_> = snapshot.sessions.iter().map(|s| s.id).collect();
    let flow_ids: BTreeSet<_> = snapshot.flows.iter().map(|f| f.id).collect();
    let node_ids: BTreeSet<_> = snapshot.nodes.iter().map(|n| n.id).collect();

    let mut violations = Vec::new();

    for flow in &snapshot.flows {
        if !session_ids.contains(&flow.session_id) {
            violations.push(IntegrityViolation {
                table: Table::Flows,
                row_id: flow.id.get(),
                references: Table::Sessions,
                detail: format!("session_id {} does not exist", flow.session_id),
            });
        }
    }

    for node in &snapshot.nodes {
        if !flow_ids.contains(&node.flow_id) {
            violations.push(IntegrityViolation {
                table: Table::Nodes,
                row_id: node.id.get(),
                references: Table::Flows,
                detail: format!("flow_id {} does not exist", node.flow_id),
            });
        }
    }

    for edge in &snapshot.edges {
        for (field, endpoint) in [("from_node", edge.from_node), ("to_node", edge.to_node)] {
            if !node_ids.contains(&endpoint) {
                violations.push(IntegrityViolation {
                    table: Table::Edges,
                    row_id: edge.id.get(),
                    references: Table::Nodes,
                    detail: format!("{field} {endpoint} does not exist"),
                });
            }
        }
    }

    for finding in &snapshot.findings {
        if !session_ids.contains(&finding.session_id) {
            violations.push(IntegrityViolation {
                table: Table::Findings,
                row_id: finding.id.get(),
                references: Table::Sessions,
                detail: format!("session_id {} does not exist", finding.session_id),
            });
        }
        if let Some(flow_id) = finding.flow_id {
            if !flow_ids.contains(&flow_id) {
                violations.push(IntegrityViolation {
                    table: Table::Findings,
                    row_id: finding.id.get(),
                    references: Table::Flows,
                    detail: format!("flow_id {flow_id} does not exist"),
                });
            }
        }
    }

    violations
}

pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
