//! SQLite entity store.
//!
//! On-disk layout is five tables mirroring the snapshot model, with
//! `id INTEGER PRIMARY KEY` on each so the SQLite rowid is the entity id.
//! Foreign keys are declared but left unenforced at write time: merge
//! results are written wholesale and then audited with
//! `PRAGMA foreign_key_check`. A flagged row is reported, never rolled back.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{EntityStore, IntegrityViolation};
use crate::merge::{merge_snapshots, MergeReport};
use crate::snapshot::{Snapshot, Table};
use crate::types::{
    Edge, EdgeId, Finding, FindingId, Flow, FlowId, Layer, Node, NodeId, RecordStatus, Relation,
    Session, SessionId, Severity,
};

/// Table definitions, applied idempotently on every open.
///
/// Column order matches interchange header order for each table.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    purpose TEXT NOT NULL DEFAULT '',
    description TEXT,
    granularity TEXT NOT NULL DEFAULT 'flow',
    git_commit TEXT,
    git_branch TEXT,
    git_dirty INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS flows (
    id INTEGER PRIMARY KEY,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    name TEXT NOT NULL,
    entry_point TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY,
    flow_id INTEGER NOT NULL REFERENCES flows(id),
    timestamp TEXT NOT NULL,
    layer TEXT NOT NULL,
    action TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    file_ref TEXT,
    props TEXT,
    notes TEXT,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY,
    from_node INTEGER NOT NULL REFERENCES nodes(id),
    to_node INTEGER NOT NULL REFERENCES nodes(id),
    relation TEXT NOT NULL,
    condition TEXT,
    props TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS findings (
    id INTEGER PRIMARY KEY,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    flow_id INTEGER REFERENCES flows(id),
    severity TEXT NOT NULL DEFAULT 'info',
    category TEXT NOT NULL,
    description TEXT NOT NULL,
    node_refs TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_flows_session ON flows(session_id);
CREATE INDEX IF NOT EXISTS idx_nodes_flow ON nodes(flow_id);
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_node);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_node);
CREATE INDEX IF NOT EXISTS idx_findings_session ON findings(session_id);
";

/// Error type for SQLite store operations.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// Database file is missing.
    #[error("Database not found: {0}")]
    NotFound(PathBuf),

    /// Database file already exists and `force` was not set.
    #[error("Database already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Underlying SQLite error, including malformed stored values.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// SQLite-backed entity store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open an existing database file.
    ///
    /// The schema is applied idempotently, so a present-but-empty file
    /// reads back as an empty snapshot.
    pub fn open(path: &Path) -> Result<Self, SqliteError> {
        if !path.exists() {
            return Err(SqliteError::NotFound(path.to_path_buf()));
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "entity store opened");
        Ok(Self { conn })
    }

    /// Create a fresh database file, with parent directories as needed.
    pub fn create(path: &Path, force: bool) -> Result<Self, SqliteError> {
        if path.exists() {
            if !force {
                return Err(SqliteError::AlreadyExists(path.to_path_buf()));
            }
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "entity store created");
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, SqliteError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Direct access to the underlying connection.
    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl EntityStore for SqliteStore {
    type Error = SqliteError;

    fn read_snapshot(&self) -> Result<Snapshot, Self::Error> {
        Ok(Snapshot {
            sessions: read_sessions(&self.conn)?,
            flows: read_flows(&self.conn)?,
            nodes: read_nodes(&self.conn)?,
            edges: read_edges(&self.conn)?,
            findings: read_findings(&self.conn)?,
        })
    }

    fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), Self::Error> {
        let tx = self.conn.transaction()?;

        // Children first on delete, parents first on insert.
        tx.execute_batch(
            "DELETE FROM findings;
             DELETE FROM edges;
             DELETE FROM nodes;
             DELETE FROM flows;
             DELETE FROM sessions;",
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO sessions (id, name, purpose, description, granularity, git_commit,
                                       git_branch, git_dirty, created_at, updated_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for session in &snapshot.sessions {
                stmt.execute(params![
                    session.id.get(),
                    session.name,
                    session.purpose,
                    session.description,
                    session.granularity,
                    session.git_commit,
                    session.git_branch,
                    session.git_dirty as i64,
                    session.created_at,
                    session.updated_at,
                    session.status,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO flows (id, session_id, name, entry_point, description, created_at,
                                    status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for flow in &snapshot.flows {
                stmt.execute(params![
                    flow.id.get(),
                    flow.session_id.get(),
                    flow.name,
                    flow.entry_point,
                    flow.description,
                    flow.created_at,
                    flow.status,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO nodes (id, flow_id, timestamp, layer, action, subject, file_ref,
                                    props, notes, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for node in &snapshot.nodes {
                stmt.execute(params![
                    node.id.get(),
                    node.flow_id.get(),
                    node.timestamp,
                    node.layer.to_string(),
                    node.action,
                    node.subject,
                    node.file_ref,
                    node.props,
                    node.notes,
                    node.status.to_string(),
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO edges (id, from_node, to_node, relation, condition, props,
                                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for edge in &snapshot.edges {
                stmt.execute(params![
                    edge.id.get(),
                    edge.from_node.get(),
                    edge.to_node.get(),
                    edge.relation.to_string(),
                    edge.condition,
                    edge.props,
                    edge.created_at,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO findings (id, session_id, flow_id, severity, category, description,
                                       node_refs, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for finding in &snapshot.findings {
                stmt.execute(params![
                    finding.id.get(),
                    finding.session_id.get(),
                    finding.flow_id.map(|id| id.get()),
                    finding.severity.to_string(),
                    finding.category,
                    finding.description,
                    finding.node_refs_json(),
                    finding.status.to_string(),
                    finding.created_at,
                    finding.updated_at,
                ])?;
            }
        }

        tx.commit()?;
        debug!(counts = %snapshot.counts(), "snapshot written");
        Ok(())
    }

    fn check_integrity(&self) -> Result<Vec<IntegrityViolation>, Self::Error> {
        let mut stmt = self.conn.prepare("PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut violations = Vec::new();
        for row in rows {
            let (table_name, row_id, parent_name) = row?;
            let (Some(table), Some(references)) = (
                Table::from_str(&table_name),
                Table::from_str(&parent_name),
            ) else {
                continue;
            };
            violations.push(IntegrityViolation {
                table,
                // Entity ids alias the rowid, so the pragma's rowid is the id.
                row_id: row_id.unwrap_or(-1),
                references,
                detail: format!("row references a missing {parent_name} row"),
            });
        }
        Ok(violations)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Wrap an unparseable stored value as a column conversion failure.
fn bad_column(idx: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, detail.into())
}

fn read_sessions(conn: &Connection) -> rusqlite::Result<Vec<Session>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, purpose, description, granularity, git_commit, git_branch, git_dirty,
                created_at, updated_at, status
         FROM sessions ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Session {
            id: SessionId::new(row.get(0)?),
            name: row.get(1)?,
            purpose: row.get(2)?,
            description: row.get(3)?,
            granularity: row.get(4)?,
            git_commit: row.get(5)?,
            git_branch: row.get(6)?,
            git_dirty: row.get::<_, i64>(7)? != 0,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            status: row.get(10)?,
        })
    })?;
    rows.collect()
}

fn read_flows(conn: &Connection) -> rusqlite::Result<Vec<Flow>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, name, entry_point, description, created_at, status
         FROM flows ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Flow {
            id: FlowId::new(row.get(0)?),
            session_id: SessionId::new(row.get(1)?),
            name: row.get(2)?,
            entry_point: row.get(3)?,
            description: row.get(4)?,
            created_at: row.get(5)?,
            status: row.get(6)?,
        })
    })?;
    rows.collect()
}

fn read_nodes(conn: &Connection) -> rusqlite::Result<Vec<Node>> {
    let mut stmt = conn.prepare(
        "SELECT id, flow_id, timestamp, layer, action, subject, file_ref, props, notes, status
         FROM nodes ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        let layer_raw: String = row.get(3)?;
        let status_raw: String = row.get(9)?;
        Ok(Node {
            id: NodeId::new(row.get(0)?),
            flow_id: FlowId::new(row.get(1)?),
            timestamp: row.get(2)?,
            layer: Layer::from_str(&layer_raw)
                .ok_or_else(|| bad_column(3, format!("unknown layer '{layer_raw}'")))?,
            action: row.get(4)?,
            subject: row.get(5)?,
            file_ref: row.get(6)?,
            props: row.get(7)?,
            notes: row.get(8)?,
            status: RecordStatus::from_str(&status_raw)
                .ok_or_else(|| bad_column(9, format!("unknown status '{status_raw}'")))?,
        })
    })?;
    rows.collect()
}

fn read_edges(conn: &Connection) -> rusqlite::Result<Vec<Edge>> {
    let mut stmt = conn.prepare(
        "SELECT id, from_node, to_node, relation, condition, props, created_at
         FROM edges ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        let relation_raw: String = row.get(3)?;
        Ok(Edge {
            id: EdgeId::new(row.get(0)?),
            from_node: NodeId::new(row.get(1)?),
            to_node: NodeId::new(row.get(2)?),
            relation: Relation::from_str(&relation_raw)
                .ok_or_else(|| bad_column(3, format!("unknown relation '{relation_raw}'")))?,
            condition: row.get(4)?,
            props: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;
    rows.collect()
}

fn read_findings(conn: &Connection) -> rusqlite::Result<Vec<Finding>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, flow_id, severity, category, description, node_refs, status,
                created_at, updated_at
         FROM findings ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        let severity_raw: String = row.get(3)?;
        let node_refs_raw: String = row.get(6)?;
        let status_raw: String = row.get(7)?;
        Ok(Finding {
            id: FindingId::new(row.get(0)?),
            session_id: SessionId::new(row.get(1)?),
            flow_id: row.get::<_, Option<i64>>(2)?.map(FlowId::new),
            severity: Severity::from_str(&severity_raw)
                .ok_or_else(|| bad_column(3, format!("unknown severity '{severity_raw}'")))?,
            category: row.get(4)?,
            description: row.get(5)?,
            node_refs: Finding::parse_node_refs(&node_refs_raw)
                .map_err(|e| bad_column(6, format!("bad node_refs '{node_refs_raw}': {e}")))?,
            status: RecordStatus::from_str(&status_raw)
                .ok_or_else(|| bad_column(7, format!("unknown status '{status_raw}'")))?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    })?;
    rows.collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge driver
// ─────────────────────────────────────────────────────────────────────────────

/// Merge two database files and write the result over `ours`.
///
/// The ancestor path follows the three-way merge-driver calling convention
/// but is not consulted: the merge is a two-way union of `ours` and
/// `theirs`. Foreign-key violations found after the write are carried in
/// the report, and the written result stands either way.
pub fn merge_databases(
    _ancestor: &Path,
    ours: &Path,
    theirs: &Path,
) -> Result<MergeReport, SqliteError> {
    let mut ours_store = SqliteStore::open(ours)?;
    let theirs_store = SqliteStore::open(theirs)?;

    let ours_snap = ours_store.read_snapshot()?;
    let theirs_snap = theirs_store.read_snapshot()?;
    let ours_stamp = ours_snap.stamp();
    let theirs_stamp = theirs_snap.stamp();

    let outcome = merge_snapshots(&ours_snap, &theirs_snap);
    ours_store.write_snapshot(&outcome.snapshot)?;
    let violations = ours_store.check_integrity()?;
    if !violations.is_empty() {
        warn!(
            count = violations.len(),
            "merged database has dangling references"
        );
    }

    Ok(MergeReport {
        stats: outcome.stats,
        ours_stamp,
        theirs_stamp,
        merged_stamp: outcome.snapshot.stamp(),
        violations,
    })
}
