//! CSV interchange format.
//!
//! One file per table (`sessions.csv` .. `findings.csv`) in a flat
//! directory. Every field is quoted, rows are ordered by id, and the header
//! row is written even for an empty table, so exports diff cleanly under
//! version control. Empty fields read back as `None`; `None` writes back as
//! an empty field.
//!
//! Reads are strict: a missing table file or an unparseable field aborts
//! the whole operation before anything is mutated.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::merge::{merge_snapshots, MergeReport};
use crate::snapshot::{Snapshot, Table};
use crate::store::referential_violations;
use crate::types::{
    Edge, EdgeId, Finding, FindingId, Flow, FlowId, Layer, Node, NodeId, RecordStatus, Relation,
    Session, SessionId, Severity,
};

/// Error type for interchange operations.
#[derive(Debug, thiserror::Error)]
pub enum InterchangeError {
    /// Interchange directory is missing.
    #[error("Interchange directory not found: {0}")]
    MissingDirectory(PathBuf),

    /// One of the five table files is missing.
    #[error("Missing interchange file for {table}: {path}")]
    MissingTable {
        /// Table whose file is absent.
        table: Table,
        /// Path that was checked.
        path: PathBuf,
    },

    /// A field failed domain validation after CSV parsing.
    #[error("{table}.csv record {record}: {detail}")]
    Malformed {
        /// Table being read.
        table: Table,
        /// 1-based data record index.
        record: usize,
        /// What was wrong with the field.
        detail: String,
    },

    /// CSV-level parse or write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Row shapes
// ─────────────────────────────────────────────────────────────────────────────

const SESSION_COLUMNS: [&str; 11] = [
    "id",
    "name",
    "purpose",
    "description",
    "granularity",
    "git_commit",
    "git_branch",
    "git_dirty",
    "created_at",
    "updated_at",
    "status",
];

const FLOW_COLUMNS: [&str; 7] = [
    "id",
    "session_id",
    "name",
    "entry_point",
    "description",
    "created_at",
    "status",
];

const NODE_COLUMNS: [&str; 10] = [
    "id",
    "flow_id",
    "timestamp",
    "layer",
    "action",
    "subject",
    "file_ref",
    "props",
    "notes",
    "status",
];

const EDGE_COLUMNS: [&str; 7] = [
    "id",
    "from_node",
    "to_node",
    "relation",
    "condition",
    "props",
    "created_at",
];

const FINDING_COLUMNS: [&str; 10] = [
    "id",
    "session_id",
    "flow_id",
    "severity",
    "category",
    "description",
    "node_refs",
    "status",
    "created_at",
    "updated_at",
];

#[derive(Debug, Serialize, Deserialize)]
struct SessionRow {
    id: i64,
    name: String,
    purpose: String,
    description: Option<String>,
    granularity: String,
    git_commit: Option<String>,
    git_branch: Option<String>,
    git_dirty: i64,
    created_at: String,
    updated_at: String,
    status: String,
}

impl SessionRow {
    fn from_session(session: &Session) -> Self {
        Self {
            id: session.id.get(),
            name: session.name.clone(),
            purpose: session.purpose.clone(),
            description: session.description.clone(),
            granularity: session.granularity.clone(),
            git_commit: session.git_commit.clone(),
            git_branch: session.git_branch.clone(),
            git_dirty: session.git_dirty as i64,
            created_at: session.created_at.clone(),
            updated_at: session.updated_at.clone(),
            status: session.status.clone(),
        }
    }

    fn into_session(self) -> Session {
        Session {
            id: SessionId::new(self.id),
            name: self.name,
            purpose: self.purpose,
            description: self.description,
            granularity: self.granularity,
            git_commit: self.git_commit,
            git_branch: self.git_branch,
            git_dirty: self.git_dirty != 0,
            created_at: self.created_at,
            updated_at: self.updated_at,
            status: self.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FlowRow {
    id: i64,
    session_id: i64,
    name: String,
    entry_point: Option<String>,
    description: Option<String>,
    created_at: String,
    status: String,
}

impl FlowRow {
    fn from_flow(flow: &Flow) -> Self {
        Self {
            id: flow.id.get(),
            session_id: flow.session_id.get(),
            name: flow.name.clone(),
            entry_point: flow.entry_point.clone(),
            description: flow.description.clone(),
            created_at: flow.created_at.clone(),
            status: flow.status.clone(),
        }
    }

    fn into_flow(self) -> Flow {
        Flow {
            id: FlowId::new(self.id),
            session_id: SessionId::new(self.session_id),
            name: self.name,
            entry_point: self.entry_point,
            description: self.description,
            created_at: self.created_at,
            status: self.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRow {
    id: i64,
    flow_id: i64,
    timestamp: String,
    layer: String,
    action: String,
    subject: String,
    file_ref: Option<String>,
    props: Option<String>,
    notes: Option<String>,
    status: String,
}

impl NodeRow {
    fn from_node(node: &Node) -> Self {
        Self {
            id: node.id.get(),
            flow_id: node.flow_id.get(),
            timestamp: node.timestamp.clone(),
            layer: node.layer.to_string(),
            action: node.action.clone(),
            subject: node.subject.clone(),
            file_ref: node.file_ref.clone(),
            props: node.props.clone(),
            notes: node.notes.clone(),
            status: node.status.to_string(),
        }
    }

    fn into_node(self) -> Result<Node, String> {
        let layer = Layer::from_str(&self.layer)
            .ok_or_else(|| format!("unknown layer '{}'", self.layer))?;
        let status = RecordStatus::from_str(&self.status)
            .ok_or_else(|| format!("unknown status '{}'", self.status))?;
        Ok(Node {
            id: NodeId::new(self.id),
            flow_id: FlowId::new(self.flow_id),
            timestamp: self.timestamp,
            layer,
            action: self.action,
            subject: self.subject,
            file_ref: self.file_ref,
            props: self.props,
            notes: self.notes,
            status,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRow {
    id: i64,
    from_node: i64,
    to_node: i64,
    relation: String,
    condition: Option<String>,
    props: Option<String>,
    created_at: String,
}

impl EdgeRow {
    fn from_edge(edge: &Edge) -> Self {
        Self {
            id: edge.id.get(),
            from_node: edge.from_node.get(),
            to_node: edge.to_node.get(),
            relation: edge.relation.to_string(),
            condition: edge.condition.clone(),
            props: edge.props.clone(),
            created_at: edge.created_at.clone(),
        }
    }

    fn into_edge(self) -> Result<Edge, String> {
        let relation = Relation::from_str(&self.relation)
            .ok_or_else(|| format!("unknown relation '{}'", self.relation))?;
        Ok(Edge {
            id: EdgeId::new(self.id),
            from_node: NodeId::new(self.from_node),
            to_node: NodeId::new(self.to_node),
            relation,
            condition: self.condition,
            props: self.props,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FindingRow {
    id: i64,
    session_id: i64,
    flow_id: Option<i64>,
    severity: String,
    category: String,
    description: String,
    node_refs: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl FindingRow {
    fn from_finding(finding: &Finding) -> Self {
        Self {
            id: finding.id.get(),
            session_id: finding.session_id.get(),
            flow_id: finding.flow_id.map(|id| id.get()),
            severity: finding.severity.to_string(),
            category: finding.category.clone(),
            description: finding.description.clone(),
            node_refs: finding.node_refs_json(),
            status: finding.status.to_string(),
            created_at: finding.created_at.clone(),
            updated_at: finding.updated_at.clone(),
        }
    }

    fn into_finding(self) -> Result<Finding, String> {
        let severity = Severity::from_str(&self.severity)
            .ok_or_else(|| format!("unknown severity '{}'", self.severity))?;
        let status = RecordStatus::from_str(&self.status)
            .ok_or_else(|| format!("unknown status '{}'", self.status))?;
        let node_refs = Finding::parse_node_refs(&self.node_refs)
            .map_err(|e| format!("bad node_refs '{}': {e}", self.node_refs))?;
        Ok(Finding {
            id: FindingId::new(self.id),
            session_id: SessionId::new(self.session_id),
            flow_id: self.flow_id.map(FlowId::new),
            severity,
            category: self.category,
            description: self.description,
            node_refs,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory read/write
// ─────────────────────────────────────────────────────────────────────────────

fn table_path(dir: &Path, table: Table) -> PathBuf {
    dir.join(format!("{table}.csv"))
}

fn ensure_tables_present(dir: &Path) -> Result<(), InterchangeError> {
    if !dir.is_dir() {
        return Err(InterchangeError::MissingDirectory(dir.to_path_buf()));
    }
    for table in Table::ALL {
        let path = table_path(dir, table);
        if !path.is_file() {
            return Err(InterchangeError::MissingTable { table, path });
        }
    }
    Ok(())
}

fn read_table<R: DeserializeOwned>(dir: &Path, table: Table) -> Result<Vec<R>, InterchangeError> {
    let mut reader = csv::Reader::from_path(table_path(dir, table))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn convert_rows<R, T>(
    rows: Vec<R>,
    table: Table,
    convert: impl Fn(R) -> Result<T, String>,
) -> Result<Vec<T>, InterchangeError> {
    rows.into_iter()
        .enumerate()
        .map(|(idx, row)| {
            convert(row).map_err(|detail| InterchangeError::Malformed {
                table,
                record: idx + 1,
                detail,
            })
        })
        .collect()
}

fn write_table<R: Serialize>(
    dir: &Path,
    table: Table,
    columns: &[&str],
    rows: &[R],
) -> Result<(), InterchangeError> {
    // Header is written explicitly so empty tables still produce one.
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .has_headers(false)
        .from_path(table_path(dir, table))?;
    writer.write_record(columns)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a full snapshot from a directory of table files.
///
/// All five files must be present; any absence or unparseable field fails
/// the whole read.
pub fn read_snapshot_dir(dir: &Path) -> Result<Snapshot, InterchangeError> {
    ensure_tables_present(dir)?;

    let snapshot = Snapshot {
        sessions: read_table::<SessionRow>(dir, Table::Sessions)?
            .into_iter()
            .map(SessionRow::into_session)
            .collect(),
        flows: read_table::<FlowRow>(dir, Table::Flows)?
            .into_iter()
            .map(FlowRow::into_flow)
            .collect(),
        nodes: convert_rows(
            read_table::<NodeRow>(dir, Table::Nodes)?,
            Table::Nodes,
            NodeRow::into_node,
        )?,
        edges: convert_rows(
            read_table::<EdgeRow>(dir, Table::Edges)?,
            Table::Edges,
            EdgeRow::into_edge,
        )?,
        findings: convert_rows(
            read_table::<FindingRow>(dir, Table::Findings)?,
            Table::Findings,
            FindingRow::into_finding,
        )?,
    };
    debug!(dir = %dir.display(), counts = %snapshot.counts(), "interchange read");
    Ok(snapshot)
}

/// Write a full snapshot as a directory of table files.
///
/// Creates the directory if needed and always writes all five files, each
/// sorted by id.
pub fn write_snapshot_dir(snapshot: &Snapshot, dir: &Path) -> Result<(), InterchangeError> {
    std::fs::create_dir_all(dir)?;

    let mut sessions: Vec<SessionRow> =
        snapshot.sessions.iter().map(SessionRow::from_session).collect();
    sessions.sort_by_key(|r| r.id);
    write_table(dir, Table::Sessions, &SESSION_COLUMNS, &sessions)?;

    let mut flows: Vec<FlowRow> = snapshot.flows.iter().map(FlowRow::from_flow).collect();
    flows.sort_by_key(|r| r.id);
    write_table(dir, Table::Flows, &FLOW_COLUMNS, &flows)?;

    let mut nodes: Vec<NodeRow> = snapshot.nodes.iter().map(NodeRow::from_node).collect();
    nodes.sort_by_key(|r| r.id);
    write_table(dir, Table::Nodes, &NODE_COLUMNS, &nodes)?;

    let mut edges: Vec<EdgeRow> = snapshot.edges.iter().map(EdgeRow::from_edge).collect();
    edges.sort_by_key(|r| r.id);
    write_table(dir, Table::Edges, &EDGE_COLUMNS, &edges)?;

    let mut findings: Vec<FindingRow> =
        snapshot.findings.iter().map(FindingRow::from_finding).collect();
    findings.sort_by_key(|r| r.id);
    write_table(dir, Table::Findings, &FINDING_COLUMNS, &findings)?;

    debug!(dir = %dir.display(), counts = %snapshot.counts(), "interchange written");
    Ok(())
}

/// Merge two interchange directories and write the result over `ours_dir`.
///
/// Both directories are read in full before anything is written, so a
/// malformed input leaves `ours_dir` untouched.
pub fn merge_interchange(ours_dir: &Path, theirs_dir: &Path) -> Result<MergeReport, InterchangeError> {
    let ours = read_snapshot_dir(ours_dir)?;
    let theirs = read_snapshot_dir(theirs_dir)?;
    let ours_stamp = ours.stamp();
    let theirs_stamp = theirs.stamp();

    let outcome = merge_snapshots(&ours, &theirs);
    write_snapshot_dir(&outcome.snapshot, ours_dir)?;

    let violations = referential_violations(&outcome.snapshot);
    if !violations.is_empty() {
        warn!(
            count = violations.len(),
            "merged interchange has dangling references"
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

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Snapshot {
        let mut snap = Snapshot::new();
        let mut session = Session::minimal(1, "proj");
        session.description = Some("payment audit".to_string());
        session.git_branch = Some("main".to_string());
        session.git_dirty = true;
        snap.sessions.push(session);
        snap.flows.push(Flow::minimal(1, 1, "login"));

        let mut first = Node::minimal(1, 1, "receive request");
        first.layer = Layer::Api;
        first.subject = "POST /login".to_string();
        snap.nodes.push(first);
        let mut second = Node::minimal(2, 1, "check password");
        second.layer = Layer::Auth;
        second.notes = Some("bcrypt, cost 12".to_string());
        snap.nodes.push(second);

        let mut edge = Edge::minimal(1, 1, 2, Relation::Triggers);
        edge.condition = Some("body parsed".to_string());
        snap.edges.push(edge);

        let mut finding = Finding::minimal(1, 1, "auth", "rate limit missing");
        finding.flow_id = Some(FlowId::new(1));
        finding.severity = Severity::Medium;
        finding.node_refs = vec![NodeId::new(2)];
        snap.findings.push(finding);
        snap
    }

    #[test]
    fn test_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snap = sample_snapshot();

        write_snapshot_dir(&snap, dir.path()).unwrap();
        let read = read_snapshot_dir(dir.path()).unwrap();

        assert_eq!(read, snap);
        assert_eq!(read.stamp().stamp_id, snap.stamp().stamp_id);
    }

    #[test]
    fn test_empty_snapshot_writes_headers_only() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot_dir(&Snapshot::new(), dir.path()).unwrap();

        for table in Table::ALL {
            let text = std::fs::read_to_string(table_path(dir.path(), table)).unwrap();
            assert_eq!(text.lines().count(), 1, "{table}.csv should be header-only");
        }
        let sessions = std::fs::read_to_string(table_path(dir.path(), Table::Sessions)).unwrap();
        assert!(sessions.starts_with("\"id\",\"name\",\"purpose\""));

        assert!(read_snapshot_dir(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_every_field_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot_dir(&sample_snapshot(), dir.path()).unwrap();

        let text = std::fs::read_to_string(table_path(dir.path(), Table::Nodes)).unwrap();
        for line in text.lines() {
            assert!(line.starts_with('"') && line.ends_with('"'));
        }
    }

    #[test]
    fn test_missing_table_file_aborts() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot_dir(&sample_snapshot(), dir.path()).unwrap();
        std::fs::remove_file(table_path(dir.path(), Table::Edges)).unwrap();

        let err = read_snapshot_dir(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            InterchangeError::MissingTable {
                table: Table::Edges,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_enum_value_reports_record() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot_dir(&sample_snapshot(), dir.path()).unwrap();

        let path = table_path(dir.path(), Table::Nodes);
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("\"AUTH\"", "\"KERNEL\"")).unwrap();

        let err = read_snapshot_dir(dir.path()).unwrap_err();
        match err {
            InterchangeError::Malformed { table, record, detail } => {
                assert_eq!(table, Table::Nodes);
                assert_eq!(record, 2);
                assert!(detail.contains("KERNEL"));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_interchange_overwrites_ours() {
        let ours_dir = tempfile::tempdir().unwrap();
        let theirs_dir = tempfile::tempdir().unwrap();

        write_snapshot_dir(&sample_snapshot(), ours_dir.path()).unwrap();

        let mut theirs = Snapshot::new();
        theirs.sessions.push(Session::minimal(3, "other-proj"));
        theirs.flows.push(Flow::minimal(8, 3, "checkout"));
        theirs.nodes.push(Node::minimal(20, 8, "charge card"));
        write_snapshot_dir(&theirs, theirs_dir.path()).unwrap();

        let report = merge_interchange(ours_dir.path(), theirs_dir.path()).unwrap();
        assert!(!report.has_violations());
        assert_eq!(report.stats.session_conflicts, 0);

        let merged = read_snapshot_dir(ours_dir.path()).unwrap();
        let names: Vec<&str> = merged.sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["other-proj", "proj"]);
        assert_eq!(merged.nodes.len(), 3);
        assert_eq!(report.merged_stamp.stamp_id, merged.stamp().stamp_id);
    }

    #[test]
    fn test_malformed_theirs_leaves_ours_untouched() {
        let ours_dir = tempfile::tempdir().unwrap();
        let theirs_dir = tempfile::tempdir().unwrap();

        write_snapshot_dir(&sample_snapshot(), ours_dir.path()).unwrap();
        let before = read_snapshot_dir(ours_dir.path()).unwrap();

        // Theirs is missing every table file.
        assert!(merge_interchange(ours_dir.path(), theirs_dir.path()).is_err());

        let after = read_snapshot_dir(ours_dir.path()).unwrap();
        assert_eq!(after, before);
    }
}
