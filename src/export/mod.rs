//! Export adapters.
//!
//! Everything here renders from owned projections of a snapshot:
//! [`FlowExport`] is one flow's presented view (deleted nodes excluded,
//! nodes in timestamp order) plus its findings, and [`SessionExport`] is a
//! session with all of its flows and session-level findings. The
//! projections serialize directly for the JSON and YAML formats; the
//! mermaid and markdown renderers walk them.

pub mod markdown;
pub mod mermaid;

use serde::Serialize;

use crate::snapshot::Snapshot;
use crate::types::{Edge, Finding, Flow, Node, Session};

/// One flow's presented view, ready to render.
#[derive(Debug, Clone, Serialize)]
pub struct FlowExport {
    /// The flow row.
    pub flow: Flow,
    /// Presented nodes, timestamp order.
    pub nodes: Vec<Node>,
    /// Edges between presented nodes.
    pub edges: Vec<Edge>,
    /// Findings scoped to this flow.
    pub findings: Vec<Finding>,
}

impl FlowExport {
    /// Project a flow out of a snapshot.
    pub fn collect(snapshot: &Snapshot, flow: &Flow) -> Self {
        Self {
            flow: flow.clone(),
            nodes: snapshot
                .render_nodes_of(flow.id)
                .into_iter()
                .cloned()
                .collect(),
            edges: snapshot
                .render_edges_of(flow.id)
                .into_iter()
                .cloned()
                .collect(),
            findings: snapshot
                .findings_of_flow(flow.id)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    /// Pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// YAML document.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// A session with all of its flows, ready to render.
#[derive(Debug, Clone, Serialize)]
pub struct SessionExport {
    /// The session row.
    pub session: Session,
    /// Every flow of the session, in row order.
    pub flows: Vec<FlowExport>,
    /// Findings with no flow scope.
    pub session_findings: Vec<Finding>,
}

impl SessionExport {
    /// Project a session out of a snapshot.
    pub fn collect(snapshot: &Snapshot, session: &Session) -> Self {
        Self {
            session: session.clone(),
            flows: snapshot
                .flows_of(session.id)
                .into_iter()
                .map(|flow| FlowExport::collect(snapshot, flow))
                .collect(),
            session_findings: snapshot
                .session_findings(session.id)
                .into_iter()
                .cloned()
                .collect(),
        }
    }

    /// Pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// YAML document.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowId, RecordStatus, Relation};

    fn sample() -> Snapshot {
        let mut snap = Snapshot::new();
        snap.sessions.push(Session::minimal(1, "proj"));
        snap.flows.push(Flow::minimal(1, 1, "login"));
        snap.nodes.push(Node::minimal(1, 1, "receive request"));
        snap.nodes.push(Node::minimal(2, 1, "check password"));
        let mut gone = Node::minimal(3, 1, "legacy step");
        gone.status = RecordStatus::Deleted;
        snap.nodes.push(gone);
        snap.edges.push(Edge::minimal(1, 1, 2, Relation::Triggers));
        snap.edges.push(Edge::minimal(2, 2, 3, Relation::Triggers));
        let mut scoped = Finding::minimal(1, 1, "auth", "weak hash");
        scoped.flow_id = Some(FlowId::new(1));
        snap.findings.push(scoped);
        snap.findings.push(Finding::minimal(2, 1, "scope", "stale docs"));
        snap
    }

    #[test]
    fn test_flow_export_excludes_deleted() {
        let snap = sample();
        let export = FlowExport::collect(&snap, &snap.flows[0]);

        assert_eq!(export.nodes.len(), 2);
        // The edge into the deleted node goes with it.
        assert_eq!(export.edges.len(), 1);
        assert_eq!(export.findings.len(), 1);
    }

    #[test]
    fn test_session_export_separates_finding_scopes() {
        let snap = sample();
        let export = SessionExport::collect(&snap, &snap.sessions[0]);

        assert_eq!(export.flows.len(), 1);
        assert_eq!(export.session_findings.len(), 1);
        assert_eq!(export.session_findings[0].category, "scope");
    }

    #[test]
    fn test_json_and_yaml_documents() {
        let snap = sample();
        let export = SessionExport::collect(&snap, &snap.sessions[0]);

        let json = export.to_json().unwrap();
        assert!(json.contains("\"name\": \"proj\""));
        assert!(json.contains("\"action\": \"receive request\""));

        let yaml = export.to_yaml().unwrap();
        assert!(yaml.contains("name: proj"));
        assert!(yaml.contains("action: receive request"));
    }
}
