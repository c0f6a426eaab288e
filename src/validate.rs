//! Flow lint checks.
//!
//! Five checks per flow: branch edges must carry conditions, orphan nodes
//! are flagged, repeated action labels need subject disambiguation,
//! oversized flows should be split, and a flow should have a structurally
//! detectable entry. Checks run on the presented view of a flow, so
//! deleted nodes and their edges are out of scope.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::analyzer::FlowGraph;
use crate::snapshot::Snapshot;
use crate::types::{Edge, Flow, FlowId, Node, NodeId, Relation, SessionId};

/// Node-count thresholds for the flow size lint.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationLimits {
    /// Count at which a flow draws a size warning.
    pub warn_nodes: usize,
    /// Count at which a flow draws a size error.
    pub error_nodes: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            warn_nodes: 40,
            error_nodes: 60,
        }
    }
}

/// Lint severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLevel {
    /// Blocks a clean validation run.
    Error,
    /// Advisory only.
    Warning,
}

impl fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARN"),
        }
    }
}

/// One lint hit.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    /// Severity of the hit.
    pub level: IssueLevel,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    fn error(message: String) -> Self {
        Self {
            level: IssueLevel::Error,
            message,
        }
    }

    fn warning(message: String) -> Self {
        Self {
            level: IssueLevel::Warning,
            message,
        }
    }
}

/// Lint results for one flow.
#[derive(Debug, Clone, Serialize)]
pub struct FlowValidation {
    /// Flow that was checked.
    pub flow_id: FlowId,
    /// Flow name, for reporting.
    pub flow_name: String,
    /// Presented node count.
    pub node_count: usize,
    /// Action labels of the structural entry nodes, when any exist.
    pub entry_labels: Vec<String>,
    /// Lint hits, in check order.
    pub issues: Vec<ValidationIssue>,
}

impl FlowValidation {
    /// Number of error-level hits.
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.level == IssueLevel::Error)
            .count()
    }

    /// Number of warning-level hits.
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.level == IssueLevel::Warning)
            .count()
    }

    /// True when no check fired.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Lint results for every flow of a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionValidation {
    /// Per-flow results, in flow row order.
    pub flows: Vec<FlowValidation>,
}

impl SessionValidation {
    /// Total error-level hits across flows.
    pub fn error_count(&self) -> usize {
        self.flows.iter().map(FlowValidation::error_count).sum()
    }

    /// Total warning-level hits across flows.
    pub fn warning_count(&self) -> usize {
        self.flows.iter().map(FlowValidation::warning_count).sum()
    }

    /// True when any flow has an error-level hit.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

/// Run all checks over every flow of a session.
pub fn validate_session(
    snapshot: &Snapshot,
    session_id: SessionId,
    limits: &ValidationLimits,
) -> SessionValidation {
    SessionValidation {
        flows: snapshot
            .flows_of(session_id)
            .into_iter()
            .map(|flow| validate_flow(snapshot, flow, limits))
            .collect(),
    }
}

/// Run all checks over one flow.
pub fn validate_flow(snapshot: &Snapshot, flow: &Flow, limits: &ValidationLimits) -> FlowValidation {
    let nodes: Vec<Node> = snapshot
        .render_nodes_of(flow.id)
        .into_iter()
        .cloned()
        .collect();
    let edges: Vec<Edge> = snapshot
        .render_edges_of(flow.id)
        .into_iter()
        .cloned()
        .collect();
    let graph = FlowGraph::build(&nodes, &edges);

    let mut issues = Vec::new();
    check_branch_conditions(&nodes, &edges, &mut issues);
    check_orphans(&nodes, &edges, &mut issues);
    check_duplicate_labels(&nodes, &mut issues);
    check_size(nodes.len(), limits, &mut issues);
    let entry_labels = check_entry(&nodes, &graph, &mut issues);

    debug!(flow = %flow.name, issues = issues.len(), "flow checked");
    FlowValidation {
        flow_id: flow.id,
        flow_name: flow.name.clone(),
        node_count: nodes.len(),
        entry_labels,
        issues,
    }
}

fn action_label(nodes: &[Node], id: NodeId) -> String {
    nodes
        .iter()
        .find(|n| n.id == id)
        .map(|n| n.action.clone())
        .unwrap_or_else(|| format!("N{id}"))
}

/// A branch edge without a condition cannot be rendered meaningfully.
fn check_branch_conditions(nodes: &[Node], edges: &[Edge], issues: &mut Vec<ValidationIssue>) {
    for edge in edges {
        let missing = edge.relation == Relation::Branches
            && edge.condition.as_deref().map_or(true, str::is_empty);
        if missing {
            issues.push(ValidationIssue::error(format!(
                "BRANCHES without condition: {} -> {}",
                action_label(nodes, edge.from_node),
                action_label(nodes, edge.to_node),
            )));
        }
    }
}

fn check_orphans(nodes: &[Node], edges: &[Edge], issues: &mut Vec<ValidationIssue>) {
    let mut connected = BTreeSet::new();
    for edge in edges {
        connected.insert(edge.from_node);
        connected.insert(edge.to_node);
    }
    for node in nodes {
        if !connected.contains(&node.id) {
            issues.push(ValidationIssue::warning(format!(
                "Orphan node: N{} ({})",
                node.id, node.action
            )));
        }
    }
}

/// Nodes repeating an action label render identically unless their subjects
/// differ.
fn check_duplicate_labels(nodes: &[Node], issues: &mut Vec<ValidationIssue>) {
    let mut by_action: BTreeMap<&str, Vec<&Node>> = BTreeMap::new();
    for node in nodes {
        by_action.entry(node.action.as_str()).or_default().push(node);
    }
    for (action, dupes) in by_action {
        if dupes.len() < 2 {
            continue;
        }
        let subjects: BTreeSet<&str> = dupes.iter().map(|n| n.subject.as_str()).collect();
        if subjects.len() <= 1 {
            issues.push(ValidationIssue::warning(format!(
                "Duplicate label ({}x): \"{action}\", add distinct subjects",
                dupes.len(),
            )));
        }
    }
}

fn check_size(count: usize, limits: &ValidationLimits, issues: &mut Vec<ValidationIssue>) {
    if count >= limits.error_nodes {
        issues.push(ValidationIssue::error(format!(
            "{count} nodes, split into sub-flows (max recommended: {})",
            limits.warn_nodes
        )));
    } else if count >= limits.warn_nodes {
        issues.push(ValidationIssue::warning(format!(
            "{count} nodes, consider splitting (recommended: <{})",
            limits.warn_nodes
        )));
    }
}

/// Reports on the zero-in-degree set, not on the analyzer's entry list:
/// the analyzer always falls back to some entry, while this check is about
/// whether one detectably exists.
fn check_entry(nodes: &[Node], graph: &FlowGraph, issues: &mut Vec<ValidationIssue>) -> Vec<String> {
    if nodes.is_empty() {
        issues.push(ValidationIssue::warning("Flow has no nodes".to_string()));
        return Vec::new();
    }
    let natural: Vec<&Node> = nodes
        .iter()
        .filter(|n| graph.in_degree(n.id) == 0)
        .collect();
    if natural.is_empty() {
        issues.push(ValidationIssue::warning(
            "No entry point detected (all nodes have incoming edges)".to_string(),
        ));
        return Vec::new();
    }
    natural.iter().map(|n| n.action.clone()).collect()
}
