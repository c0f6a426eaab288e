//! Mermaid flowchart rendering.
//!
//! One subgraph per populated layer, nodes labelled `<step>. <action>`,
//! entries drawn as stadiums, concerns and observations styled via class
//! defs. Observation nodes sit in their own dashed subgraph so analyst
//! commentary reads apart from the executed flow.

use std::collections::BTreeMap;
use std::fmt;

use crate::analyzer::FlowAnalysis;
use crate::types::{Layer, Node, NodeId, Relation};

use super::FlowExport;

/// Flowchart layout direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Top to bottom.
    TopDown,
    /// Left to right.
    LeftRight,
}

impl Direction {
    /// Mermaid keyword for the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopDown => "TD",
            Self::LeftRight => "LR",
        }
    }

    /// Parse a direction keyword.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TD" | "TB" => Some(Self::TopDown),
            "LR" => Some(Self::LeftRight),
            _ => None,
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::TopDown
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Characters that break quoted Mermaid labels, with their replacements.
const LABEL_ENTITIES: [(char, &str); 8] = [
    ('"', "&quot;"),
    ('<', "&lt;"),
    ('>', "&gt;"),
    ('(', "&#40;"),
    (')', "&#41;"),
    ('|', "&#124;"),
    ('[', "&#91;"),
    (']', "&#93;"),
];

/// Escape label text for use inside a quoted Mermaid label.
pub fn sanitize_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match LABEL_ENTITIES.iter().find(|(c, _)| *c == ch) {
            Some((_, entity)) => out.push_str(entity),
            None => out.push(ch),
        }
    }
    out
}

/// Arrow glyph per relation kind.
pub fn arrow_for(relation: Relation) -> &'static str {
    match relation {
        Relation::Reads => "-.->",
        Relation::Writes => "==>",
        _ => "-->",
    }
}

/// Display label per node, with a subject suffix when the action text alone
/// is ambiguous.
fn display_labels(nodes: &[Node]) -> BTreeMap<NodeId, String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for node in nodes {
        *counts.entry(node.action.as_str()).or_default() += 1;
    }
    nodes
        .iter()
        .map(|node| {
            let label = if counts[node.action.as_str()] > 1 {
                format!("{} ({})", node.action, node.subject)
            } else {
                node.action.clone()
            };
            (node.id, sanitize_label(&label))
        })
        .collect()
}

fn step_label(analysis: &FlowAnalysis, id: NodeId) -> String {
    analysis
        .step_of(id)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn node_line(node: &Node, analysis: &FlowAnalysis, labels: &BTreeMap<NodeId, String>) -> String {
    let label = format!("{}. {}", step_label(analysis, node.id), labels[&node.id]);
    if analysis.entry_nodes.contains(&node.id) {
        format!("N{}([\"{label}\"]):::entryPoint", node.id)
    } else if node.is_concern() {
        format!("N{}[\"{label}\"]:::concern", node.id)
    } else {
        format!("N{}[\"{label}\"]", node.id)
    }
}

/// Render one flow as a Mermaid flowchart.
///
/// Returns `None` when the flow has no presented nodes.
pub fn render(export: &FlowExport, direction: Direction) -> Option<String> {
    if export.nodes.is_empty() {
        return None;
    }

    let analysis = FlowAnalysis::analyze(
        &export.nodes,
        &export.edges,
        export.flow.entry_point.as_deref(),
    );
    let labels = display_labels(&export.nodes);

    let mut lines = vec![format!("flowchart {direction}")];

    for layer in Layer::ALL {
        let mut members: Vec<&Node> = export
            .nodes
            .iter()
            .filter(|n| n.layer == layer && analysis.flow_nodes.contains(&n.id))
            .collect();
        if members.is_empty() {
            continue;
        }
        members.sort_by_key(|n| analysis.step_of(n.id).unwrap_or(u32::MAX));

        lines.push(format!("    subgraph {layer}"));
        for node in members {
            lines.push(format!("        {}", node_line(node, &analysis, &labels)));
        }
        lines.push("    end".to_string());
    }

    if !analysis.observation_nodes.is_empty() {
        let mut members: Vec<&Node> = export
            .nodes
            .iter()
            .filter(|n| analysis.is_observation(n.id))
            .collect();
        members.sort_by_key(|n| analysis.step_of(n.id).unwrap_or(u32::MAX));

        lines.push("    subgraph OBSERVATIONS".to_string());
        lines.push(
            "    style OBSERVATIONS stroke-dasharray: 5 5,fill:#fff9db,stroke:#fab005".to_string(),
        );
        for node in members {
            lines.push(format!(
                "        N{}[\"{}. {}\"]:::observation",
                node.id,
                step_label(&analysis, node.id),
                labels[&node.id]
            ));
        }
        lines.push("    end".to_string());
    }

    lines.push(String::new());

    for edge in &export.edges {
        let label = match edge.condition.as_deref().filter(|c| !c.is_empty()) {
            Some(condition) => format!("{}<br/>{}", edge.relation, sanitize_label(condition)),
            None => edge.relation.to_string(),
        };
        lines.push(format!(
            "    N{} {}|\"{label}\"| N{}",
            edge.from_node,
            arrow_for(edge.relation),
            edge.to_node
        ));
    }

    lines.push(String::new());
    lines.push("    classDef concern fill:#ff6b6b,stroke:#c92a2a".to_string());
    lines.push("    classDef entryPoint fill:#51cf66,stroke:#2b8a3e".to_string());
    lines.push(
        "    classDef observation fill:#fff9db,stroke:#fab005,stroke-dasharray: 5 5".to_string(),
    );

    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;
    use crate::types::{Edge, Flow, RecordStatus, Session};

    fn login_export() -> FlowExport {
        let mut snap = Snapshot::new();
        snap.sessions.push(Session::minimal(1, "proj"));
        let mut flow = Flow::minimal(1, 1, "login");
        flow.entry_point = Some("receive".to_string());
        snap.flows.push(flow);

        let mut receive = Node::minimal(1, 1, "receive request");
        receive.layer = Layer::Api;
        snap.nodes.push(receive);
        let mut check = Node::minimal(2, 1, "check password");
        check.layer = Layer::Auth;
        snap.nodes.push(check);
        let mut load = Node::minimal(3, 1, "load profile (cache)");
        load.layer = Layer::Data;
        snap.nodes.push(load);
        let mut note = Node::minimal(4, 1, "weak hash allowed");
        note.status = RecordStatus::Concern;
        snap.nodes.push(note);
        let mut store = Node::minimal(5, 1, "store session");
        store.layer = Layer::Data;
        snap.nodes.push(store);

        snap.edges.push(Edge::minimal(1, 1, 2, Relation::Triggers));
        snap.edges.push(Edge::minimal(2, 2, 3, Relation::Reads));
        let mut write = Edge::minimal(3, 2, 5, Relation::Writes);
        write.condition = Some("password ok".to_string());
        snap.edges.push(write);

        FlowExport::collect(&snap, &snap.flows[0])
    }

    #[test]
    fn test_layer_subgraphs_in_fixed_order() {
        let text = render(&login_export(), Direction::TopDown).unwrap();
        assert!(text.starts_with("flowchart TD"));

        let api = text.find("subgraph API").unwrap();
        let auth = text.find("subgraph AUTH").unwrap();
        let data = text.find("subgraph DATA").unwrap();
        assert!(api < auth && auth < data);
    }

    #[test]
    fn test_entry_node_is_a_stadium() {
        let text = render(&login_export(), Direction::TopDown).unwrap();
        assert!(text.contains("N1([\"1. receive request\"]):::entryPoint"));
    }

    #[test]
    fn test_parentless_concern_renders_as_observation() {
        let text = render(&login_export(), Direction::TopDown).unwrap();
        assert!(text.contains("subgraph OBSERVATIONS"));
        assert!(text.contains(":::observation"));
        // The note never shows up in a layer subgraph.
        assert!(!text.contains("N4[\"2. weak hash allowed\"]:::concern"));
    }

    #[test]
    fn test_relation_arrows_and_condition_labels() {
        let text = render(&login_export(), Direction::TopDown).unwrap();
        assert!(text.contains("N1 -->|\"TRIGGERS\"| N2"));
        assert!(text.contains("N2 -.->|\"READS\"| N3"));
        assert!(text.contains("N2 ==>|\"WRITES<br/>password ok\"| N5"));
    }

    #[test]
    fn test_labels_are_sanitized() {
        let text = render(&login_export(), Direction::TopDown).unwrap();
        assert!(text.contains("load profile &#40;cache&#41;"));
        assert!(!text.contains("load profile (cache)"));
    }

    #[test]
    fn test_left_right_direction() {
        let text = render(&login_export(), Direction::LeftRight).unwrap();
        assert!(text.starts_with("flowchart LR"));
    }

    #[test]
    fn test_ambiguous_actions_get_subject_suffix() {
        let mut snap = Snapshot::new();
        snap.sessions.push(Session::minimal(1, "proj"));
        snap.flows.push(Flow::minimal(1, 1, "writes"));
        let mut first = Node::minimal(1, 1, "write record");
        first.subject = "sessions table".to_string();
        snap.nodes.push(first);
        let mut second = Node::minimal(2, 1, "write record");
        second.subject = "audit log".to_string();
        snap.nodes.push(second);
        snap.edges.push(Edge::minimal(1, 1, 2, Relation::Triggers));

        let export = FlowExport::collect(&snap, &snap.flows[0]);
        let text = render(&export, Direction::TopDown).unwrap();
        assert!(text.contains("write record &#40;sessions table&#41;"));
        assert!(text.contains("write record &#40;audit log&#41;"));
    }

    #[test]
    fn test_empty_flow_renders_nothing() {
        let mut snap = Snapshot::new();
        snap.sessions.push(Session::minimal(1, "proj"));
        snap.flows.push(Flow::minimal(1, 1, "empty"));
        let export = FlowExport::collect(&snap, &snap.flows[0]);

        assert!(render(&export, Direction::TopDown).is_none());
    }

    #[test]
    fn test_classdef_block_present() {
        let text = render(&login_export(), Direction::TopDown).unwrap();
        assert!(text.contains("classDef concern fill:#ff6b6b"));
        assert!(text.contains("classDef entryPoint fill:#51cf66"));
        assert!(text.contains("classDef observation fill:#fff9db"));
    }
}
