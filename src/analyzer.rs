//! Deterministic flow-graph analyzer.
//!
//! Consumes one flow's node and edge sets and produces everything the
//! renderers need: entry nodes, a 1-based step ordering, and the
//! flow/observation classification.
//!
//! ## Algorithm
//!
//! 1. Build adjacency, predecessor, and in-degree maps restricted to the
//!    input node set (edges pointing outside the set are ignored)
//! 2. Entry nodes are the zero-in-degree nodes in input order; an optional
//!    entry-point hint promotes the first matching entry to the front
//! 3. Step numbers come from a multi-source BFS over all entries, with
//!    unreached nodes appended in input order, so every node gets exactly
//!    one step in [1, N]
//! 4. A node is an observation iff its status is `concern` and every
//!    immediate predecessor (if any) is also `concern`
//!
//! The ordering is a rendering aid, not a correctness-grade topological
//! sort: cycles are numbered deterministically but not meaningfully.
//! Everything here is pure and deterministic given a fixed input ordering.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::types::{Edge, EdgeId, Node, NodeId, RecordStatus};

/// Adjacency view of one flow's nodes and edges.
///
/// Built once per analysis and shared by the sequencing and classification
/// passes. Only edges whose endpoints both belong to the input node set are
/// indexed.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    adjacency: BTreeMap<NodeId, Vec<(NodeId, EdgeId)>>,
    predecessors: BTreeMap<NodeId, BTreeSet<NodeId>>,
    in_degree: BTreeMap<NodeId, u32>,
}

impl FlowGraph {
    /// Build the graph from one flow's nodes and edges.
    pub fn build(nodes: &[Node], edges: &[Edge]) -> Self {
        let members: BTreeSet<NodeId> = nodes.iter().map(|n| n.id).collect();
        let mut adjacency: BTreeMap<NodeId, Vec<(NodeId, EdgeId)>> = BTreeMap::new();
        let mut predecessors: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut in_degree: BTreeMap<NodeId, u32> =
            members.iter().map(|id| (*id, 0)).collect();

        for edge in edges {
            if !members.contains(&edge.from_node) || !members.contains(&edge.to_node) {
                continue;
            }
            adjacency
                .entry(edge.from_node)
                .or_default()
                .push((edge.to_node, edge.id));
            predecessors
                .entry(edge.to_node)
                .or_default()
                .insert(edge.from_node);
            *in_degree.entry(edge.to_node).or_insert(0) += 1;
        }

        Self {
            adjacency,
            predecessors,
            in_degree,
        }
    }

    /// In-degree of a node within the input set (0 for unknown ids).
    pub fn in_degree(&self, id: NodeId) -> u32 {
        self.in_degree.get(&id).copied().unwrap_or(0)
    }

    /// Outgoing (neighbor, edge) pairs in edge input order.
    pub fn neighbors(&self, id: NodeId) -> &[(NodeId, EdgeId)] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Immediate predecessors of a node, deduplicated.
    pub fn parents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.predecessors.get(&id).into_iter().flatten().copied()
    }
}

/// Zero-in-degree nodes in input order, with the hint match promoted.
///
/// If `entry_hint` is non-empty, the first zero-in-degree node whose action
/// or subject contains the hint (case-insensitive) moves to the front and
/// becomes the primary entry. If no node has zero in-degree (a full cycle),
/// the first input node stands in as a synthetic entry. Never empty for a
/// non-empty node set.
pub fn find_entry_nodes(
    nodes: &[Node],
    graph: &FlowGraph,
    entry_hint: Option<&str>,
) -> Vec<NodeId> {
    let mut entries: Vec<NodeId> = nodes
        .iter()
        .filter(|n| graph.in_degree(n.id) == 0)
        .map(|n| n.id)
        .collect();

    if let Some(hint) = entry_hint.filter(|h| !h.is_empty()) {
        let by_id: BTreeMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();
        let matched = entries
            .iter()
            .position(|id| by_id.get(id).is_some_and(|n| n.matches_hint(hint)));
        if let Some(pos) = matched {
            let id = entries.remove(pos);
            entries.insert(0, id);
        }
    }

    if entries.is_empty() {
        if let Some(first) = nodes.first() {
            entries.push(first.id);
        }
    }
    entries
}

/// Assign a 1-based step number to every node.
///
/// Multi-source BFS from all entries, visiting neighbors in adjacency order
/// and numbering nodes as they are dequeued. Nodes unreachable from any
/// entry (disconnected components, cycle remainders) are appended afterward
/// in input order. The result is a bijection onto [1, N].
pub fn topological_order(
    nodes: &[Node],
    graph: &FlowGraph,
    entry_nodes: &[NodeId],
) -> BTreeMap<NodeId, u32> {
    let mut order = BTreeMap::new();
    let mut visited: BTreeSet<NodeId> = BTreeSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();

    for &id in entry_nodes {
        if visited.insert(id) {
            queue.push_back(id);
        }
    }

    let mut step = 1u32;
    while let Some(id) = queue.pop_front() {
        order.insert(id, step);
        step += 1;
        for &(neighbor, _) in graph.neighbors(id) {
            if visited.insert(neighbor) {
                queue.push_back(neighbor);
            }
        }
    }

    for node in nodes {
        if !order.contains_key(&node.id) {
            order.insert(node.id, step);
            step += 1;
        }
    }
    order
}

/// Partition nodes into (flow, observation) sets.
///
/// A node is an observation iff its status is `concern` and either it has no
/// in-set predecessors or every immediate predecessor is also `concern`.
/// One hop only: a concern whose parent chain eventually reaches an active
/// node still counts as part of the flow if its direct parent is active.
pub fn classify_nodes(
    nodes: &[Node],
    graph: &FlowGraph,
) -> (BTreeSet<NodeId>, BTreeSet<NodeId>) {
    let status_by_id: BTreeMap<NodeId, RecordStatus> =
        nodes.iter().map(|n| (n.id, n.status)).collect();

    let mut observations = BTreeSet::new();
    for node in nodes {
        if node.status != RecordStatus::Concern {
            continue;
        }
        let mut parents = graph.parents(node.id).peekable();
        if parents.peek().is_none() {
            observations.insert(node.id);
            continue;
        }
        let all_concern =
            parents.all(|p| status_by_id.get(&p) == Some(&RecordStatus::Concern));
        if all_concern {
            observations.insert(node.id);
        }
    }

    let flow_nodes = nodes
        .iter()
        .map(|n| n.id)
        .filter(|id| !observations.contains(id))
        .collect();
    (flow_nodes, observations)
}

/// Bundled analyzer output, the contract consumed by the renderers.
#[derive(Debug, Clone)]
pub struct FlowAnalysis {
    /// Entry nodes in priority order; the first is the primary entry.
    pub entry_nodes: Vec<NodeId>,
    /// Step number per node, a bijection onto [1, N].
    pub step_order: BTreeMap<NodeId, u32>,
    /// Nodes that are part of the executed flow.
    pub flow_nodes: BTreeSet<NodeId>,
    /// Analyst-annotation nodes excluded from the executed flow.
    pub observation_nodes: BTreeSet<NodeId>,
}

impl FlowAnalysis {
    /// Run all four analyzer operations over one flow's data.
    pub fn analyze(nodes: &[Node], edges: &[Edge], entry_hint: Option<&str>) -> Self {
        let graph = FlowGraph::build(nodes, edges);
        let entry_nodes = find_entry_nodes(nodes, &graph, entry_hint);
        let step_order = topological_order(nodes, &graph, &entry_nodes);
        let (flow_nodes, observation_nodes) = classify_nodes(nodes, &graph);

        tracing::debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            entries = entry_nodes.len(),
            observations = observation_nodes.len(),
            "flow analysis complete"
        );

        Self {
            entry_nodes,
            step_order,
            flow_nodes,
            observation_nodes,
        }
    }

    /// The primary entry node, if the flow is non-empty.
    pub fn primary_entry(&self) -> Option<NodeId> {
        self.entry_nodes.first().copied()
    }

    /// Step number of a node.
    pub fn step_of(&self, id: NodeId) -> Option<u32> {
        self.step_order.get(&id).copied()
    }

    /// True when a node was classified as an observation.
    pub fn is_observation(&self, id: NodeId) -> bool {
        self.observation_nodes.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Relation;

    fn make_node(id: i64, status: RecordStatus) -> Node {
        let mut node = Node::minimal(id, 1, &format!("step {id}"));
        node.status = status;
        node
    }

    fn make_edge(id: i64, from: i64, to: i64) -> Edge {
        Edge::minimal(id, from, to, Relation::Triggers)
    }

    #[test]
    fn test_concern_below_active_parent_stays_in_flow() {
        // T1 active, T2 concern under T1, T3 concern under T2.
        let nodes = vec![
            make_node(1, RecordStatus::Active),
            make_node(2, RecordStatus::Concern),
            make_node(3, RecordStatus::Concern),
        ];
        let edges = vec![make_edge(1, 1, 2), make_edge(2, 2, 3)];

        let analysis = FlowAnalysis::analyze(&nodes, &edges, None);

        // T2's parent is active, so T2 is flow; T3's only parent is concern.
        assert!(analysis.flow_nodes.contains(&NodeId::new(1)));
        assert!(analysis.flow_nodes.contains(&NodeId::new(2)));
        assert!(analysis.is_observation(NodeId::new(3)));
    }

    #[test]
    fn test_parentless_concern_is_observation() {
        let nodes = vec![
            make_node(1, RecordStatus::Concern),
            make_node(2, RecordStatus::Concern),
        ];
        let edges = vec![make_edge(1, 1, 2)];

        let (flow, obs) = {
            let graph = FlowGraph::build(&nodes, &edges);
            classify_nodes(&nodes, &graph)
        };

        assert!(flow.is_empty());
        assert_eq!(obs.len(), 2);
    }

    #[test]
    fn test_entry_and_sequence_with_hint() {
        let mut login = make_node(1, RecordStatus::Active);
        login.action = "receive login request".to_string();
        let nodes = vec![login, make_node(2, RecordStatus::Active)];
        let edges = vec![make_edge(1, 1, 2)];

        let analysis = FlowAnalysis::analyze(&nodes, &edges, Some("login"));

        assert_eq!(analysis.entry_nodes, vec![NodeId::new(1)]);
        assert_eq!(analysis.step_of(NodeId::new(1)), Some(1));
        assert_eq!(analysis.step_of(NodeId::new(2)), Some(2));
    }

    #[test]
    fn test_hint_promotes_matching_entry() {
        let mut a = make_node(1, RecordStatus::Active);
        a.action = "parse config".to_string();
        let mut b = make_node(2, RecordStatus::Active);
        b.subject = "TokenService".to_string();
        // Two roots, both zero in-degree; hint matches the second.
        let nodes = vec![a, b, make_node(3, RecordStatus::Active)];
        let edges = vec![make_edge(1, 1, 3), make_edge(2, 2, 3)];

        let graph = FlowGraph::build(&nodes, &edges);
        let entries = find_entry_nodes(&nodes, &graph, Some("token"));

        assert_eq!(entries, vec![NodeId::new(2), NodeId::new(1)]);
    }

    #[test]
    fn test_cycle_gets_synthetic_entry() {
        let nodes = vec![
            make_node(1, RecordStatus::Active),
            make_node(2, RecordStatus::Active),
        ];
        let edges = vec![make_edge(1, 1, 2), make_edge(2, 2, 1)];

        let analysis = FlowAnalysis::analyze(&nodes, &edges, None);

        // Every node has an incoming edge; the first input node stands in.
        assert_eq!(analysis.entry_nodes, vec![NodeId::new(1)]);
        assert_eq!(analysis.step_of(NodeId::new(1)), Some(1));
        assert_eq!(analysis.step_of(NodeId::new(2)), Some(2));
    }

    #[test]
    fn test_unreachable_nodes_appended_in_input_order() {
        // 1 -> 2 reachable; 3 and 4 form a detached cycle.
        let nodes = vec![
            make_node(1, RecordStatus::Active),
            make_node(2, RecordStatus::Active),
            make_node(3, RecordStatus::Active),
            make_node(4, RecordStatus::Active),
        ];
        let edges = vec![make_edge(1, 1, 2), make_edge(2, 3, 4), make_edge(3, 4, 3)];

        let graph = FlowGraph::build(&nodes, &edges);
        let entries = find_entry_nodes(&nodes, &graph, None);
        let order = topological_order(&nodes, &graph, &entries);

        assert_eq!(order[&NodeId::new(1)], 1);
        assert_eq!(order[&NodeId::new(2)], 2);
        assert_eq!(order[&NodeId::new(3)], 3);
        assert_eq!(order[&NodeId::new(4)], 4);
    }

    #[test]
    fn test_out_of_set_edges_ignored() {
        let nodes = vec![make_node(1, RecordStatus::Active)];
        // Edge into the set from a node that is not a member.
        let edges = vec![make_edge(1, 99, 1)];

        let graph = FlowGraph::build(&nodes, &edges);
        assert_eq!(graph.in_degree(NodeId::new(1)), 0);
        assert!(graph.neighbors(NodeId::new(99)).is_empty());

        let entries = find_entry_nodes(&nodes, &graph, None);
        assert_eq!(entries, vec![NodeId::new(1)]);
    }

    #[test]
    fn test_empty_flow() {
        let analysis = FlowAnalysis::analyze(&[], &[], None);
        assert!(analysis.entry_nodes.is_empty());
        assert!(analysis.step_order.is_empty());
        assert!(analysis.flow_nodes.is_empty());
        assert!(analysis.observation_nodes.is_empty());
    }

    #[test]
    fn test_parallel_edges_counted_per_edge() {
        let nodes = vec![
            make_node(1, RecordStatus::Active),
            make_node(2, RecordStatus::Active),
        ];
        let edges = vec![make_edge(1, 1, 2), make_edge(2, 1, 2)];

        let graph = FlowGraph::build(&nodes, &edges);
        assert_eq!(graph.in_degree(NodeId::new(2)), 2);
        // Parents are deduplicated even when edges are not.
        assert_eq!(graph.parents(NodeId::new(2)).count(), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_flow() -> impl Strategy<Value = (Vec<Node>, Vec<Edge>)> {
            (1usize..16, proptest::collection::vec((0usize..16, 0usize..16), 0..32))
                .prop_map(|(n, raw_edges)| {
                    let nodes: Vec<Node> = (0..n)
                        .map(|i| {
                            let status = if i % 3 == 0 {
                                RecordStatus::Concern
                            } else {
                                RecordStatus::Active
                            };
                            make_node(i as i64 + 1, status)
                        })
                        .collect();
                    let edges: Vec<Edge> = raw_edges
                        .into_iter()
                        .enumerate()
                        .map(|(i, (from, to))| {
                            make_edge(i as i64 + 1, (from % n) as i64 + 1, (to % n) as i64 + 1)
                        })
                        .collect();
                    (nodes, edges)
                })
        }

        proptest! {
            #[test]
            fn prop_analysis_is_total((nodes, edges) in arb_flow()) {
                let analysis = FlowAnalysis::analyze(&nodes, &edges, None);

                // Entries never empty for a non-empty set.
                prop_assert!(!analysis.entry_nodes.is_empty());

                // Step order is a bijection onto [1, N].
                prop_assert_eq!(analysis.step_order.len(), nodes.len());
                let mut steps: Vec<u32> = analysis.step_order.values().copied().collect();
                steps.sort_unstable();
                let expected: Vec<u32> = (1..=nodes.len() as u32).collect();
                prop_assert_eq!(steps, expected);

                // Classification partitions the node set.
                let all: BTreeSet<NodeId> = nodes.iter().map(|n| n.id).collect();
                let mut union = analysis.flow_nodes.clone();
                union.extend(analysis.observation_nodes.iter().copied());
                prop_assert_eq!(union, all);
                prop_assert!(analysis
                    .flow_nodes
                    .intersection(&analysis.observation_nodes)
                    .next()
                    .is_none());
            }
        }
    }
}
