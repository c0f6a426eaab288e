//! Golden tests for the trace graph engine.
//!
//! These tests verify determinism of the analyzer orderings and the merge:
//! the same inputs in the same order must always produce the same entries,
//! the same step numbering, and byte-identical merged snapshots.

use flowtrace::analyzer::FlowAnalysis;
use flowtrace::canonical::{canonical_hash_hex, to_canonical_bytes};
use flowtrace::merge::merge_snapshots;
use flowtrace::snapshot::Snapshot;
use flowtrace::types::{
    Edge, EdgeId, Finding, FindingId, Flow, FlowId, Layer, Node, NodeId, RecordStatus, Relation,
    Session, SessionId, Severity,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn make_session(id: i64, name: &str, updated_at: &str) -> Session {
    Session {
        id: SessionId::new(id),
        name: name.to_string(),
        purpose: "audit".to_string(),
        description: None,
        granularity: "flow".to_string(),
        git_commit: None,
        git_branch: None,
        git_dirty: false,
        created_at: "2024-01-01T00:00:00Z".to_string(),
        updated_at: updated_at.to_string(),
        status: "active".to_string(),
    }
}

fn make_flow(id: i64, session_id: i64, name: &str) -> Flow {
    Flow {
        id: FlowId::new(id),
        session_id: SessionId::new(session_id),
        name: name.to_string(),
        entry_point: None,
        description: None,
        created_at: "2024-01-01T00:00:00Z".to_string(),
        status: "active".to_string(),
    }
}

fn make_node(id: i64, flow_id: i64, action: &str) -> Node {
    Node {
        id: NodeId::new(id),
        flow_id: FlowId::new(flow_id),
        timestamp: format!("2024-01-01T00:00:{:02}Z", id % 60),
        layer: Layer::Code,
        action: action.to_string(),
        subject: String::new(),
        file_ref: None,
        props: None,
        notes: None,
        status: RecordStatus::Active,
    }
}

fn make_concern(id: i64, flow_id: i64, action: &str) -> Node {
    Node {
        status: RecordStatus::Concern,
        ..make_node(id, flow_id, action)
    }
}

fn make_edge(id: i64, from: i64, to: i64, relation: Relation) -> Edge {
    Edge {
        id: EdgeId::new(id),
        from_node: NodeId::new(from),
        to_node: NodeId::new(to),
        relation,
        condition: None,
        props: None,
        created_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn make_finding(id: i64, session_id: i64, category: &str, severity: Severity) -> Finding {
    Finding {
        id: FindingId::new(id),
        session_id: SessionId::new(session_id),
        flow_id: None,
        severity,
        category: category.to_string(),
        description: "weak check".to_string(),
        node_refs: Vec::new(),
        status: RecordStatus::Active,
        created_at: "2024-01-01T00:00:00Z".to_string(),
        updated_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn build_branching_flow() -> (Vec<Node>, Vec<Edge>) {
    //      1
    //     / \
    //    2   3
    //     \ /
    //      4 ─── 5
    let nodes = vec![
        make_node(1, 1, "receive request"),
        make_node(2, 1, "check cache"),
        make_node(3, 1, "query database"),
        make_node(4, 1, "build response"),
        make_node(5, 1, "send response"),
    ];
    let edges = vec![
        make_edge(1, 1, 2, Relation::Branches),
        make_edge(2, 1, 3, Relation::Branches),
        make_edge(3, 2, 4, Relation::Triggers),
        make_edge(4, 3, 4, Relation::Triggers),
        make_edge(5, 4, 5, Relation::Triggers),
    ];
    (nodes, edges)
}

fn build_side(session_name: &str, flow_name: &str, actions: &[&str]) -> Snapshot {
    let mut snap = Snapshot::new();
    snap.sessions
        .push(make_session(1, session_name, "2024-01-02T00:00:00Z"));
    snap.flows.push(make_flow(1, 1, flow_name));
    for (i, action) in actions.iter().enumerate() {
        snap.nodes.push(make_node(i as i64 + 1, 1, action));
        if i > 0 {
            snap.edges.push(make_edge(
                i as i64,
                i as i64,
                i as i64 + 1,
                Relation::Triggers,
            ));
        }
    }
    snap
}

// ─────────────────────────────────────────────────────────────────────────────
// DETERMINISM TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_step_order_identical_100_runs() {
    let (nodes, edges) = build_branching_flow();

    let first = FlowAnalysis::analyze(&nodes, &edges, None);
    for run in 1..100 {
        let again = FlowAnalysis::analyze(&nodes, &edges, None);
        assert_eq!(
            first.step_order, again.step_order,
            "Step order must be deterministic (run {} differs from run 0)",
            run
        );
        assert_eq!(
            first.entry_nodes, again.entry_nodes,
            "Entry order must be deterministic (run {} differs from run 0)",
            run
        );
    }
}

#[test]
fn test_merge_bytes_identical_100_runs() {
    let ours = build_side("auth-audit", "login", &["receive", "check", "respond"]);
    let theirs = build_side("payment-audit", "charge", &["submit", "capture"]);

    let first = to_canonical_bytes(&merge_snapshots(&ours, &theirs).snapshot);
    for run in 1..100 {
        let again = to_canonical_bytes(&merge_snapshots(&ours, &theirs).snapshot);
        assert_eq!(
            first, again,
            "Merged snapshot must be byte-level deterministic (run {} differs from run 0)",
            run
        );
    }
    eprintln!("Deterministic merge hash: {}", canonical_hash_hex(&first));
}

#[test]
fn test_stamp_id_is_content_addressed() {
    let snap = build_side("auth-audit", "login", &["receive", "check"]);

    // Recomputation happens at a different wall-clock instant; the id must
    // depend on content only.
    let stamp1 = snap.stamp();
    let stamp2 = snap.stamp();
    assert_eq!(stamp1.stamp_id, stamp2.stamp_id);
    assert_eq!(stamp1.table_hashes, stamp2.table_hashes);

    // Same content built independently stamps the same.
    let rebuilt = build_side("auth-audit", "login", &["receive", "check"]);
    assert_eq!(stamp1.stamp_id, rebuilt.stamp().stamp_id);
}

#[test]
fn test_stamp_id_changes_with_content() {
    let snap = build_side("auth-audit", "login", &["receive", "check"]);
    let mut changed = snap.clone();
    changed.nodes[1].action = "check twice".to_string();

    assert_ne!(
        snap.stamp().stamp_id,
        changed.stamp().stamp_id,
        "Different node content must produce a different stamp id"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// ANALYZER ORDERING TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_step_order_is_bijection() {
    let (nodes, edges) = build_branching_flow();
    let analysis = FlowAnalysis::analyze(&nodes, &edges, None);

    let mut steps: Vec<u32> = analysis.step_order.values().copied().collect();
    steps.sort_unstable();
    assert_eq!(
        steps,
        (1..=nodes.len() as u32).collect::<Vec<_>>(),
        "Every node must get exactly one step in 1..=N"
    );
    assert_eq!(analysis.step_order.len(), nodes.len());
}

#[test]
fn test_entry_fallback_on_cycle() {
    // 1 → 2 → 3 → 1: no node has zero in-degree.
    let nodes = vec![
        make_node(1, 1, "poll queue"),
        make_node(2, 1, "handle message"),
        make_node(3, 1, "ack message"),
    ];
    let edges = vec![
        make_edge(1, 1, 2, Relation::Triggers),
        make_edge(2, 2, 3, Relation::Triggers),
        make_edge(3, 3, 1, Relation::Triggers),
    ];

    let analysis = FlowAnalysis::analyze(&nodes, &edges, None);
    assert_eq!(
        analysis.entry_nodes,
        vec![NodeId::new(1)],
        "A cyclic flow falls back to the first node as entry"
    );
    assert_eq!(analysis.step_order.len(), 3, "The cycle is still numbered");
}

#[test]
fn test_unreached_nodes_appended_in_input_order() {
    // Component A: 1 → 2. Component B: 3 ⇄ 4 (unreachable from any entry).
    let nodes = vec![
        make_node(1, 1, "start"),
        make_node(2, 1, "finish"),
        make_node(3, 1, "retry loop"),
        make_node(4, 1, "backoff"),
    ];
    let edges = vec![
        make_edge(1, 1, 2, Relation::Triggers),
        make_edge(2, 3, 4, Relation::Triggers),
        make_edge(3, 4, 3, Relation::Triggers),
    ];

    let analysis = FlowAnalysis::analyze(&nodes, &edges, None);
    assert_eq!(analysis.entry_nodes, vec![NodeId::new(1)]);
    assert_eq!(analysis.step_of(NodeId::new(1)), Some(1));
    assert_eq!(analysis.step_of(NodeId::new(2)), Some(2));
    // Unreached nodes are appended after reached ones, in input order.
    assert_eq!(analysis.step_of(NodeId::new(3)), Some(3));
    assert_eq!(analysis.step_of(NodeId::new(4)), Some(4));
}

#[test]
fn test_hint_promotes_entry_case_insensitive() {
    // Both 1 and 2 have zero in-degree; the hint outranks input order.
    let nodes = vec![
        make_node(1, 1, "parse config"),
        make_node(2, 1, "Receive Request"),
        make_node(3, 1, "respond"),
    ];
    let edges = vec![
        make_edge(1, 1, 3, Relation::Triggers),
        make_edge(2, 2, 3, Relation::Triggers),
    ];

    let analysis = FlowAnalysis::analyze(&nodes, &edges, Some("RECEIVE"));
    assert_eq!(
        analysis.primary_entry(),
        Some(NodeId::new(2)),
        "Hint match must be promoted to primary entry"
    );
    assert_eq!(
        analysis.entry_nodes,
        vec![NodeId::new(2), NodeId::new(1)],
        "Non-matching entries keep their relative order after the promoted one"
    );
}

#[test]
fn test_observation_classification() {
    // 1 (active) → 2 (concern): concern with an active parent stays in the flow.
    // 3 (concern, parentless): observation.
    // 3 → 4 (concern): all one-hop parents are concerns, so 4 is an observation.
    let nodes = vec![
        make_node(1, 1, "receive"),
        make_concern(2, 1, "log raw password"),
        make_concern(3, 1, "read env secrets"),
        make_concern(4, 1, "print env secrets"),
    ];
    let edges = vec![
        make_edge(1, 1, 2, Relation::Triggers),
        make_edge(2, 3, 4, Relation::Triggers),
    ];

    let analysis = FlowAnalysis::analyze(&nodes, &edges, None);
    assert!(!analysis.is_observation(NodeId::new(2)));
    assert!(analysis.is_observation(NodeId::new(3)));
    assert!(analysis.is_observation(NodeId::new(4)));
    assert!(analysis.flow_nodes.contains(&NodeId::new(1)));
    assert!(analysis.flow_nodes.contains(&NodeId::new(2)));
    assert!(!analysis.flow_nodes.contains(&NodeId::new(3)));
}

// ─────────────────────────────────────────────────────────────────────────────
// MERGE ORDERING TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_sessions_renumbered_by_name() {
    let mut ours = build_side("zeta-audit", "login", &["a"]);
    ours.sessions[0].id = SessionId::new(7);
    ours.flows[0].session_id = SessionId::new(7);
    let theirs = build_side("alpha-audit", "charge", &["b"]);

    let merged = merge_snapshots(&ours, &theirs).snapshot;
    let names: Vec<&str> = merged.sessions.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["alpha-audit", "zeta-audit"]);
    assert_eq!(merged.sessions[0].id, SessionId::new(1));
    assert_eq!(merged.sessions[1].id, SessionId::new(2));

    // Flows follow their renumbered parents.
    for flow in &merged.flows {
        assert!(
            merged.sessions.iter().any(|s| s.id == flow.session_id),
            "Flow {} must reference a merged session",
            flow.name
        );
    }
}

#[test]
fn test_session_conflict_later_update_wins() {
    let mut ours = build_side("auth-audit", "login", &["a"]);
    ours.sessions[0].purpose = "stale".to_string();
    ours.sessions[0].updated_at = "2024-01-01T00:00:00Z".to_string();

    let mut theirs = build_side("auth-audit", "login", &["a"]);
    theirs.sessions[0].purpose = "fresh".to_string();
    theirs.sessions[0].updated_at = "2024-06-01T00:00:00Z".to_string();

    let outcome = merge_snapshots(&ours, &theirs);
    assert_eq!(outcome.snapshot.sessions.len(), 1);
    assert_eq!(outcome.snapshot.sessions[0].purpose, "fresh");
    assert_eq!(outcome.stats.session_conflicts, 1);
}

#[test]
fn test_finding_dedup_keeps_ours() {
    let mut ours = build_side("auth-audit", "login", &["a"]);
    ours.findings
        .push(make_finding(1, 1, "auth", Severity::High));
    let mut theirs = build_side("auth-audit", "login", &["a"]);
    theirs
        .findings
        .push(make_finding(1, 1, "auth", Severity::Low));

    let outcome = merge_snapshots(&ours, &theirs);
    assert_eq!(outcome.snapshot.findings.len(), 1);
    assert_eq!(
        outcome.snapshot.findings[0].severity,
        Severity::High,
        "On a natural-key tie the ours row must survive"
    );
    assert_eq!(outcome.stats.findings_deduplicated, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// CANONICAL SERIALIZATION TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_canonical_hash_determinism() {
    let snap = build_side("auth-audit", "login", &["receive", "check", "respond"]);

    let mut hashes: Vec<String> = Vec::with_capacity(100);
    for _ in 0..100 {
        hashes.push(canonical_hash_hex(&snap));
    }
    for i in 1..100 {
        assert_eq!(
            hashes[0], hashes[i],
            "Canonical hash must be deterministic"
        );
    }
}

#[test]
fn test_canonical_bytes_distinguish_field_order_free() {
    // Two structurally equal snapshots share canonical bytes.
    let a = build_side("auth-audit", "login", &["receive"]);
    let b = build_side("auth-audit", "login", &["receive"]);
    assert_eq!(to_canonical_bytes(&a), to_canonical_bytes(&b));

    // A one-character content change breaks them.
    let mut c = build_side("auth-audit", "login", &["receive"]);
    c.sessions[0].purpose.push('!');
    assert_ne!(to_canonical_bytes(&a), to_canonical_bytes(&c));
}
