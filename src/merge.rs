//! Snapshot reconciliation engine.
//!
//! Combines two independently-evolved snapshots ("ours", "theirs") into one
//! consistent snapshot with freshly assigned sequential ids. No shared id
//! space exists across snapshots, so identity is carried by natural keys at
//! the aggregate roots (session name; session name + flow name) and cascades
//! down: once a root's winning side is chosen, every descendant row is taken
//! wholesale from that side and renumbered.
//!
//! ## Phases
//!
//! 1. Sessions by name; later `updated_at` wins, canonical content bytes
//!    break exact ties so resolution is order-independent
//! 2. Flows by (session name, flow name); the owning session's winner takes
//!    key collisions, one-sided flows always survive
//! 3. Nodes follow their flow's winning side and are renumbered
//! 4. Edges survive only when both endpoints migrated from the same side
//!    into the same flow; violators are dropped, never raised
//! 5. Findings by (session name, category, description), first-seen-wins,
//!    with flow references cleared and node references pruned when they no
//!    longer resolve
//!
//! The engine is pure: it reads both inputs, builds its whole output, and
//! leaves writing to the store and interchange drivers. Referential
//! integrity of the output holds by construction.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::canonical::canonical_cmp;
use crate::snapshot::{Snapshot, SnapshotStamp};
use crate::store::IntegrityViolation;
use crate::types::{
    Edge, EdgeId, Finding, FindingId, Flow, FlowId, Node, NodeId, Session, SessionId,
};

/// Which input snapshot a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Side {
    /// The first argument; merge results are written back to its location.
    Ours,
    /// The second argument.
    Theirs,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// Per-phase event counters for one merge run.
///
/// Row counts of the output live in its [`SnapshotStamp`]; these count the
/// decisions made along the way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Session names present on both sides.
    pub session_conflicts: u64,
    /// Flow keys present on both sides.
    pub flow_collisions: u64,
    /// Edges dropped for unresolved endpoints or crossing flows.
    pub edges_dropped: u64,
    /// Findings skipped as natural-key duplicates.
    pub findings_deduplicated: u64,
    /// Finding flow references cleared (finding demoted to session level).
    pub flow_refs_cleared: u64,
    /// Finding node references pruned.
    pub node_refs_dropped: u64,
    /// Rows sharing a natural key within one side, resolved first-seen-wins.
    pub duplicate_natural_keys: u64,
    /// Rows whose parent reference did not resolve on their own side.
    pub dangling_rows_dropped: u64,
}

/// A merged snapshot together with the decisions that produced it.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The reconciled snapshot.
    pub snapshot: Snapshot,
    /// Event counters per phase.
    pub stats: MergeStats,
}

/// Full provenance record returned by the store-level merge drivers.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    /// Event counters per phase.
    pub stats: MergeStats,
    /// Stamp of the "ours" input.
    pub ours_stamp: SnapshotStamp,
    /// Stamp of the "theirs" input.
    pub theirs_stamp: SnapshotStamp,
    /// Stamp of the written result.
    pub merged_stamp: SnapshotStamp,
    /// Foreign-key violations found after the write; non-fatal but flagged.
    pub violations: Vec<IntegrityViolation>,
}

impl MergeReport {
    /// True when the post-write integrity check flagged anything.
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// Merge two snapshots into one reconciled snapshot.
///
/// Pure and total: never fails, never mutates its inputs. The output carries
/// fresh sequential ids per table and is referentially consistent by
/// construction.
pub fn merge_snapshots(ours: &Snapshot, theirs: &Snapshot) -> MergeOutcome {
    let mut stats = MergeStats::default();

    let session_plan = plan_sessions(ours, theirs, &mut stats);
    let flow_plan = plan_flows(ours, theirs, &session_plan, &mut stats);
    let node_plan = migrate_nodes(ours, theirs, &flow_plan, &mut stats);
    let edges = migrate_edges(ours, theirs, &node_plan, &mut stats);
    let findings = reconcile_findings(ours, theirs, &session_plan, &flow_plan, &node_plan, &mut stats);

    let snapshot = Snapshot {
        sessions: session_plan.final_sessions,
        flows: flow_plan.final_flows,
        nodes: node_plan.final_nodes,
        edges,
        findings,
    };

    let counts = snapshot.counts();
    tracing::info!(
        sessions = counts.sessions,
        flows = counts.flows,
        nodes = counts.nodes,
        edges = counts.edges,
        findings = counts.findings,
        session_conflicts = stats.session_conflicts,
        flow_collisions = stats.flow_collisions,
        edges_dropped = stats.edges_dropped,
        findings_deduplicated = stats.findings_deduplicated,
        "merge complete"
    );

    MergeOutcome { snapshot, stats }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 1: sessions
// ─────────────────────────────────────────────────────────────────────────────

struct SessionPlan {
    /// Winning rows renumbered 1..N in name-sorted order.
    final_sessions: Vec<Session>,
    /// Which side won each name.
    winner_of: BTreeMap<String, Side>,
    /// Canonical id per name after renumbering.
    id_by_name: BTreeMap<String, SessionId>,
    /// Old id -> name, per side, for resolving descendants.
    ours_names: BTreeMap<SessionId, String>,
    theirs_names: BTreeMap<SessionId, String>,
}

impl SessionPlan {
    fn names_of(&self, side: Side) -> &BTreeMap<SessionId, String> {
        match side {
            Side::Ours => &self.ours_names,
            Side::Theirs => &self.theirs_names,
        }
    }
}

/// Later `updated_at` wins; canonical content bytes break exact ties.
///
/// Both comparisons are symmetric in their arguments, so the surviving row
/// for a contested name never depends on which side was passed first.
fn theirs_wins(ours_row: &Session, theirs_row: &Session) -> bool {
    match theirs_row.updated_at.cmp(&ours_row.updated_at) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            canonical_cmp(&session_content(theirs_row), &session_content(ours_row))
                == Ordering::Greater
        }
    }
}

type SessionContent<'a> = (
    &'a str,
    &'a str,
    &'a Option<String>,
    &'a str,
    &'a Option<String>,
    &'a Option<String>,
    bool,
    &'a str,
    &'a str,
    &'a str,
);

/// Every field except the snapshot-local id.
fn session_content(s: &Session) -> SessionContent<'_> {
    (
        &s.name,
        &s.purpose,
        &s.description,
        &s.granularity,
        &s.git_commit,
        &s.git_branch,
        s.git_dirty,
        &s.created_at,
        &s.updated_at,
        &s.status,
    )
}

fn plan_sessions(ours: &Snapshot, theirs: &Snapshot, stats: &mut MergeStats) -> SessionPlan {
    let mut winners: BTreeMap<String, (Side, Session)> = BTreeMap::new();

    for row in &ours.sessions {
        match winners.entry(row.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert((Side::Ours, row.clone()));
            }
            Entry::Occupied(_) => {
                stats.duplicate_natural_keys += 1;
                tracing::warn!(name = %row.name, side = %Side::Ours, "duplicate session name, keeping first");
            }
        }
    }

    for row in &theirs.sessions {
        match winners.entry(row.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert((Side::Theirs, row.clone()));
            }
            Entry::Occupied(mut slot) => {
                if slot.get().0 == Side::Theirs {
                    stats.duplicate_natural_keys += 1;
                    tracing::warn!(name = %row.name, side = %Side::Theirs, "duplicate session name, keeping first");
                } else {
                    stats.session_conflicts += 1;
                    if theirs_wins(&slot.get().1, row) {
                        slot.insert((Side::Theirs, row.clone()));
                    }
                }
            }
        }
    }

    let mut final_sessions = Vec::with_capacity(winners.len());
    let mut winner_of = BTreeMap::new();
    let mut id_by_name = BTreeMap::new();
    for (index, (name, (side, row))) in winners.into_iter().enumerate() {
        let new_id = SessionId::new(index as i64 + 1);
        let mut session = row;
        session.id = new_id;
        winner_of.insert(name.clone(), side);
        id_by_name.insert(name, new_id);
        final_sessions.push(session);
    }

    let ours_names = ours
        .sessions
        .iter()
        .map(|s| (s.id, s.name.clone()))
        .collect();
    let theirs_names = theirs
        .sessions
        .iter()
        .map(|s| (s.id, s.name.clone()))
        .collect();

    tracing::debug!(
        sessions = final_sessions.len(),
        conflicts = stats.session_conflicts,
        "phase 1: sessions reconciled"
    );

    SessionPlan {
        final_sessions,
        winner_of,
        id_by_name,
        ours_names,
        theirs_names,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 2: flows
// ─────────────────────────────────────────────────────────────────────────────

struct FlowPlan {
    /// Winning rows renumbered 1..N in key-sorted order.
    final_flows: Vec<Flow>,
    /// (side, old id) -> new id, for the winning row of each side.
    remap: BTreeMap<(Side, FlowId), FlowId>,
}

fn plan_flows(
    ours: &Snapshot,
    theirs: &Snapshot,
    sessions: &SessionPlan,
    stats: &mut MergeStats,
) -> FlowPlan {
    let mut chosen: BTreeMap<(String, String), (Side, Flow)> = BTreeMap::new();

    for row in &ours.flows {
        let Some(session_name) = sessions.ours_names.get(&row.session_id) else {
            stats.dangling_rows_dropped += 1;
            continue;
        };
        match chosen.entry((session_name.clone(), row.name.clone())) {
            Entry::Vacant(slot) => {
                slot.insert((Side::Ours, row.clone()));
            }
            Entry::Occupied(_) => {
                stats.duplicate_natural_keys += 1;
                tracing::warn!(session = %session_name, flow = %row.name, side = %Side::Ours, "duplicate flow key, keeping first");
            }
        }
    }

    for row in &theirs.flows {
        let Some(session_name) = sessions.theirs_names.get(&row.session_id) else {
            stats.dangling_rows_dropped += 1;
            continue;
        };
        let session_winner = sessions
            .winner_of
            .get(session_name)
            .copied()
            .unwrap_or(Side::Theirs);
        match chosen.entry((session_name.clone(), row.name.clone())) {
            Entry::Vacant(slot) => {
                slot.insert((Side::Theirs, row.clone()));
            }
            Entry::Occupied(mut slot) => {
                if slot.get().0 == Side::Theirs {
                    stats.duplicate_natural_keys += 1;
                    tracing::warn!(session = %session_name, flow = %row.name, side = %Side::Theirs, "duplicate flow key, keeping first");
                } else {
                    stats.flow_collisions += 1;
                    if session_winner == Side::Theirs {
                        slot.insert((Side::Theirs, row.clone()));
                    }
                }
            }
        }
    }

    let mut final_flows = Vec::with_capacity(chosen.len());
    let mut remap = BTreeMap::new();
    for (index, ((session_name, _), (side, row))) in chosen.into_iter().enumerate() {
        let Some(&session_id) = sessions.id_by_name.get(&session_name) else {
            // Unreachable: every resolvable side name has a winner.
            stats.dangling_rows_dropped += 1;
            continue;
        };
        let new_id = FlowId::new(index as i64 + 1);
        remap.insert((side, row.id), new_id);
        let mut flow = row;
        flow.id = new_id;
        flow.session_id = session_id;
        final_flows.push(flow);
    }

    tracing::debug!(
        flows = final_flows.len(),
        collisions = stats.flow_collisions,
        "phase 2: flows reconciled"
    );

    FlowPlan { final_flows, remap }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 3: nodes
// ─────────────────────────────────────────────────────────────────────────────

struct NodePlan {
    /// Migrated rows renumbered 1..N, ours' survivors first.
    final_nodes: Vec<Node>,
    /// (side, old id) -> new id for every migrated node.
    remap: BTreeMap<(Side, NodeId), NodeId>,
    /// New node id -> new flow id, for the cross-flow edge check.
    flow_of: BTreeMap<NodeId, FlowId>,
}

fn migrate_nodes(
    ours: &Snapshot,
    theirs: &Snapshot,
    flows: &FlowPlan,
    _stats: &mut MergeStats,
) -> NodePlan {
    let mut final_nodes = Vec::new();
    let mut remap = BTreeMap::new();
    let mut flow_of = BTreeMap::new();
    let mut next_id = 1i64;

    for (side, snapshot) in [(Side::Ours, ours), (Side::Theirs, theirs)] {
        for node in &snapshot.nodes {
            // A remap entry exists only for the winning flow row of this
            // side, so one lookup covers dangling refs, lost flows, and
            // intra-side duplicate losers alike.
            let Some(&new_flow) = flows.remap.get(&(side, node.flow_id)) else {
                continue;
            };
            let new_id = NodeId::new(next_id);
            next_id += 1;
            remap.insert((side, node.id), new_id);
            flow_of.insert(new_id, new_flow);
            let mut migrated = node.clone();
            migrated.id = new_id;
            migrated.flow_id = new_flow;
            final_nodes.push(migrated);
        }
    }

    tracing::debug!(nodes = final_nodes.len(), "phase 3: nodes migrated");

    NodePlan {
        final_nodes,
        remap,
        flow_of,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 4: edges
// ─────────────────────────────────────────────────────────────────────────────

fn migrate_edges(
    ours: &Snapshot,
    theirs: &Snapshot,
    nodes: &NodePlan,
    stats: &mut MergeStats,
) -> Vec<Edge> {
    let mut final_edges = Vec::new();
    let mut next_id = 1i64;

    for (side, snapshot) in [(Side::Ours, ours), (Side::Theirs, theirs)] {
        for edge in &snapshot.edges {
            let from = nodes.remap.get(&(side, edge.from_node)).copied();
            let to = nodes.remap.get(&(side, edge.to_node)).copied();
            let (Some(from), Some(to)) = (from, to) else {
                stats.edges_dropped += 1;
                continue;
            };
            if nodes.flow_of.get(&from) != nodes.flow_of.get(&to) {
                stats.edges_dropped += 1;
                tracing::warn!(edge = %edge.id, side = %side, "dropping cross-flow edge");
                continue;
            }
            let mut migrated = edge.clone();
            migrated.id = EdgeId::new(next_id);
            next_id += 1;
            migrated.from_node = from;
            migrated.to_node = to;
            final_edges.push(migrated);
        }
    }

    tracing::debug!(
        edges = final_edges.len(),
        dropped = stats.edges_dropped,
        "phase 4: edges migrated"
    );

    final_edges
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 5: findings
// ─────────────────────────────────────────────────────────────────────────────

fn reconcile_findings(
    ours: &Snapshot,
    theirs: &Snapshot,
    sessions: &SessionPlan,
    flows: &FlowPlan,
    nodes: &NodePlan,
    stats: &mut MergeStats,
) -> Vec<Finding> {
    let mut final_findings = Vec::new();
    let mut seen: BTreeSet<(String, String, String)> = BTreeSet::new();
    let mut next_id = 1i64;

    for (side, snapshot) in [(Side::Ours, ours), (Side::Theirs, theirs)] {
        let names = sessions.names_of(side);
        for finding in &snapshot.findings {
            let Some(session_name) = names.get(&finding.session_id) else {
                stats.dangling_rows_dropped += 1;
                continue;
            };
            let key = (
                session_name.clone(),
                finding.category.clone(),
                finding.description.clone(),
            );
            if !seen.insert(key) {
                stats.findings_deduplicated += 1;
                continue;
            }
            let Some(&session_id) = sessions.id_by_name.get(session_name) else {
                stats.dangling_rows_dropped += 1;
                continue;
            };

            let mut merged = finding.clone();
            merged.id = FindingId::new(next_id);
            next_id += 1;
            merged.session_id = session_id;

            // A flow reference that fails to remap demotes the finding to
            // session level; losing the reference is better than losing the
            // finding.
            merged.flow_id = match finding.flow_id {
                Some(old) => {
                    let new = flows.remap.get(&(side, old)).copied();
                    if new.is_none() {
                        stats.flow_refs_cleared += 1;
                    }
                    new
                }
                None => None,
            };

            merged.node_refs = finding
                .node_refs
                .iter()
                .filter_map(|r| nodes.remap.get(&(side, *r)).copied())
                .collect();
            stats.node_refs_dropped += (finding.node_refs.len() - merged.node_refs.len()) as u64;

            final_findings.push(merged);
        }
    }

    tracing::debug!(
        findings = final_findings.len(),
        deduplicated = stats.findings_deduplicated,
        "phase 5: findings reconciled"
    );

    final_findings
}
