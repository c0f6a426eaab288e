//! # flowtrace
//!
//! Deterministic analysis and merging for append-only trace graphs.
//!
//! A trace session records how a system behaves: flows group nodes (observed
//! steps), edges connect them, findings annotate them. This crate answers two
//! questions about that graph:
//!
//! > Where does a flow start, in what order do its steps run, and which
//! > steps are passive observations rather than part of the flow?
//!
//! > Given two divergent copies of a trace database, what is the single
//! > correct union?
//!
//! ## Architecture
//!
//! ```text
//! Snapshot → FlowGraph → FlowAnalysis (entries, step order, observations)
//!     ↓
//! merge_snapshots → MergeOutcome → EntityStore (SQLite or memory)
//!     ↓
//! exports (JSON / YAML / Mermaid / Markdown) + CSV interchange
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same two inputs in the same order produce byte-identical merges
//! - Entity ordering is canonical (sessions by name, flows by (session, name))
//! - Conflict ties break on canonical bytes, never on ambient state

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod canonical;
pub mod snapshot;
pub mod analyzer;
pub mod merge;
pub mod store;
pub mod interchange;
pub mod validate;
pub mod export;

// Re-exports
pub use types::{
    Edge, EdgeId, Finding, FindingId, Flow, FlowId, Layer, Node, NodeId, RecordStatus, Relation,
    Session, SessionId, Severity,
};
pub use canonical::{canonical_cmp, canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use snapshot::{SessionLookup, Snapshot, SnapshotStamp, Table, TableCounts};
pub use analyzer::{FlowAnalysis, FlowGraph};
pub use merge::{merge_snapshots, MergeOutcome, MergeReport, MergeStats, Side};
pub use store::{referential_violations, EntityStore, InMemoryStore, IntegrityViolation};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use interchange::{read_snapshot_dir, write_snapshot_dir, InterchangeError};
pub use validate::{validate_session, SessionValidation, ValidationLimits};
pub use export::{FlowExport, SessionExport};

/// Schema version stamped on snapshots and carried in merge reports.
/// Increment on breaking changes to any table shape.
pub const TRACE_SCHEMA_VERSION: &str = "1.0.0";
