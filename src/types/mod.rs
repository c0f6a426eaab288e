//! Core entity types for the trace graph.

pub mod edge;
pub mod finding;
pub mod flow;
pub mod node;
pub mod session;

pub use edge::{Edge, EdgeId, Relation};
pub use finding::{Finding, FindingId, Severity};
pub use flow::{Flow, FlowId};
pub use node::{Layer, Node, NodeId, RecordStatus};
pub use session::{Session, SessionId};
