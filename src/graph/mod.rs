//! Entity/relation graph with soft temporal versioning of edges.

pub mod mirror;
pub mod store;
pub mod types;

pub use mirror::{GraphMirror, MirrorError};
pub use store::{resolve_conflict, ConflictAction, StoredTriples};
pub use types::{EdgeType, EntityFact, GraphEdge, GraphNode, NodeRef, NodeType, Triple};
