//! Optional write-through to a secondary graph backend.
//!
//! The SQLite graph is authoritative. A mirror sees edges, new and superseded, only
//! after they are committed, and whatever it returns is logged, never propagated.

use async_trait::async_trait;

use super::types::GraphEdge;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("mirror backend unavailable: {0}")]
    Unavailable(String),
    #[error("mirror rejected edge {edge_id}: {reason}")]
    Rejected { edge_id: String, reason: String },
}

#[async_trait]
pub trait GraphMirror: Send + Sync {
    /// Replicate committed edge changes for one owner. Superseded edges
    /// arrive with their `valid_until` set; new edges are active.
    async fn mirror_edges(&self, owner: &str, edges: &[GraphEdge]) -> Result<(), MirrorError>;
}

/// Push committed edges to the mirror, if any. Failures are logged.
pub async fn mirror_after_commit(mirror: Option<&dyn GraphMirror>, owner: &str, edges: &[GraphEdge]) {
    let Some(mirror) = mirror else {
        return;
    };
    if edges.is_empty() {
        return;
    }
    match mirror.mirror_edges(owner, edges).await {
        Ok(()) => tracing::debug!(owner = %owner, edges = edges.len(), "graph mirror synced"),
        Err(e) => tracing::warn!(owner = %owner, edges = edges.len(), error = %e, "graph mirror sync failed"),
    }
}
