//! Error taxonomy for the memory core.
//!
//! Library operations return [`Result`]. Transient provider failures arrive as
//! [`MemoryError::Embedding`] or [`MemoryError::Llm`]; integrity violations are
//! [`MemoryError::Validation`] or [`MemoryError::NotFound`] and always name the
//! offending identifier. Records owned by someone else are reported as not found.

use crate::embedding::EmbeddingError;
use crate::llm::LlmError;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Internal(String),
}

impl MemoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for failures of an external collaborator that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::Llm(_))
    }
}
