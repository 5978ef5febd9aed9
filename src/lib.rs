//! Long-term memory for conversational agents.
//!
//! neuromem keeps, per owner, a store of embedded memories, a temporal
//! knowledge graph of entity relations, a key-value store for preferences and
//! profile fields, and the raw conversation log. An LLM turns conversation
//! turns into memories and triples; a reflection pass turns memories into
//! insights and an emotion profile.
//!
//! | Type | Source | Notes |
//! |------|--------|-------|
//! | **fact** | extraction | persistent attributes |
//! | **episodic** | extraction | dated events, carries an event time |
//! | **insight** | reflection | patterns across memories |
//! | **general** | direct add | anything else |
//!
//! Recall ranks candidates by `relevance × recency × importance`, boosts the
//! ones that mention entities the graph knows about, and merges in graph facts.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with FTS5 for keyword search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for cosine distance
//! - **Embeddings**: local ONNX Runtime or any OpenAI-compatible endpoint
//! - **Extraction**: OpenAI-compatible chat completions, scheduled by [`trigger`]
//! - **Transport**: MCP over stdio or Streamable HTTP
//!
//! # Modules
//!
//! - [`engine`]: the [`NeuroMemory`] facade every front-end goes through
//! - [`memory`]: memory records, scoring, search, recall, conversations, key-value
//! - [`graph`]: nodes, edges, conflict resolution and traversal
//! - [`extraction`], [`reflection`], [`trigger`]: the LLM pipeline

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod reflection;
pub mod trigger;

#[cfg(test)]
mod test_support;

pub use engine::{AppendOutcome, EngineParts, NeuroMemory};
pub use error::{MemoryError, Result};
