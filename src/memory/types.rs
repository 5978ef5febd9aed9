//! Core memory type definitions.
//!
//! Defines [`MemoryType`] (the type tag every record carries) and [`Memory`]
//! (a full record as returned by the store, without its vector).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Anything added directly without a more specific tag.
    General,
    /// Persistent attribute extracted from conversation.
    Fact,
    Preference,
    /// A dated event or experience.
    Episodic,
    Document,
    /// Higher-level pattern synthesized by reflection.
    Insight,
    /// Graph triple rendered as text in merged recall results.
    GraphFact,
}

impl MemoryType {
    pub const ALL: [MemoryType; 7] = [
        Self::General,
        Self::Fact,
        Self::Preference,
        Self::Episodic,
        Self::Document,
        Self::Insight,
        Self::GraphFact,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Episodic => "episodic",
            Self::Document => "document",
            Self::Insight => "insight",
            Self::GraphFact => "graph_fact",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown memory type: {s}"))
    }
}

/// A memory record, matching the `memories` table minus the embedding BLOB.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    /// JSON object; may carry `importance`, `emotion`, `category`, `timestamp`.
    pub metadata: serde_json::Value,
    /// When the described event happened, if known. RFC 3339.
    pub extracted_timestamp: Option<String>,
    pub access_count: u32,
    pub last_accessed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
