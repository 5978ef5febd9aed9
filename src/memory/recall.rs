//! Fusion of ranked vector results with graph facts.
//!
//! The async orchestration lives on the engine; this module holds the pure
//! parts: graph boosting, merge with content dedup, and the graph lookup run
//! inside one connection closure.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use super::search::ScoredMemory;
use super::types::MemoryType;
use crate::error::Result;
use crate::graph::store::find_entity_facts;
use crate::graph::EntityFact;

/// Added to the boost when a result mentions both ends of a fact.
pub const GRAPH_BOOST_BOTH: f64 = 0.5;
/// Added when a result mentions one end of a fact.
pub const GRAPH_BOOST_ONE: f64 = 0.2;
/// Ceiling on the boosted multiplier.
pub const GRAPH_BOOST_MAX: f64 = 2.0;

#[derive(Debug, Clone, Default)]
pub struct RecallOptions {
    /// `None` uses the configured default; `Some(0)` recalls nothing.
    pub limit: Option<usize>,
    /// Seconds; `None` uses the configured rate.
    pub decay_rate: Option<f64>,
    pub memory_type: Option<MemoryType>,
    pub event_after: Option<DateTime<Utc>>,
    pub event_before: Option<DateTime<Utc>>,
}

impl RecallOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Vector,
    Graph,
}

/// One entry of the merged list.
#[derive(Debug, Clone, Serialize)]
pub struct RecallItem {
    /// Memory id; `None` for graph facts.
    pub id: Option<String>,
    pub content: String,
    pub memory_type: MemoryType,
    pub score: f64,
    pub source: ResultSource,
    pub metadata: Value,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecallResult {
    pub vector_results: Vec<ScoredMemory>,
    pub graph_results: Vec<EntityFact>,
    pub merged: Vec<RecallItem>,
}

/// Facts about the query text and about the owner's own node, deduplicated.
pub fn collect_graph_facts(conn: &Connection, owner: &str, query: &str, limit: usize) -> Result<Vec<EntityFact>> {
    let mut facts = find_entity_facts(conn, owner, query, limit)?;
    facts.extend(find_entity_facts(conn, owner, owner, limit)?);

    let mut seen = HashSet::new();
    facts.retain(|f| seen.insert(f.content.clone()));
    Ok(facts)
}

fn mentions(content: &str, node_id: &str) -> bool {
    let needle = node_id.replace('_', " ").to_lowercase();
    !needle.trim().is_empty() && content.contains(&needle)
}

/// Multiplier for one result: `1 + Σ boosts`, capped at [`GRAPH_BOOST_MAX`].
pub fn graph_boost(content: &str, facts: &[EntityFact]) -> f64 {
    let content = content.to_lowercase();
    let boost: f64 = facts
        .iter()
        .map(|f| match (mentions(&content, &f.subject), mentions(&content, &f.object)) {
            (true, true) => GRAPH_BOOST_BOTH,
            (true, false) | (false, true) => GRAPH_BOOST_ONE,
            (false, false) => 0.0,
        })
        .sum();
    (1.0 + boost).min(GRAPH_BOOST_MAX)
}

/// Scale scores by [`graph_boost`] and re-sort, best first.
pub fn apply_graph_boost(results: &mut [ScoredMemory], facts: &[EntityFact]) {
    if facts.is_empty() {
        return;
    }
    for r in results.iter_mut() {
        r.score *= graph_boost(&r.memory.content, facts);
    }
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

/// Vector results first, then graph facts; the first occurrence of each
/// content string wins and the list is cut at `limit`.
pub fn merge_results(vector: &[ScoredMemory], graph: &[EntityFact], limit: usize) -> Vec<RecallItem> {
    let vector_items = vector.iter().map(|r| RecallItem {
        id: Some(r.memory.id.clone()),
        content: r.memory.content.clone(),
        memory_type: r.memory.memory_type,
        score: r.score,
        source: ResultSource::Vector,
        metadata: r.memory.metadata.clone(),
        created_at: Some(r.memory.created_at.clone()),
    });
    let graph_items = graph.iter().map(|f| RecallItem {
        id: None,
        content: f.content.clone(),
        memory_type: MemoryType::GraphFact,
        score: f.confidence,
        source: ResultSource::Graph,
        metadata: serde_json::json!({
            "subject": f.subject,
            "relation": f.relation,
            "object": f.object,
            "valid_from": f.valid_from,
        }),
        created_at: None,
    });

    let mut seen = HashSet::new();
    vector_items
        .chain(graph_items)
        .filter(|item| seen.insert(item.content.clone()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;
    use crate::memory::types::Memory;
    use serde_json::json;

    fn scored(id: &str, content: &str, score: f64) -> ScoredMemory {
        ScoredMemory {
            memory: Memory {
                id: id.into(),
                user_id: "alice".into(),
                content: content.into(),
                memory_type: MemoryType::Fact,
                metadata: json!({}),
                extracted_timestamp: None,
                access_count: 0,
                last_accessed_at: None,
                created_at: "2024-01-01T00:00:00.000000Z".into(),
                updated_at: "2024-01-01T00:00:00.000000Z".into(),
            },
            relevance: score,
            recency: 1.0,
            importance: 1.0,
            score,
        }
    }

    fn fact(subject: &str, relation: &str, object: &str) -> EntityFact {
        EntityFact {
            subject: subject.into(),
            subject_type: NodeType::User,
            relation: relation.into(),
            object: object.into(),
            object_type: NodeType::Organization,
            content: format!("{subject} → {relation}: {object}"),
            confidence: 0.8,
            valid_from: "2024-01-01T00:00:00.000000Z".into(),
        }
    }

    #[test]
    fn boost_rewards_mentions_and_caps() {
        let facts = [fact("alice", "works_at", "google")];
        assert_eq!(graph_boost("Alice joined Google", &facts), 1.5);
        assert_eq!(graph_boost("Google is big", &facts), 1.2);
        assert_eq!(graph_boost("weather is nice", &facts), 1.0);

        let many: Vec<_> = (0..5).map(|_| fact("alice", "works_at", "google")).collect();
        assert_eq!(graph_boost("alice at google", &many), GRAPH_BOOST_MAX);
    }

    #[test]
    fn boost_resorts_vector_results() {
        let mut results = vec![scored("a", "weather is nice", 0.5), scored("b", "I work at Google", 0.4)];
        apply_graph_boost(&mut results, &[fact("alice", "works_at", "google")]);
        assert_eq!(results[0].memory.id, "b");
        assert!((results[0].score - 0.48).abs() < 1e-9);
    }

    #[test]
    fn merge_dedups_and_limits() {
        let vector = vec![
            scored("a", "alice → works_at: google", 0.9),
            scored("b", "likes tea", 0.8),
            scored("c", "likes tea", 0.7),
        ];
        let graph = vec![fact("alice", "works_at", "google"), fact("alice", "lives_in", "paris")];

        let merged = merge_results(&vector, &graph, 10);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].source, ResultSource::Vector);
        assert_eq!(merged[2].content, "alice → lives_in: paris");
        assert_eq!(merged[2].source, ResultSource::Graph);
        assert_eq!(merged[2].memory_type, MemoryType::GraphFact);
        assert_eq!(merged[2].score, 0.8);

        assert_eq!(merge_results(&vector, &graph, 2).len(), 2);
        assert!(merge_results(&vector, &graph, 0).is_empty());
    }
}
