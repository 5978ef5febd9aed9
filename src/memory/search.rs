use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::collections::HashMap;

use super::scoring::{self, ScoreBreakdown};
use super::store::{row_to_memory, MEMORY_COLUMNS};
use super::types::{Memory, MemoryType};
use super::{embedding_to_bytes, format_timestamp, now_timestamp, parse_timestamp};
use crate::error::Result;

// ── Public types ──────────────────────────────────────────────────────────────

/// A record ranked by the three-factor score, with each factor exposed.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub relevance: f64,
    pub recency: f64,
    pub importance: f64,
    pub score: f64,
}

impl ScoredMemory {
    fn new(memory: Memory, breakdown: ScoreBreakdown) -> Self {
        Self {
            memory,
            relevance: breakdown.relevance,
            recency: breakdown.recency,
            importance: breakdown.importance,
            score: breakdown.score,
        }
    }
}

/// Parameters of one ranked read.
#[derive(Debug, Clone)]
pub struct ScoredQuery<'a> {
    pub owner: &'a str,
    pub embedding: &'a [f32],
    pub limit: usize,
    pub memory_type: Option<MemoryType>,
    pub decay_rate: f64,
    /// Only records whose event time is at or after this instant.
    pub event_after: Option<DateTime<Utc>>,
    /// Only records whose event time is before this instant.
    pub event_before: Option<DateTime<Utc>>,
}

/// A hybrid keyword+vector hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f64,
}

// ── Ranked recall ─────────────────────────────────────────────────────────────

/// Rank one owner's memories by `relevance × recency × importance`.
///
/// The nearest `limit × candidate_multiplier` records by cosine distance are
/// scored and the best `limit` returned. Returned records have their access
/// counters bumped; a failure there is logged and otherwise ignored.
pub fn scored_search(
    conn: &Connection,
    query: &ScoredQuery<'_>,
    candidate_multiplier: usize,
) -> Result<Vec<ScoredMemory>> {
    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let mut values: Vec<SqlValue> = vec![
        SqlValue::Blob(embedding_to_bytes(query.embedding)),
        SqlValue::Text(query.owner.to_string()),
    ];
    let mut clauses = vec!["user_id = ?2".to_string()];
    let mut bind = |clause: &str, value: String| {
        values.push(SqlValue::Text(value));
        clauses.push(format!("{clause} ?{}", values.len()));
    };
    if let Some(t) = query.memory_type {
        bind("memory_type =", t.as_str().to_string());
    }
    if let Some(after) = query.event_after {
        bind("extracted_timestamp >=", format_timestamp(after));
    }
    if let Some(before) = query.event_before {
        bind("extracted_timestamp <", format_timestamp(before));
    }

    let pool = query.limit.saturating_mul(candidate_multiplier.max(1));
    let where_sql = clauses.join(" AND ");
    let sql = format!(
        "SELECT {MEMORY_COLUMNS}, vec_distance_cosine(embedding, ?1) AS distance \
         FROM memories WHERE {where_sql} ORDER BY distance LIMIT {pool}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let candidates = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok((row_to_memory(row)?, row.get::<_, f64>(10)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let now = Utc::now();
    let mut ranked: Vec<ScoredMemory> = candidates
        .into_iter()
        .map(|(memory, distance)| {
            let age_secs = parse_timestamp(&memory.created_at)
                .map(|created| (now - created).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0);
            let breakdown = scoring::score(
                scoring::relevance_from_distance(distance),
                age_secs,
                query.decay_rate,
                &memory.metadata,
            );
            ScoredMemory::new(memory, breakdown)
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(query.limit);

    let ids: Vec<&str> = ranked.iter().map(|m| m.memory.id.as_str()).collect();
    if let Err(e) = update_access(conn, &ids) {
        tracing::warn!(error = %e, owner = %query.owner, "access tracking failed");
    }

    Ok(ranked)
}

// ── Hybrid keyword + vector search ────────────────────────────────────────────

/// Vector KNN plus FTS5 BM25, fused with Reciprocal Rank Fusion.
///
/// Restricted to `owner`; does not touch access counters.
pub fn hybrid_search(
    conn: &Connection,
    owner: &str,
    embedding: &[f32],
    query_text: &str,
    limit: usize,
    memory_type: Option<MemoryType>,
    rrf_k: usize,
) -> Result<Vec<SearchHit>> {
    let candidate_limit = limit * 3;

    let vec_results = vector_search(conn, owner, embedding, candidate_limit)?;
    let fts_results = fts_search(conn, owner, query_text, candidate_limit)?;
    let merged = rrf_merge(&vec_results, &fts_results, rrf_k);

    let candidate_ids: Vec<&str> = merged.iter().map(|(id, _)| id.as_str()).collect();
    let mut memories = fetch_memories(conn, owner, &candidate_ids)?;

    let hits = merged
        .into_iter()
        .filter_map(|(id, score)| memories.remove(&id).map(|memory| SearchHit { memory, score }))
        .filter(|hit| memory_type.is_none_or(|t| hit.memory.memory_type == t))
        .take(limit)
        .collect();
    Ok(hits)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Nearest records of one owner by cosine distance.
fn vector_search(
    conn: &Connection,
    owner: &str,
    embedding: &[f32],
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, vec_distance_cosine(embedding, ?1) AS distance FROM memories \
         WHERE user_id = ?2 ORDER BY distance LIMIT ?3",
    )?;
    let results = stmt
        .query_map(params![embedding_to_bytes(embedding), owner, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(results)
}

/// FTS5 BM25 keyword search. Returns `(id, rank)`; lower rank is better.
fn fts_search(
    conn: &Connection,
    owner: &str,
    query_text: &str,
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let escaped = escape_fts_query(query_text);
    if escaped.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT id, rank FROM memories_fts \
         WHERE memories_fts MATCH ?1 AND user_id = ?2 ORDER BY rank LIMIT ?3",
    )?;
    let results = stmt
        .query_map(params![escaped, owner, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(results)
}

/// Quote each whitespace-delimited word so FTS5 treats it as a plain term
/// (implicit AND).
pub(crate) fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "")))
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reciprocal Rank Fusion: each list contributes `1 / (k + rank)` per id,
/// with ranks starting at 1.
fn rrf_merge(
    vec_results: &[(String, f64)],
    fts_results: &[(String, f64)],
    k: usize,
) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in [vec_results, fts_results] {
        for (rank, (id, _)) in list.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k as f64 + (rank + 1) as f64);
        }
    }

    let mut merged: Vec<(String, f64)> = scores.into_iter().collect();
    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    merged
}

/// Batch-fetch one owner's records by id.
fn fetch_memories(conn: &Connection, owner: &str, ids: &[&str]) -> Result<HashMap<String, Memory>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (2..ids.len() + 2).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ?1 AND id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params = std::iter::once(owner).chain(ids.iter().copied());
    let rows = stmt
        .query_map(params_from_iter(params), row_to_memory)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows.into_iter().map(|m| (m.id.clone(), m)).collect())
}

/// Bump `access_count` and `last_accessed_at` for the given records.
pub(crate) fn update_access(conn: &Connection, ids: &[&str]) -> rusqlite::Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let now = now_timestamp();
    let mut stmt = conn.prepare(
        "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
    )?;
    for id in ids {
        stmt.execute(params![now, id])?;
    }
    Ok(())
}

/// Truncate to `max_chars` characters, appending "..." if anything was cut.
pub fn truncate_preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::scoring::DEFAULT_DECAY_RATE_SECS;
    use crate::memory::store::{insert_memory, NewMemory};
    use crate::test_support::{axis, blend, test_conn};
    use chrono::TimeDelta;
    use serde_json::json;

    fn add(conn: &Connection, owner: &str, content: &str, metadata: serde_json::Value, emb: &[f32]) -> String {
        let new = NewMemory::new(owner, content, MemoryType::Fact).with_metadata(metadata);
        insert_memory(conn, &new, emb).unwrap().id
    }

    fn query<'a>(owner: &'a str, embedding: &'a [f32], limit: usize) -> ScoredQuery<'a> {
        ScoredQuery {
            owner,
            embedding,
            limit,
            memory_type: None,
            decay_rate: DEFAULT_DECAY_RATE_SECS,
            event_after: None,
            event_before: None,
        }
    }

    #[test]
    fn importance_breaks_relevance_ties() {
        let conn = test_conn();
        let low = add(&conn, "alice", "low", json!({"importance": 2}), &axis(0));
        let high = add(&conn, "alice", "high", json!({"importance": 9}), &axis(0));

        let results = scored_search(&conn, &query("alice", &axis(0), 10), 4).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.id, high);
        assert_eq!(results[1].memory.id, low);
        assert!((results[0].relevance - 1.0).abs() < 1e-6);
        assert!((results[0].importance - 0.9).abs() < 1e-9);
        assert!(results[0].recency > 0.99);
    }

    #[test]
    fn relevance_dominates_when_importance_equal() {
        let conn = test_conn();
        let far = add(&conn, "alice", "far", json!({}), &axis(5));
        let near = add(&conn, "alice", "near", json!({}), &blend(0, 1, 0.9));

        let results = scored_search(&conn, &query("alice", &axis(0), 10), 4).unwrap();
        assert_eq!(results[0].memory.id, near);
        assert_eq!(results[1].memory.id, far);
        assert_eq!(results[1].relevance, 0.0);
    }

    #[test]
    fn results_are_owner_scoped_and_limited() {
        let conn = test_conn();
        for i in 0..4 {
            add(&conn, "alice", &format!("a{i}"), json!({}), &axis(i));
        }
        add(&conn, "bob", "b", json!({}), &axis(0));

        let results = scored_search(&conn, &query("alice", &axis(0), 2), 4).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.memory.user_id == "alice"));
    }

    #[test]
    fn access_is_tracked_on_returned_rows() {
        let conn = test_conn();
        let id = add(&conn, "alice", "tracked", json!({}), &axis(0));

        scored_search(&conn, &query("alice", &axis(0), 5), 4).unwrap();
        scored_search(&conn, &query("alice", &axis(0), 5), 4).unwrap();

        let (count, last): (u32, Option<String>) = conn
            .query_row(
                "SELECT access_count, last_accessed_at FROM memories WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 2);
        assert!(last.is_some());
    }

    #[test]
    fn event_window_filters_on_event_time() {
        let conn = test_conn();
        let may = add(&conn, "alice", "may trip", json!({"timestamp": "2023-05-07"}), &axis(0));
        add(&conn, "alice", "july trip", json!({"timestamp": "2023-07-01"}), &axis(0));
        add(&conn, "alice", "undated", json!({}), &axis(0));

        let v = axis(0);
        let mut q = query("alice", &v, 10);
        q.event_after = Some("2023-05-01T00:00:00Z".parse().unwrap());
        q.event_before = Some("2023-06-01T00:00:00Z".parse().unwrap());
        let results = scored_search(&conn, &q, 4).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, may);
    }

    #[test]
    fn old_memories_decay() {
        let conn = test_conn();
        let old = add(&conn, "alice", "old", json!({}), &axis(0));
        let new = add(&conn, "alice", "new", json!({}), &axis(0));
        let long_ago = format_timestamp(Utc::now() - TimeDelta::days(90));
        conn.execute("UPDATE memories SET created_at = ?1 WHERE id = ?2", params![long_ago, old])
            .unwrap();

        let results = scored_search(&conn, &query("alice", &axis(0), 10), 4).unwrap();
        assert_eq!(results[0].memory.id, new);
        assert!(results[1].recency < 0.06);
    }

    #[test]
    fn hybrid_search_fuses_keyword_and_vector() {
        let conn = test_conn();
        let keyword = add(&conn, "alice", "quantum computing notes", json!({}), &axis(7));
        let vector = add(&conn, "alice", "unrelated words", json!({}), &axis(0));
        add(&conn, "bob", "quantum secrets", json!({}), &axis(0));

        let hits = hybrid_search(&conn, "alice", &axis(0), "quantum", 5, None, 60).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.memory.id.as_str()).collect();
        assert!(ids.contains(&keyword.as_str()));
        assert!(ids.contains(&vector.as_str()));
        assert!(hits.iter().all(|h| h.memory.user_id == "alice"));

        let count: i64 = conn
            .query_row("SELECT SUM(access_count) FROM memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn rrf_rewards_agreement() {
        let vec_results = vec![("a".to_string(), 0.1), ("b".to_string(), 0.2)];
        let fts_results = vec![("b".to_string(), -3.0), ("c".to_string(), -1.0)];
        let merged = rrf_merge(&vec_results, &fts_results, 60);
        assert_eq!(merged[0].0, "b");
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn rrf_ranks_start_at_one() {
        let vec_results = vec![("a".to_string(), 0.1), ("b".to_string(), 0.2)];
        let merged = rrf_merge(&vec_results, &[], 60);
        assert!((merged[0].1 - 1.0 / 61.0).abs() < 1e-12);
        assert!((merged[1].1 - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn fts_query_escaping() {
        assert_eq!(escape_fts_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(escape_fts_query("say \"hi\""), "\"say\" \"hi\"");
        assert_eq!(escape_fts_query("   "), "");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("我在谷歌工作", 2), "我在...");
    }
}
