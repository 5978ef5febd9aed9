use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::graph::store::graph_counts;

/// Response from memory_stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_memories: u64,
    pub by_type: BTreeMap<String, u64>,
    pub graph_nodes: u64,
    pub graph_edges: u64,
    pub active_edges: u64,
    pub conversation_turns: u64,
    pub unextracted_turns: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_memory: Option<String>,
}

/// Per-owner statistics. `db_path` is only used for the file size; pass
/// `None` for in-memory databases.
pub fn memory_stats(conn: &Connection, owner: &str, db_path: Option<&Path>) -> Result<StatsResponse> {
    let by_type = count_by_type(conn, owner)?;
    let (oldest, newest) = memory_time_range(conn, owner)?;
    let (nodes, edges, active) = graph_counts(conn, owner)?;
    let (turns, unextracted): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(extracted = 0), 0) FROM conversations WHERE user_id = ?1",
        params![owner],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_memories: by_type.values().sum(),
        by_type,
        graph_nodes: nodes as u64,
        graph_edges: edges as u64,
        active_edges: active as u64,
        conversation_turns: turns as u64,
        unextracted_turns: unextracted as u64,
        db_size_bytes,
        oldest_memory: oldest,
        newest_memory: newest,
    })
}

fn count_by_type(conn: &Connection, owner: &str) -> Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare(
        "SELECT memory_type, COUNT(*) FROM memories WHERE user_id = ?1 GROUP BY memory_type",
    )?;
    let rows = stmt
        .query_map(params![owner], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(rows)
}

fn memory_time_range(conn: &Connection, owner: &str) -> Result<(Option<String>, Option<String>)> {
    Ok(conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM memories WHERE user_id = ?1",
        params![owner],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}
