//! Write path and plain reads for memory records.
//!
//! Every function takes a borrowed connection (a [`rusqlite::Transaction`]
//! derefs to one) so callers decide the transaction boundary. Embeddings are
//! computed by the caller before the connection is entered. The FTS index is
//! maintained by triggers, so nothing here touches `memories_fts`.
//!
//! None of these reads touch access counters; only ranked recall does.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

use super::types::{Memory, MemoryType};
use super::{embedding_to_bytes, format_timestamp, now_timestamp, parse_timestamp};
use crate::error::{MemoryError, Result};

pub(crate) const MEMORY_COLUMNS: &str = "id, user_id, content, memory_type, metadata, \
     extracted_timestamp, access_count, last_accessed_at, created_at, updated_at";

/// Input for [`insert_memory`].
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub metadata: Value,
    /// Event time. When `None`, `metadata.timestamp` is used if it parses.
    pub extracted_timestamp: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>, memory_type: MemoryType) -> Self {
        Self {
            user_id: user_id.into(),
            content: content.into(),
            memory_type,
            metadata: json!({}),
            extracted_timestamp: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn event_time(&self) -> Option<String> {
        self.extracted_timestamp
            .or_else(|| metadata_timestamp(&self.metadata))
            .map(format_timestamp)
    }
}

/// Partial edit for [`update_memory`]. `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub metadata: Option<Value>,
}

/// Read `metadata.timestamp` as RFC 3339 or a bare date.
fn metadata_timestamp(metadata: &Value) -> Option<DateTime<Utc>> {
    let raw = metadata.get("timestamp")?.as_str()?;
    parse_timestamp(raw).or_else(|| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN).and_utc())
    })
}

pub(crate) fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let type_str: String = row.get(3)?;
    let memory_type = type_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    let metadata: Option<String> = row.get(4)?;
    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        memory_type,
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_else(|| json!({})),
        extracted_timestamp: row.get(5)?,
        access_count: row.get(6)?,
        last_accessed_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Insert one record with its precomputed embedding.
pub fn insert_memory(conn: &Connection, new: &NewMemory, embedding: &[f32]) -> Result<Memory> {
    if new.content.trim().is_empty() {
        return Err(MemoryError::validation("memory content must not be empty"));
    }
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_timestamp();

    conn.execute(
        "INSERT INTO memories (id, user_id, content, memory_type, embedding, metadata, \
         extracted_timestamp, access_count, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
        params![
            id,
            new.user_id,
            new.content,
            new.memory_type.as_str(),
            embedding_to_bytes(embedding),
            serde_json::to_string(&new.metadata)?,
            new.event_time(),
            now,
        ],
    )?;

    tracing::debug!(id = %id, owner = %new.user_id, memory_type = %new.memory_type, "memory stored");

    Ok(Memory {
        id,
        user_id: new.user_id.clone(),
        content: new.content.clone(),
        memory_type: new.memory_type,
        metadata: new.metadata.clone(),
        extracted_timestamp: new.event_time(),
        access_count: 0,
        last_accessed_at: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Fetch one record. Records of other owners are `None`.
pub fn get_memory(conn: &Connection, id: &str, owner: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1 AND user_id = ?2");
    Ok(conn
        .query_row(&sql, params![id, owner], row_to_memory)
        .optional()?)
}

/// Apply a partial edit.
///
/// `new_embedding` must accompany a content change; when it is `None` the old
/// vector stays and a warning is logged. Missing or foreign records are
/// [`MemoryError::NotFound`].
pub fn update_memory(
    conn: &Connection,
    id: &str,
    owner: &str,
    update: &MemoryUpdate,
    new_embedding: Option<&[f32]>,
) -> Result<Memory> {
    let current = get_memory(conn, id, owner)?.ok_or_else(|| MemoryError::not_found("memory", id))?;

    if let Some(content) = &update.content {
        if content.trim().is_empty() {
            return Err(MemoryError::validation(format!("memory {id}: content must not be empty")));
        }
    }

    let content_changed = update
        .content
        .as_deref()
        .is_some_and(|c| c != current.content);
    if content_changed && new_embedding.is_none() {
        tracing::warn!(id = %id, "content changed without a new embedding; keeping stale vector");
    }

    let metadata = update.metadata.as_ref().unwrap_or(&current.metadata);
    let extracted_timestamp = match &update.metadata {
        Some(m) => metadata_timestamp(m).map(format_timestamp).or(current.extracted_timestamp.clone()),
        None => current.extracted_timestamp.clone(),
    };
    let now = now_timestamp();

    conn.execute(
        "UPDATE memories SET content = ?1, memory_type = ?2, metadata = ?3, \
         extracted_timestamp = ?4, updated_at = ?5 WHERE id = ?6 AND user_id = ?7",
        params![
            update.content.as_deref().unwrap_or(&current.content),
            update.memory_type.unwrap_or(current.memory_type).as_str(),
            serde_json::to_string(metadata)?,
            extracted_timestamp,
            now,
            id,
            owner,
        ],
    )?;

    if let (true, Some(embedding)) = (content_changed, new_embedding) {
        conn.execute(
            "UPDATE memories SET embedding = ?1 WHERE id = ?2",
            params![embedding_to_bytes(embedding), id],
        )?;
    }

    get_memory(conn, id, owner)?.ok_or_else(|| MemoryError::not_found("memory", id))
}

/// Delete one record. `false` when it does not exist or belongs to someone else.
pub fn delete_memory(conn: &Connection, id: &str, owner: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM memories WHERE id = ?1 AND user_id = ?2",
        params![id, owner],
    )?;
    Ok(rows > 0)
}

/// Delete every record of one owner. Returns the number removed.
pub fn delete_all(conn: &Connection, owner: &str) -> Result<usize> {
    let rows = conn.execute("DELETE FROM memories WHERE user_id = ?1", params![owner])?;
    tracing::info!(owner = %owner, removed = rows, "memories cleared");
    Ok(rows)
}

/// `WHERE` clause plus positional values, shared by count and page queries.
struct Filter {
    clauses: Vec<String>,
    values: Vec<SqlValue>,
}

impl Filter {
    fn owner(owner: &str) -> Self {
        Self {
            clauses: vec!["user_id = ?".to_string()],
            values: vec![SqlValue::Text(owner.to_string())],
        }
    }

    fn push(&mut self, clause: &str, value: impl Into<SqlValue>) {
        self.clauses.push(clause.to_string());
        self.values.push(value.into());
    }

    fn types(&mut self, types: &[MemoryType]) {
        if types.is_empty() {
            return;
        }
        let placeholders = vec!["?"; types.len()].join(", ");
        self.clauses.push(format!("memory_type IN ({placeholders})"));
        self.values
            .extend(types.iter().map(|t| SqlValue::Text(t.as_str().to_string())));
    }

    fn where_sql(&self) -> String {
        self.clauses.join(" AND ")
    }

    fn count(&self, conn: &Connection) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM memories WHERE {}", self.where_sql());
        Ok(conn.query_row(&sql, params_from_iter(self.values.iter()), |row| row.get(0))?)
    }

    fn page(&self, conn: &Connection, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE {} \
             ORDER BY created_at DESC LIMIT {} OFFSET {}",
            self.where_sql(),
            limit,
            offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(self.values.iter()), row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// Page through one owner's records, newest first. Returns `(total, page)`.
pub fn list_memories(
    conn: &Connection,
    owner: &str,
    memory_type: Option<MemoryType>,
    limit: usize,
    offset: usize,
) -> Result<(i64, Vec<Memory>)> {
    let mut filter = Filter::owner(owner);
    filter.types(memory_type.as_slice());
    Ok((filter.count(conn)?, filter.page(conn, limit, offset)?))
}

/// Records created in `[start, end)`, newest first. `end` defaults to now.
pub fn get_by_time_range(
    conn: &Connection,
    owner: &str,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    memory_type: Option<MemoryType>,
    limit: usize,
    offset: usize,
) -> Result<(i64, Vec<Memory>)> {
    let end = end.unwrap_or_else(Utc::now);
    if start >= end {
        return Err(MemoryError::validation(format!(
            "time range start {} must be before end {}",
            format_timestamp(start),
            format_timestamp(end)
        )));
    }

    let mut filter = Filter::owner(owner);
    filter.push("created_at >= ?", format_timestamp(start));
    filter.push("created_at < ?", format_timestamp(end));
    filter.types(memory_type.as_slice());
    Ok((filter.count(conn)?, filter.page(conn, limit, offset)?))
}

/// Records created in the last `days` days, optionally restricted to `types`.
pub fn get_recent(
    conn: &Connection,
    owner: &str,
    days: u32,
    types: &[MemoryType],
    limit: usize,
) -> Result<Vec<Memory>> {
    if days == 0 {
        return Err(MemoryError::validation("days must be at least 1"));
    }
    let since = Utc::now() - TimeDelta::days(i64::from(days));

    let mut filter = Filter::owner(owner);
    filter.push("created_at >= ?", format_timestamp(since));
    filter.types(types);
    filter.page(conn, limit, 0)
}
