//! Conversation turns and per-session bookkeeping.
//!
//! Turns are append-only. The only mutation is flipping `extracted`, which is
//! the idempotency guard for extraction: a turn is handed to the extractor
//! only while it is still unextracted.

use std::collections::HashSet;

use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::now_timestamp;
use crate::error::{MemoryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub metadata: Option<Value>,
    pub extracted: bool,
    pub extraction_task_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    pub session_id: String,
    pub message_count: i64,
    pub metadata: Option<Value>,
    pub created_at: String,
    pub last_message_at: String,
    pub closed_at: Option<String>,
}

const TURN_COLUMNS: &str =
    "id, user_id, session_id, role, content, metadata, extracted, extraction_task_id, created_at";

fn row_to_turn(row: &Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let role: String = row.get(3)?;
    let metadata: Option<String> = row.get(5)?;
    Ok(ConversationTurn {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        role: role.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        content: row.get(4)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        extracted: row.get(6)?,
        extraction_task_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionInfo> {
    let metadata: Option<String> = row.get(3)?;
    Ok(SessionInfo {
        user_id: row.get(0)?,
        session_id: row.get(1)?,
        message_count: row.get(2)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(4)?,
        last_message_at: row.get(5)?,
        closed_at: row.get(6)?,
    })
}

pub fn new_session_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{}", &hex[..16])
}

/// Store one turn and bump its session row. A missing `session_id` starts a new session.
pub fn append_message(
    conn: &Connection,
    owner: &str,
    session_id: Option<&str>,
    role: Role,
    content: &str,
    metadata: Option<&Value>,
) -> Result<ConversationTurn> {
    if content.trim().is_empty() {
        return Err(MemoryError::validation("message content must not be empty"));
    }
    let session_id = session_id.map_or_else(new_session_id, str::to_string);
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_timestamp();
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO conversations (id, user_id, session_id, role, content, metadata, extracted, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![id, owner, session_id, role.as_str(), content, metadata_json, now],
    )?;
    conn.execute(
        "INSERT INTO conversation_sessions (user_id, session_id, message_count, created_at, last_message_at) \
         VALUES (?1, ?2, 1, ?3, ?3) \
         ON CONFLICT(user_id, session_id) DO UPDATE SET \
         message_count = message_count + 1, last_message_at = excluded.last_message_at, closed_at = NULL",
        params![owner, session_id, now],
    )?;

    Ok(ConversationTurn {
        id,
        user_id: owner.to_string(),
        session_id,
        role,
        content: content.to_string(),
        metadata: metadata.cloned(),
        extracted: false,
        extraction_task_id: None,
        created_at: now,
    })
}

/// Unextracted turns in append order, optionally for one session.
pub fn get_unextracted(
    conn: &Connection,
    owner: &str,
    session_id: Option<&str>,
    limit: usize,
) -> Result<Vec<ConversationTurn>> {
    let sql = format!(
        "SELECT {TURN_COLUMNS} FROM conversations \
         WHERE user_id = ?1 AND extracted = 0 AND (?2 IS NULL OR session_id = ?2) \
         ORDER BY created_at, rowid LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![owner, session_id, limit as i64], row_to_turn)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Ids among `ids` that belong to `owner` and are still unextracted.
pub fn pending_ids(conn: &Connection, owner: &str, ids: &[String]) -> Result<HashSet<String>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT id FROM conversations WHERE user_id = ? AND extracted = 0 AND id IN ({placeholders})"
    );
    let values = std::iter::once(owner).chain(ids.iter().map(String::as_str));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;
    Ok(rows)
}

/// Flag the owner's turns as extracted under one task id. Returns the number
/// flipped; turns of other owners and already extracted turns are untouched.
pub fn mark_extracted(conn: &Connection, owner: &str, ids: &[String], task_id: &str) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "UPDATE conversations SET extracted = 1, extraction_task_id = ? \
         WHERE user_id = ? AND extracted = 0 AND id IN ({placeholders})"
    );
    let values = [task_id, owner].into_iter().chain(ids.iter().map(String::as_str));
    Ok(conn.execute(&sql, params_from_iter(values))?)
}

/// Sessions of one owner, most recently active first. Returns `(total, page)`.
pub fn list_sessions(
    conn: &Connection,
    owner: &str,
    limit: usize,
    offset: usize,
) -> Result<(i64, Vec<SessionInfo>)> {
    let total = conn.query_row(
        "SELECT COUNT(*) FROM conversation_sessions WHERE user_id = ?1",
        params![owner],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT user_id, session_id, message_count, metadata, created_at, last_message_at, closed_at \
         FROM conversation_sessions WHERE user_id = ?1 \
         ORDER BY last_message_at DESC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(params![owner, limit as i64, offset as i64], row_to_session)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((total, rows))
}

pub fn get_session_messages(
    conn: &Connection,
    owner: &str,
    session_id: &str,
    limit: usize,
    offset: usize,
) -> Result<Vec<ConversationTurn>> {
    let sql = format!(
        "SELECT {TURN_COLUMNS} FROM conversations WHERE user_id = ?1 AND session_id = ?2 \
         ORDER BY created_at, rowid LIMIT ?3 OFFSET ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![owner, session_id, limit as i64, offset as i64], row_to_turn)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Stamp `closed_at`. `false` if the session is unknown.
pub fn close_session(conn: &Connection, owner: &str, session_id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE conversation_sessions SET closed_at = ?1 WHERE user_id = ?2 AND session_id = ?3",
        params![now_timestamp(), owner, session_id],
    )?;
    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_conn;

    #[test]
    fn append_creates_and_bumps_session() {
        let conn = test_conn();
        let first = append_message(&conn, "alice", None, Role::User, "hi", None).unwrap();
        assert!(first.session_id.starts_with("session_"));
        append_message(&conn, "alice", Some(&first.session_id), Role::Assistant, "hello", None).unwrap();

        let (total, sessions) = list_sessions(&conn, "alice", 10, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(sessions[0].message_count, 2);
        assert!(sessions[0].closed_at.is_none());

        let messages = get_session_messages(&conn, "alice", &first.session_id, 10, 0).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn unextracted_turns_come_in_append_order() {
        let conn = test_conn();
        for i in 0..5 {
            append_message(&conn, "alice", Some("s1"), Role::User, &format!("m{i}"), None).unwrap();
        }
        append_message(&conn, "alice", Some("s2"), Role::User, "other", None).unwrap();

        let turns = get_unextracted(&conn, "alice", Some("s1"), 3).unwrap();
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2"]);
        assert_eq!(get_unextracted(&conn, "alice", None, 100).unwrap().len(), 6);
    }

    #[test]
    fn marking_is_idempotent() {
        let conn = test_conn();
        let turn = append_message(&conn, "alice", Some("s1"), Role::User, "m", None).unwrap();
        let ids = vec![turn.id.clone()];
        assert_eq!(mark_extracted(&conn, "alice", &ids, "task-1").unwrap(), 1);
        assert_eq!(mark_extracted(&conn, "alice", &ids, "task-2").unwrap(), 0);

        let stored = get_session_messages(&conn, "alice", "s1", 10, 0).unwrap();
        assert!(stored[0].extracted);
        assert_eq!(stored[0].extraction_task_id.as_deref(), Some("task-1"));
        assert!(get_unextracted(&conn, "alice", None, 10).unwrap().is_empty());
    }

    #[test]
    fn marking_ignores_other_owners_turns() {
        let conn = test_conn();
        let alice = append_message(&conn, "alice", Some("s1"), Role::User, "mine", None).unwrap();
        let bob = append_message(&conn, "bob", Some("s1"), Role::User, "his", None).unwrap();
        let ids = vec![alice.id.clone(), bob.id.clone()];

        let pending = pending_ids(&conn, "bob", &ids).unwrap();
        assert_eq!(pending, HashSet::from([bob.id.clone()]));

        assert_eq!(mark_extracted(&conn, "bob", &ids, "task-1").unwrap(), 1);
        assert_eq!(get_unextracted(&conn, "alice", None, 10).unwrap().len(), 1);
        assert!(pending_ids(&conn, "bob", &ids).unwrap().is_empty());
    }

    #[test]
    fn close_stamps_session() {
        let conn = test_conn();
        append_message(&conn, "alice", Some("s1"), Role::User, "m", None).unwrap();
        assert!(close_session(&conn, "alice", "s1").unwrap());
        assert!(!close_session(&conn, "alice", "nope").unwrap());
        let (_, sessions) = list_sessions(&conn, "alice", 10, 0).unwrap();
        assert!(sessions[0].closed_at.is_some());
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("tool".parse::<Role>().is_err());
    }
}
