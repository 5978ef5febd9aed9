//! Namespaced key-value store for preferences and profile attributes.
//!
//! Keys are unique per `(namespace, scope_id, key)`; values are JSON.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use super::now_timestamp;
use crate::error::Result;

/// Namespace holding extracted `key → value` preferences.
pub const PREFERENCES_NAMESPACE: &str = "preferences";
/// Namespace holding the merged user profile.
pub const PROFILE_NAMESPACE: &str = "profile";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub namespace: String,
    pub scope_id: String,
    pub key: String,
    pub value: Value,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_kv(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyValue> {
    let raw: String = row.get(3)?;
    Ok(KeyValue {
        namespace: row.get(0)?,
        scope_id: row.get(1)?,
        key: row.get(2)?,
        value: serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Upsert one value.
pub fn set(conn: &Connection, namespace: &str, scope_id: &str, key: &str, value: &Value) -> Result<()> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO key_values (namespace, scope_id, key, value, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
         ON CONFLICT(namespace, scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![namespace, scope_id, key, serde_json::to_string(value)?, now],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, namespace: &str, scope_id: &str, key: &str) -> Result<Option<KeyValue>> {
    Ok(conn
        .query_row(
            "SELECT namespace, scope_id, key, value, created_at, updated_at FROM key_values \
             WHERE namespace = ?1 AND scope_id = ?2 AND key = ?3",
            params![namespace, scope_id, key],
            row_to_kv,
        )
        .optional()?)
}

/// Entries of one scope ordered by key, optionally restricted to a key prefix.
pub fn list(
    conn: &Connection,
    namespace: &str,
    scope_id: &str,
    prefix: Option<&str>,
    limit: usize,
) -> Result<Vec<KeyValue>> {
    let mut stmt = conn.prepare(
        "SELECT namespace, scope_id, key, value, created_at, updated_at FROM key_values \
         WHERE namespace = ?1 AND scope_id = ?2 AND substr(key, 1, length(?3)) = ?3 \
         ORDER BY key LIMIT ?4",
    )?;
    let rows = stmt
        .query_map(
            params![namespace, scope_id, prefix.unwrap_or(""), limit as i64],
            row_to_kv,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// `true` if a value was removed.
pub fn delete(conn: &Connection, namespace: &str, scope_id: &str, key: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM key_values WHERE namespace = ?1 AND scope_id = ?2 AND key = ?3",
        params![namespace, scope_id, key],
    )?;
    Ok(rows > 0)
}

/// Upsert several values under one scope.
pub fn batch_set<'a>(
    conn: &Connection,
    namespace: &str,
    scope_id: &str,
    items: impl IntoIterator<Item = (&'a str, &'a Value)>,
) -> Result<usize> {
    let mut count = 0;
    for (key, value) in items {
        set(conn, namespace, scope_id, key, value)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_conn;
    use serde_json::json;

    #[test]
    fn set_overwrites_in_place() {
        let conn = test_conn();
        set(&conn, "preferences", "alice", "drink", &json!("tea")).unwrap();
        set(&conn, "preferences", "alice", "drink", &json!("coffee")).unwrap();

        let kv = get(&conn, "preferences", "alice", "drink").unwrap().unwrap();
        assert_eq!(kv.value, json!("coffee"));
        assert_eq!(list(&conn, "preferences", "alice", None, 10).unwrap().len(), 1);
        assert!(get(&conn, "preferences", "bob", "drink").unwrap().is_none());
    }

    #[test]
    fn list_filters_by_prefix() {
        let conn = test_conn();
        let items = [
            ("fav_food", json!("sushi")),
            ("fav_color", json!("blue")),
            ("diet", json!("none")),
        ];
        let count = batch_set(&conn, "preferences", "alice", items.iter().map(|(k, v)| (*k, v))).unwrap();
        assert_eq!(count, 3);

        let favs = list(&conn, "preferences", "alice", Some("fav_"), 10).unwrap();
        let keys: Vec<&str> = favs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["fav_color", "fav_food"]);
    }

    #[test]
    fn delete_reports_presence() {
        let conn = test_conn();
        set(&conn, "profile", "alice", "occupation", &json!("engineer")).unwrap();
        assert!(delete(&conn, "profile", "alice", "occupation").unwrap());
        assert!(!delete(&conn, "profile", "alice", "occupation").unwrap());
    }
}
