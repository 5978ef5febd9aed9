//! SQL DDL for all neuromem tables.
//!
//! Every table is keyed by owner (`user_id`) for isolation. `memories` carries
//! its embedding inline as a little-endian f32 BLOB that sqlite-vec's
//! `vec_distance_cosine` reads directly; `memories_fts` is an FTS5
//! external-content index kept in step by triggers. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Atomic memory records
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    memory_type TEXT NOT NULL CHECK(memory_type IN
        ('general','fact','preference','episodic','document','insight','graph_fact')),
    embedding BLOB NOT NULL,
    metadata TEXT,
    extracted_timestamp TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_user_created ON memories(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_memories_user_type ON memories(user_id, memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_event_time ON memories(user_id, extracted_timestamp);

-- Full-text search (BM25)
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    id UNINDEXED,
    user_id UNINDEXED,
    content='memories',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content, id, user_id)
    VALUES (new.rowid, new.content, new.id, new.user_id);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content, id, user_id)
    VALUES ('delete', old.rowid, old.content, old.id, old.user_id);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE OF content ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content, id, user_id)
    VALUES ('delete', old.rowid, old.content, old.id, old.user_id);
    INSERT INTO memories_fts(rowid, content, id, user_id)
    VALUES (new.rowid, new.content, new.id, new.user_id);
END;

-- Conversation turns
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    role TEXT NOT NULL CHECK(role IN ('user','assistant','system')),
    content TEXT NOT NULL,
    embedding BLOB,
    metadata TEXT,
    extracted INTEGER NOT NULL DEFAULT 0,
    extraction_task_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(user_id, session_id, created_at);

-- Session metadata
CREATE TABLE IF NOT EXISTS conversation_sessions (
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    metadata TEXT,
    created_at TEXT NOT NULL,
    last_message_at TEXT NOT NULL,
    closed_at TEXT,
    PRIMARY KEY (user_id, session_id)
);

-- Namespaced key-value preferences and profile
CREATE TABLE IF NOT EXISTS key_values (
    namespace TEXT NOT NULL,
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, scope_id, key)
);

-- Entity graph
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    node_type TEXT NOT NULL,
    node_id TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_graph_nodes_key
    ON graph_nodes(COALESCE(user_id, ''), node_type, node_id);

CREATE TABLE IF NOT EXISTS graph_edges (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    source_type TEXT NOT NULL,
    source_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    relation_name TEXT NOT NULL DEFAULT '',
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    valid_from TEXT NOT NULL,
    valid_until TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_graph_edges_source
    ON graph_edges(user_id, source_type, source_id, edge_type);
CREATE INDEX IF NOT EXISTS idx_graph_edges_target
    ON graph_edges(user_id, target_type, target_id);

-- Per-owner emotion summary written by reflection
CREATE TABLE IF NOT EXISTS emotion_profiles (
    user_id TEXT PRIMARY KEY,
    latest_state TEXT,
    latest_valence REAL,
    dominant_emotions TEXT NOT NULL DEFAULT '{}',
    emotion_triggers TEXT NOT NULL DEFAULT '[]',
    last_reflected_at TEXT,
    updated_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
