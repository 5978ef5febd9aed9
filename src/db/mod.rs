pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use crate::error::MemoryError;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the database at the given path, with sqlite-vec loaded and
/// schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a fully migrated in-memory database.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Shared handle to the single database connection.
///
/// Every call runs on the blocking pool and holds the connection lock for the
/// duration of one closure, so a unit of work is never interleaved with another.
/// Callers finish embedding and LLM calls before entering a closure.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(open_memory_database()?))
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> crate::error::Result<T>
    where
        F: FnOnce(&mut Connection) -> crate::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| MemoryError::Internal(format!("db lock poisoned: {e}")))?;
            f(&mut guard)
        })
        .await?
    }

    /// Run `f` inside one transaction. Committed when `f` returns `Ok`, rolled
    /// back otherwise.
    pub async fn transaction<F, T>(&self, f: F) -> crate::error::Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> crate::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }
}

/// Snapshot used by the `doctor` command.
#[derive(Debug)]
pub struct HealthReport {
    pub schema_version: u32,
    pub sqlite_vec_version: String,
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    pub memory_count: i64,
    pub conversation_count: i64,
    pub unextracted_count: i64,
    pub node_count: i64,
    pub edge_count: i64,
    pub integrity_ok: bool,
    pub integrity_details: String,
}

pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let count = |sql: &str| -> Result<i64> {
        conn.query_row(sql, [], |row| row.get(0))
            .with_context(|| format!("count failed: {sql}"))
    };

    let integrity_details: String =
        conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;

    Ok(HealthReport {
        schema_version: migrations::get_schema_version(conn)?,
        sqlite_vec_version: conn.query_row("SELECT vec_version()", [], |row| row.get(0))?,
        embedding_model: migrations::get_embedding_model(conn)?,
        embedding_dims: migrations::get_embedding_dims(conn)?,
        memory_count: count("SELECT COUNT(*) FROM memories")?,
        conversation_count: count("SELECT COUNT(*) FROM conversations")?,
        unextracted_count: count("SELECT COUNT(*) FROM conversations WHERE extracted = 0")?,
        node_count: count("SELECT COUNT(*) FROM graph_nodes")?,
        edge_count: count("SELECT COUNT(*) FROM graph_edges")?,
        integrity_ok: integrity_details == "ok",
        integrity_details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();

        let result: crate::error::Result<()> = db
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO key_values (namespace, scope_id, key, value, created_at, updated_at) \
                     VALUES ('preferences', 'u1', 'tea', '\"green\"', 'now', 'now')",
                    [],
                )?;
                Err(MemoryError::validation("abort"))
            })
            .await;
        assert!(result.is_err());

        let rows: i64 = db
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM key_values", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn health_check_on_fresh_database() {
        let conn = open_memory_database().unwrap();
        let report = check_database_health(&conn).unwrap();
        assert!(report.integrity_ok);
        assert_eq!(report.schema_version, migrations::CURRENT_SCHEMA_VERSION);
        assert_eq!(report.memory_count, 0);
    }
}
