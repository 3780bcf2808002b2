//! SqliteStore - 埋め込み SQLite による DurableStore
//!
//! 1 行 = 1 item。item 本体は JSON として `record` 列に保存し、
//! `kind` / `priority` / `sequence` は運用時の調査用に別列にも持ちます。
//! rusqlite は同期 API なので、各操作は `spawn_blocking` 上で実行します。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, params};
use tokio::task;
use tracing::{debug, instrument, warn};

use crate::domain::{ItemId, QueueItem};
use crate::ports::{DurableStore, StorageError};

/// Current schema version (`PRAGMA user_version`).
const SCHEMA_VERSION: i32 = 1;

const UPSERT_SQL: &str = r"
    INSERT INTO queue_items (id, kind, priority, sequence, enqueued_at, record)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id) DO UPDATE SET
        kind = excluded.kind,
        priority = excluded.priority,
        sequence = excluded.sequence,
        enqueued_at = excluded.enqueued_at,
        record = excluded.record";

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// SQLite-backed queue store. Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Backend(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::from_connection(conn)
    }

    /// In-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StorageError::Backend("sqlite connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::TaskJoin(e.to_string()))?
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    #[instrument(skip(self, item), fields(item_id = %item.id))]
    async fn put(&self, item: &QueueItem) -> Result<(), StorageError> {
        let record = serde_json::to_string(item)?;
        let id = item.id.as_ulid().to_string();
        let kind = item.kind.type_name();
        let priority = item.priority.rank();
        let sequence = i64::try_from(item.sequence).unwrap_or(i64::MAX);
        let enqueued_at = item.enqueued_at.to_rfc3339();

        self.with_conn(move |conn| {
            conn.execute(
                UPSERT_SQL,
                params![id, kind, priority, sequence, enqueued_at, record],
            )?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<Vec<QueueItem>, StorageError> {
        let rows: Vec<(String, String)> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT id, record FROM queue_items")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, record) in rows {
            // a single undecodable row must not wedge the whole queue
            match serde_json::from_str::<QueueItem>(&record) {
                Ok(item) => items.push(item),
                Err(e) => warn!(id = %id, error = %e, "skipping corrupt queue record"),
            }
        }
        debug!(count = items.len(), "loaded queue items");
        Ok(items)
    }

    #[instrument(skip(self), fields(item_id = %id))]
    async fn delete(&self, id: &ItemId) -> Result<(), StorageError> {
        let id = id.as_ulid().to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM queue_items WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}

fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }
    for version in (current + 1)..=SCHEMA_VERSION {
        match version {
            1 => migrate_v1(conn)?,
            other => {
                return Err(StorageError::Backend(format!(
                    "unknown migration version: {other}"
                )));
            }
        }
        conn.execute_batch(&format!("PRAGMA user_version = {version};"))?;
    }
    Ok(())
}

/// v1: one table, one row per item.
fn migrate_v1(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS queue_items (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            priority INTEGER NOT NULL,
            sequence INTEGER NOT NULL,
            enqueued_at TEXT NOT NULL,
            record TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_items_order
            ON queue_items (priority DESC, enqueued_at ASC, sequence ASC);
        ",
    )?;
    Ok(())
}
