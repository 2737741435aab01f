//! SQLite-backed key/value store.
//!
//! Persists records in a single database file so bookmarks and the sync
//! outbox survive restarts. Secondary indices live in their own table and
//! are rewritten together with the record inside one transaction.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::provider::{KeyValueStore, Record, Schema, WriteBatch, WriteOp};
use lectio_common::{Error, Result};

fn storage_err(err: impl std::fmt::Display) -> Error {
    Error::Storage(err.to_string())
}

/// SQLite key/value store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    schema: Arc<Schema>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Postconditions
    /// - Parent directories and tables exist
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(storage_err)?;
            }
        }

        let conn = Connection::open(db_path).map_err(storage_err)?;
        Self::init(conn, schema).map(|store| {
            info!(path = %db_path.display(), "sqlite store opened");
            store
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory(schema: Schema) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn, schema)
    }

    fn init(conn: Connection, schema: Schema) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                store TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (store, key)
            );

            CREATE TABLE IF NOT EXISTS record_index (
                store TEXT NOT NULL,
                idx TEXT NOT NULL,
                idx_value TEXT NOT NULL,
                key TEXT NOT NULL,
                PRIMARY KEY (store, idx, key)
            );

            CREATE INDEX IF NOT EXISTS idx_lookup ON record_index(store, idx, idx_value);
            "#,
        )
        .map_err(storage_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema: Arc::new(schema),
        })
    }

    /// Run blocking database work off the async executor.
    async fn with_conn<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &Schema) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let schema = self.schema.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            work(&mut guard, &schema)
        })
        .await
        .map_err(storage_err)?
    }
}

fn decode_rows(rows: Vec<(String, String)>) -> Result<Vec<Record>> {
    rows.into_iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(&raw)?;
            Ok((key, value))
        })
        .collect()
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        let store = store.to_string();
        let key = key.to_string();
        self.with_conn(move |conn, schema| {
            schema.store(&store)?;
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM records WHERE store = ?1 AND key = ?2",
                    params![store, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;
            raw.map(|r| serde_json::from_str(&r).map_err(Error::from))
                .transpose()
        })
        .await
    }

    async fn list(&self, store: &str) -> Result<Vec<Record>> {
        let store = store.to_string();
        self.with_conn(move |conn, schema| {
            schema.store(&store)?;
            let mut stmt = conn
                .prepare("SELECT key, value FROM records WHERE store = ?1 ORDER BY key")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![store], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(storage_err)?
                .collect::<rusqlite::Result<Vec<(String, String)>>>()
                .map_err(storage_err)?;
            decode_rows(rows)
        })
        .await
    }

    async fn list_by_index(&self, store: &str, index: &str, value: &str) -> Result<Vec<Record>> {
        let store = store.to_string();
        let index = index.to_string();
        let value = value.to_string();
        self.with_conn(move |conn, schema| {
            schema.check_index(&store, &index)?;
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT r.key, r.value FROM record_index i
                    JOIN records r ON r.store = i.store AND r.key = i.key
                    WHERE i.store = ?1 AND i.idx = ?2 AND i.idx_value = ?3
                    ORDER BY r.key
                    "#,
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![store, index, value], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .map_err(storage_err)?
                .collect::<rusqlite::Result<Vec<(String, String)>>>()
                .map_err(storage_err)?;
            decode_rows(rows)
        })
        .await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.with_conn(move |conn, schema| {
            for op in batch.ops() {
                schema.store(op.store())?;
            }

            // Dropping the transaction without commit rolls it back.
            let tx = conn.transaction().map_err(storage_err)?;
            for op in batch.ops() {
                match op {
                    WriteOp::Put { store, key, value } => {
                        let raw = serde_json::to_string(value)?;
                        tx.execute(
                            "INSERT OR REPLACE INTO records (store, key, value) VALUES (?1, ?2, ?3)",
                            params![store, key, raw],
                        )
                        .map_err(storage_err)?;
                        tx.execute(
                            "DELETE FROM record_index WHERE store = ?1 AND key = ?2",
                            params![store, key],
                        )
                        .map_err(storage_err)?;
                        for index in &schema.store(store)?.indexes {
                            if let Some(idx_value) =
                                crate::provider::StoreSchema::index_key(value, index)
                            {
                                tx.execute(
                                    "INSERT INTO record_index (store, idx, idx_value, key) VALUES (?1, ?2, ?3, ?4)",
                                    params![store, index, idx_value, key],
                                )
                                .map_err(storage_err)?;
                            }
                        }
                    }
                    WriteOp::Delete { store, key } => {
                        tx.execute(
                            "DELETE FROM records WHERE store = ?1 AND key = ?2",
                            params![store, key],
                        )
                        .map_err(storage_err)?;
                        tx.execute(
                            "DELETE FROM record_index WHERE store = ?1 AND key = ?2",
                            params![store, key],
                        )
                        .map_err(storage_err)?;
                    }
                    WriteOp::Clear { store } => {
                        tx.execute("DELETE FROM records WHERE store = ?1", params![store])
                            .map_err(storage_err)?;
                        tx.execute("DELETE FROM record_index WHERE store = ?1", params![store])
                            .map_err(storage_err)?;
                    }
                }
            }
            tx.commit().map_err(storage_err)?;
            debug!(ops = batch.len(), "batch committed");
            Ok(())
        })
        .await
    }

    async fn approximate_size(&self) -> Result<u64> {
        self.with_conn(|conn, _| {
            let size: i64 = conn
                .query_row(
                    "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0) FROM records",
                    [],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(size.max(0) as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BOOKMARKS, HIGHLIGHTS};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_put_get() {
        let store = SqliteStore::in_memory(Schema::reader()).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(BOOKMARKS, "John-3-16", json!({"book": "John", "verse": 16}));
        store.apply(batch).await.unwrap();

        let value = store.get(BOOKMARKS, "John-3-16").await.unwrap().unwrap();
        assert_eq!(value["verse"], 16);
        assert!(store.get(BOOKMARKS, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_index_follows_updates() {
        let store = SqliteStore::in_memory(Schema::reader()).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(HIGHLIGHTS, "h1", json!({"book": "John"}));
        store.apply(batch).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.put(HIGHLIGHTS, "h1", json!({"book": "Romans"}));
        store.apply(batch).await.unwrap();

        assert!(store
            .list_by_index(HIGHLIGHTS, "book", "John")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .list_by_index(HIGHLIGHTS, "book", "Romans")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_sqlite_failed_batch_rolls_back() {
        let store = SqliteStore::in_memory(Schema::reader()).unwrap();
        let mut batch = WriteBatch::new();
        batch
            .put(BOOKMARKS, "a", json!({"book": "John"}))
            .put("unknown", "b", json!({}));
        assert!(matches!(store.apply(batch).await, Err(Error::Storage(_))));
        assert!(store.list(BOOKMARKS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("reader.db");

        {
            let store = SqliteStore::open(&path, Schema::reader()).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(BOOKMARKS, "a", json!({"book": "Genesis"}));
            store.apply(batch).await.unwrap();
        }

        let store = SqliteStore::open(&path, Schema::reader()).unwrap();
        let records = store.list_by_index(BOOKMARKS, "book", "Genesis").await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(store.approximate_size().await.unwrap() > 0);
    }

    #[test]
    fn test_sqlite_unusable_parent_is_storage_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let result = SqliteStore::open(file.join("sub").join("reader.db"), Schema::reader());
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
