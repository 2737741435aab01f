//! In-memory key/value store for tests and ephemeral sessions.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::provider::{KeyValueStore, Record, Schema, StoreSchema, WriteBatch, WriteOp};
use lectio_common::Result;

type Table = BTreeMap<String, Value>;

/// In-memory key/value store.
///
/// Batches are staged on a copy of the touched tables and swapped in only
/// when every operation succeeded. All data is lost on drop.
pub struct MemoryStore {
    schema: Schema,
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    /// Create an empty store with the given schema.
    pub fn new(schema: Schema) -> Self {
        let tables = schema
            .stores
            .iter()
            .map(|s| (s.name.clone(), Table::new()))
            .collect();
        Self {
            schema,
            tables: RwLock::new(tables),
        }
    }

    /// Create an empty store with the reader schema.
    pub fn reader() -> Self {
        Self::new(Schema::reader())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::reader()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        self.schema.store(store)?;
        let tables = self.tables.read();
        Ok(tables.get(store).and_then(|t| t.get(key)).cloned())
    }

    async fn list(&self, store: &str) -> Result<Vec<Record>> {
        self.schema.store(store)?;
        let tables = self.tables.read();
        Ok(tables
            .get(store)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn list_by_index(&self, store: &str, index: &str, value: &str) -> Result<Vec<Record>> {
        self.schema.check_index(store, index)?;
        let tables = self.tables.read();
        Ok(tables
            .get(store)
            .map(|t| {
                t.iter()
                    .filter(|(_, v)| StoreSchema::index_key(v, index).as_deref() == Some(value))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        for op in batch.ops() {
            self.schema.store(op.store())?;
        }

        let mut tables = self.tables.write();
        let mut staged: HashMap<String, Table> = HashMap::new();

        for op in batch.ops() {
            let table = staged
                .entry(op.store().to_string())
                .or_insert_with(|| tables.get(op.store()).cloned().unwrap_or_default());
            match op {
                WriteOp::Put { key, value, .. } => {
                    table.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key, .. } => {
                    table.remove(key);
                }
                WriteOp::Clear { .. } => table.clear(),
            }
        }

        tables.extend(staged);
        Ok(())
    }

    async fn approximate_size(&self) -> Result<u64> {
        let tables = self.tables.read();
        Ok(tables
            .values()
            .flat_map(|t| t.iter())
            .map(|(k, v)| (k.len() + v.to_string().len()) as u64)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BOOKMARKS, SYNC_OUTBOX};
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::reader();
        let mut batch = WriteBatch::new();
        batch.put(BOOKMARKS, "John-3-16", json!({"book": "John"}));
        store.apply(batch).await.unwrap();

        let value = store.get(BOOKMARKS, "John-3-16").await.unwrap();
        assert_eq!(value, Some(json!({"book": "John"})));
        assert_eq!(store.get(BOOKMARKS, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_by_index() {
        let store = MemoryStore::reader();
        let mut batch = WriteBatch::new();
        batch
            .put(BOOKMARKS, "a", json!({"book": "John"}))
            .put(BOOKMARKS, "b", json!({"book": "Genesis"}))
            .put(BOOKMARKS, "c", json!({"book": "John"}));
        store.apply(batch).await.unwrap();

        let john = store.list_by_index(BOOKMARKS, "book", "John").await.unwrap();
        let keys: Vec<_> = john.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert!(store.list_by_index(SYNC_OUTBOX, "book", "John").await.is_err());
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = MemoryStore::reader();
        let mut batch = WriteBatch::new();
        batch
            .put(BOOKMARKS, "a", json!({}))
            .put("unknown", "b", json!({}));

        assert!(store.apply(batch).await.is_err());
        assert!(store.list(BOOKMARKS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = MemoryStore::reader();
        let mut batch = WriteBatch::new();
        batch
            .put(BOOKMARKS, "a", json!({}))
            .put(BOOKMARKS, "b", json!({}))
            .delete(BOOKMARKS, "a");
        store.apply(batch).await.unwrap();
        assert_eq!(store.list(BOOKMARKS).await.unwrap().len(), 1);

        let mut batch = WriteBatch::new();
        batch.clear(BOOKMARKS);
        store.apply(batch).await.unwrap();
        assert!(store.list(BOOKMARKS).await.unwrap().is_empty());
        assert_eq!(store.approximate_size().await.unwrap(), 0);
    }
}
