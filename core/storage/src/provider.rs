//! Key/value store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lectio_common::{Error, Result};

/// Object store holding bookmarks, indexed by `book`.
pub const BOOKMARKS: &str = "bookmarks";
/// Object store holding highlights, indexed by `book`.
pub const HIGHLIGHTS: &str = "highlights";
/// Object store holding pending sync records, keyed by `kind:id`.
pub const SYNC_OUTBOX: &str = "syncOutbox";

/// A stored record: primary key and JSON value.
pub type Record = (String, Value);

/// Declaration of one object store and its secondary indices.
///
/// Index names are top-level JSON field names of the stored values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    pub indexes: Vec<String>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    /// Add a secondary index on a top-level field.
    pub fn with_index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(field.into());
        self
    }

    /// Extract the index key for `field` from a value.
    ///
    /// Strings index as-is, numbers and booleans by their JSON text;
    /// missing or null fields are not indexed.
    pub fn index_key(value: &Value, field: &str) -> Option<String> {
        match value.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Set of object stores a backend is opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub stores: Vec<StoreSchema>,
}

impl Schema {
    /// Schema used by the reader: bookmarks, highlights and the sync outbox.
    pub fn reader() -> Self {
        Self {
            stores: vec![
                StoreSchema::new(BOOKMARKS).with_index("book"),
                StoreSchema::new(HIGHLIGHTS).with_index("book"),
                StoreSchema::new(SYNC_OUTBOX),
            ],
        }
    }

    /// Look up a store declaration.
    pub fn store(&self, name: &str) -> Result<&StoreSchema> {
        self.stores
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::Storage(format!("Unknown object store: {}", name)))
    }

    /// Check that an index is declared on a store.
    pub fn check_index(&self, store: &str, index: &str) -> Result<()> {
        if self.store(store)?.indexes.iter().any(|i| i == index) {
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "Object store '{}' has no index '{}'",
                store, index
            )))
        }
    }
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        store: String,
        key: String,
        value: Value,
    },
    Delete {
        store: String,
        key: String,
    },
    Clear {
        store: String,
    },
}

impl WriteOp {
    pub fn store(&self) -> &str {
        match self {
            WriteOp::Put { store, .. } | WriteOp::Delete { store, .. } | WriteOp::Clear { store } => {
                store
            }
        }
    }
}

/// Ordered list of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, store: &str, key: impl Into<String>, value: Value) -> &mut Self {
        self.ops.push(WriteOp::Put {
            store: store.to_string(),
            key: key.into(),
            value,
        });
        self
    }

    pub fn delete(&mut self, store: &str, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            store: store.to_string(),
            key: key.into(),
        });
        self
    }

    pub fn clear(&mut self, store: &str) -> &mut Self {
        self.ops.push(WriteOp::Clear {
            store: store.to_string(),
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Persistent, transactional key/value medium.
///
/// Values are JSON documents grouped into named object stores. Every
/// method may suspend on storage I/O. Implementations must apply a
/// [`WriteBatch`] atomically: either every operation is visible afterwards
/// or none is.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Read a single record.
    ///
    /// # Errors
    /// - Unknown object store
    /// - Backend I/O failure
    async fn get(&self, store: &str, key: &str) -> Result<Option<Value>>;

    /// List every record of a store in key order.
    async fn list(&self, store: &str) -> Result<Vec<Record>>;

    /// List records whose indexed field equals `value`, in key order.
    ///
    /// # Errors
    /// - Index not declared on the store
    async fn list_by_index(&self, store: &str, index: &str, value: &str) -> Result<Vec<Record>>;

    /// Apply a batch of writes atomically.
    ///
    /// # Postconditions
    /// - On `Ok`, all writes are durable
    /// - On `Err`, the store is unchanged
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    /// Approximate number of bytes held by the store.
    async fn approximate_size(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reader_schema() {
        let schema = Schema::reader();
        assert!(schema.check_index(BOOKMARKS, "book").is_ok());
        assert!(schema.check_index(HIGHLIGHTS, "book").is_ok());
        assert!(schema.check_index(SYNC_OUTBOX, "book").is_err());
        assert!(schema.store("notes").is_err());
    }

    #[test]
    fn test_index_key_extraction() {
        let value = json!({"book": "John", "chapter": 3, "note": null});
        assert_eq!(StoreSchema::index_key(&value, "book"), Some("John".to_string()));
        assert_eq!(StoreSchema::index_key(&value, "chapter"), Some("3".to_string()));
        assert_eq!(StoreSchema::index_key(&value, "note"), None);
        assert_eq!(StoreSchema::index_key(&value, "missing"), None);
    }

    #[test]
    fn test_batch_builder() {
        let mut batch = WriteBatch::new();
        batch
            .put(BOOKMARKS, "a", json!({}))
            .delete(SYNC_OUTBOX, "bookmark:a")
            .clear(HIGHLIGHTS);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ops()[1].store(), SYNC_OUTBOX);
    }
}
