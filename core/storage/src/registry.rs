//! Backend registry for resolving a key/value store by name.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::provider::{KeyValueStore, Schema};
use lectio_common::{Error, Result};

/// Factory function type for creating stores from a schema and JSON config.
pub type StoreFactory =
    Box<dyn Fn(Schema, &Value) -> Result<Arc<dyn KeyValueStore>> + Send + Sync>;

/// Registry of key/value store factories.
pub struct StoreRegistry {
    factories: BTreeMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Store backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Open a store by backend name and configuration.
    ///
    /// # Errors
    /// - Backend not registered
    /// - Configuration invalid for the backend
    pub fn open(&self, name: &str, schema: Schema, config: &Value) -> Result<Arc<dyn KeyValueStore>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::NotFound(format!("Store backend '{}' is not registered", name))
        })?;
        factory(schema, config)
    }

    /// Registered backend names, sorted.
    pub fn backends(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in `memory` and `sqlite` backends.
///
/// The `sqlite` backend requires a `path` string in its configuration.
pub fn create_default_registry() -> StoreRegistry {
    let mut factories: BTreeMap<String, StoreFactory> = BTreeMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|schema: Schema, _config: &Value| -> Result<Arc<dyn KeyValueStore>> {
            Ok(Arc::new(crate::memory::MemoryStore::new(schema)))
        }),
    );

    factories.insert(
        "sqlite".to_string(),
        Box::new(|schema: Schema, config: &Value| -> Result<Arc<dyn KeyValueStore>> {
            let path = config
                .get("path")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("sqlite store requires a 'path'".to_string())
                })?;
            Ok(Arc::new(crate::sqlite::SqliteStore::open(path, schema)?))
        }),
    );

    StoreRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn memory_factory() -> StoreFactory {
        Box::new(|schema: Schema, _: &Value| -> Result<Arc<dyn KeyValueStore>> {
            Ok(Arc::new(MemoryStore::new(schema)))
        })
    }

    #[test]
    fn test_register_and_open() {
        let mut registry = StoreRegistry::new();
        registry
            .register("test", memory_factory())
            .unwrap();

        let store = registry.open("test", Schema::reader(), &Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let result = registry.register("memory", memory_factory());
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_open_unknown_fails() {
        let registry = StoreRegistry::new();
        assert!(matches!(
            registry.open("indexeddb", Schema::reader(), &Value::Null),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_default_backends() {
        let registry = create_default_registry();
        assert_eq!(registry.backends(), vec!["memory", "sqlite"]);
        assert!(registry.open("sqlite", Schema::reader(), &json!({})).is_err());

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reader.db");
        let store = registry
            .open("sqlite", Schema::reader(), &json!({ "path": path }))
            .unwrap();
        assert_eq!(store.name(), "sqlite");
    }
}
