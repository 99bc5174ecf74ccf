use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use super::schema::{record_key, CollectionSpec, StoreSchema};
use super::{ObjectStore, StoreError, StoreOpener};

#[derive(Default)]
struct Collections {
    specs: HashMap<String, CollectionSpec>,
    records: HashMap<String, BTreeMap<String, Value>>,
}

/// In-memory object store. Several openers may share one instance to
/// model multiple contexts over the same storage.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create any collections of `schema` the store does not have yet.
    pub fn upgrade(&self, schema: &StoreSchema) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::poisoned("memory store"))?;
        for spec in &schema.collections {
            if !inner.specs.contains_key(&spec.name) {
                debug!(collection = %spec.name, "Creating in-memory collection");
                inner.specs.insert(spec.name.clone(), spec.clone());
                inner.records.insert(spec.name.clone(), BTreeMap::new());
            }
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn collections(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(inner) => {
                let mut names: Vec<String> = inner.specs.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::poisoned("memory store"))?;
        inner
            .records
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::poisoned("memory store"))?;
        inner
            .records
            .get(collection)
            .map(|records| records.get(key).cloned())
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    fn put(&self, collection: &str, record: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::poisoned("memory store"))?;
        let spec = inner
            .specs
            .get(collection)
            .cloned()
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        let key = record_key(&spec, &record)?;
        if let Some(records) = inner.records.get_mut(collection) {
            records.insert(key, record);
        }
        Ok(())
    }

    fn replace_all(&self, collection: &str, records: Vec<Value>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::poisoned("memory store"))?;
        let spec = inner
            .specs
            .get(collection)
            .cloned()
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        // Build the replacement first so a bad record leaves the old data intact
        let mut replacement = BTreeMap::new();
        for record in records {
            let key = record_key(&spec, &record)?;
            replacement.insert(key, record);
        }
        inner.records.insert(collection.to_string(), replacement);
        Ok(())
    }

    fn clear(&self, collection: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::poisoned("memory store"))?;
        match inner.records.get_mut(collection) {
            Some(records) => {
                records.clear();
                Ok(())
            }
            None => Err(StoreError::UnknownCollection(collection.to_string())),
        }
    }
}

/// Opener handing out a shared `MemoryStore`; counts how often it was opened.
#[derive(Default)]
pub struct MemoryOpener {
    store: Arc<MemoryStore>,
    opens: AtomicUsize,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing store, e.g. between two cache contexts.
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl StoreOpener for MemoryOpener {
    fn open(&self, schema: &StoreSchema) -> Result<Arc<dyn ObjectStore>, StoreError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.store.upgrade(schema)?;
        Ok(self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::{CACHE_METADATA, INVENTORY};
    use serde_json::json;

    fn opened() -> Arc<dyn ObjectStore> {
        MemoryOpener::new().open(&StoreSchema::cache_sync()).unwrap()
    }

    #[test]
    fn test_put_replaces_same_key() {
        let store = opened();
        store.put(INVENTORY, json!({"id": "I1", "quantity": 1})).unwrap();
        store.put(INVENTORY, json!({"id": "I1", "quantity": 7})).unwrap();

        let all = store.get_all(INVENTORY).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["quantity"], 7);
    }

    #[test]
    fn test_replace_all_drops_previous_records() {
        let store = opened();
        store.replace_all(INVENTORY, vec![json!({"id": "a"}), json!({"id": "b"})]).unwrap();
        store.replace_all(INVENTORY, vec![json!({"id": "c"})]).unwrap();

        assert!(store.get(INVENTORY, "a").unwrap().is_none());
        assert!(store.get(INVENTORY, "c").unwrap().is_some());
    }

    #[test]
    fn test_replace_all_keeps_old_data_on_bad_record() {
        let store = opened();
        store.replace_all(INVENTORY, vec![json!({"id": "a"})]).unwrap();
        let result = store.replace_all(INVENTORY, vec![json!({"id": "b"}), json!({"name": "no key"})]);
        assert!(result.is_err());
        assert!(store.get(INVENTORY, "a").unwrap().is_some());
    }

    #[test]
    fn test_metadata_keyed_by_key_field() {
        let store = opened();
        store
            .put(CACHE_METADATA, json!({"key": "inventory_last_synced", "value": 1, "timestamp": 1}))
            .unwrap();
        assert!(store.get(CACHE_METADATA, "inventory_last_synced").unwrap().is_some());
    }

    #[test]
    fn test_unknown_collection() {
        let store = opened();
        assert!(matches!(
            store.get_all("patients"),
            Err(StoreError::UnknownCollection(_))
        ));
    }
}
