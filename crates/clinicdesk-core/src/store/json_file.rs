use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info};

use super::schema::{record_key, CollectionSpec, StoreSchema};
use super::{ObjectStore, StoreError, StoreOpener};

/// Schema file name inside the store directory
const SCHEMA_FILE: &str = "schema.json";

type Records = BTreeMap<String, Value>;

/// Object store persisted as one JSON file per collection.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// crash mid-write leaves the previous contents readable.
pub struct JsonFileStore {
    dir: PathBuf,
    schema: StoreSchema,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    fn collection_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn spec(&self, collection: &str) -> Result<&CollectionSpec, StoreError> {
        self.schema
            .collection(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    fn load(&self, collection: &str) -> Result<Records, StoreError> {
        self.spec(collection)?;
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(Records::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(Records::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, collection: &str, records: &Records) -> Result<(), StoreError> {
        write_atomic(&self.collection_path(collection), &serde_json::to_string_pretty(records)?)
    }
}

impl ObjectStore for JsonFileStore {
    fn collections(&self) -> Vec<String> {
        self.schema.collections.iter().map(|c| c.name.clone()).collect()
    }

    fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self.load(collection)?.into_values().collect())
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load(collection)?.remove(key))
    }

    fn put(&self, collection: &str, record: Value) -> Result<(), StoreError> {
        let key = record_key(self.spec(collection)?, &record)?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::poisoned("file store"))?;
        let mut records = self.load(collection)?;
        records.insert(key, record);
        self.save(collection, &records)
    }

    fn replace_all(&self, collection: &str, records: Vec<Value>) -> Result<(), StoreError> {
        let spec = self.spec(collection)?;
        let mut replacement = Records::new();
        for record in records {
            let key = record_key(spec, &record)?;
            replacement.insert(key, record);
        }
        let _guard = self.write_lock.lock().map_err(|_| StoreError::poisoned("file store"))?;
        self.save(collection, &replacement)
    }

    fn clear(&self, collection: &str) -> Result<(), StoreError> {
        self.spec(collection)?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::poisoned("file store"))?;
        self.save(collection, &Records::new())
    }
}

/// Opens a `JsonFileStore` rooted at a directory, upgrading its schema.
pub struct JsonFileOpener {
    dir: PathBuf,
}

impl JsonFileOpener {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn read_schema(&self) -> Result<Option<StoreSchema>, StoreError> {
        let path = self.dir.join(SCHEMA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

impl StoreOpener for JsonFileOpener {
    fn open(&self, schema: &StoreSchema) -> Result<Arc<dyn ObjectStore>, StoreError> {
        std::fs::create_dir_all(&self.dir)?;

        let existing = self.read_schema()?.unwrap_or(StoreSchema {
            version: 0,
            collections: Vec::new(),
        });

        let mut merged = existing.clone();
        for spec in schema.missing_from(&existing) {
            debug!(collection = %spec.name, "Creating collection file");
            write_atomic(&self.dir.join(format!("{}.json", spec.name)), "{}")?;
            merged.collections.push(spec.clone());
        }

        if existing.version < schema.version || merged != existing {
            merged.version = merged.version.max(schema.version);
            info!(
                from = existing.version,
                to = merged.version,
                dir = %self.dir.display(),
                "Upgrading object store schema"
            );
            write_atomic(&self.dir.join(SCHEMA_FILE), &serde_json::to_string_pretty(&merged)?)?;
        }

        Ok(Arc::new(JsonFileStore {
            dir: self.dir.clone(),
            schema: merged,
            write_lock: Mutex::new(()),
        }))
    }
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
