use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StoreError;

/// Current object store schema version.
pub const SCHEMA_VERSION: u32 = 1;

pub const INVENTORY: &str = "inventory";
pub const APPOINTMENTS: &str = "appointments";
pub const CACHE_METADATA: &str = "cacheMetadata";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(rename = "keyPath")]
    pub key_path: String,
}

impl CollectionSpec {
    pub fn new(name: &str, key_path: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.to_string(),
        }
    }
}

/// Versioned description of the collections an object store must hold.
///
/// Upgrades only ever add collections; existing records are never migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub version: u32,
    pub collections: Vec<CollectionSpec>,
}

impl StoreSchema {
    /// Schema used by the cache layer: two record collections plus sync metadata.
    pub fn cache_sync() -> Self {
        Self {
            version: SCHEMA_VERSION,
            collections: vec![
                CollectionSpec::new(INVENTORY, "id"),
                CollectionSpec::new(APPOINTMENTS, "id"),
                CollectionSpec::new(CACHE_METADATA, "key"),
            ],
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Collections in `self` that `existing` does not have yet.
    pub fn missing_from<'a>(&'a self, existing: &'a StoreSchema) -> impl Iterator<Item = &'a CollectionSpec> {
        self.collections
            .iter()
            .filter(move |c| existing.collection(&c.name).is_none())
    }
}

/// Extract the primary key of a record. String and integer keys are accepted.
pub fn record_key(spec: &CollectionSpec, record: &Value) -> Result<String, StoreError> {
    match record.get(&spec.key_path) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StoreError::MissingKey {
            collection: spec.name.clone(),
            key_path: spec.key_path.clone(),
        }),
    }
}
