//! Persistent storage ports and their implementations.
//!
//! Two kinds of storage back the application:
//! - `ObjectStore`: named collections of JSON records keyed by a field
//!   (inventory, appointments, cache metadata)
//! - `KeyValueStore`: flat string settings (preferences, audit journal,
//!   session identity)
//!
//! Each port has a JSON-file implementation for real use and an in-memory
//! one for tests and session-scoped data.

pub mod error;
pub mod json_file;
pub mod kv;
pub mod memory;
pub mod schema;

use std::sync::Arc;

use serde_json::Value;

pub use error::StoreError;
pub use json_file::{JsonFileOpener, JsonFileStore};
pub use kv::{load_json, save_json, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use memory::{MemoryOpener, MemoryStore};
pub use schema::{CollectionSpec, StoreSchema};

/// A set of keyed record collections.
///
/// Records are JSON objects; each collection names the field holding the
/// primary key. At most one record exists per key per collection.
pub trait ObjectStore: Send + Sync {
    /// Names of the collections this store holds.
    fn collections(&self) -> Vec<String>;

    fn get_all(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or replace a single record.
    fn put(&self, collection: &str, record: Value) -> Result<(), StoreError>;

    /// Clear the collection and insert `records` as a single transaction.
    fn replace_all(&self, collection: &str, records: Vec<Value>) -> Result<(), StoreError>;

    fn clear(&self, collection: &str) -> Result<(), StoreError>;
}

/// Opens (and upgrades) an object store for a schema.
pub trait StoreOpener: Send + Sync {
    fn open(&self, schema: &StoreSchema) -> Result<Arc<dyn ObjectStore>, StoreError>;
}
