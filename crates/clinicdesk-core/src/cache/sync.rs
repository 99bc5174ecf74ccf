use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast::error::RecvError, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::broadcast::{BroadcastHub, CacheMessage, ContextId};
use crate::store::schema::{APPOINTMENTS, CACHE_METADATA, INVENTORY};
use crate::store::{ObjectStore, StoreError, StoreOpener, StoreSchema};

/// Default staleness threshold in minutes.
pub const DEFAULT_STALE_MINUTES: i64 = 5;

/// Collections mirrored by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Inventory,
    Appointments,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Inventory, Collection::Appointments];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Inventory => INVENTORY,
            Collection::Appointments => APPOINTMENTS,
        }
    }

    fn last_synced_key(&self) -> String {
        format!("{}_last_synced", self.name())
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            INVENTORY => Ok(Collection::Inventory),
            APPOINTMENTS => Ok(Collection::Appointments),
            other => Err(format!("unknown collection '{}'", other)),
        }
    }
}

/// Sync bookkeeping record stored in the `cacheMetadata` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub key: String,
    pub value: Value,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Snapshot of one collection for status displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatus {
    pub collection: Collection,
    pub item_count: usize,
    pub last_synced: Option<DateTime<Utc>>,
    pub stale: bool,
}

/// Local mirror of the inventory and appointment collections.
///
/// The backing store is opened lazily on first use and reused after that;
/// concurrent first calls wait on the same open. Storage failures never
/// reach the caller: reads degrade to empty results and writes report
/// `false`.
pub struct CacheSync {
    opener: Arc<dyn StoreOpener>,
    schema: StoreSchema,
    store: OnceCell<Arc<dyn ObjectStore>>,
    hub: Arc<BroadcastHub>,
    context_id: ContextId,
}

impl CacheSync {
    pub fn new(opener: Arc<dyn StoreOpener>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            opener,
            schema: StoreSchema::cache_sync(),
            store: OnceCell::new(),
            hub,
            context_id: rand::thread_rng().gen(),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    async fn store(&self) -> Option<Arc<dyn ObjectStore>> {
        let result = self
            .store
            .get_or_try_init(|| async {
                let store = self.opener.open(&self.schema)?;
                info!(version = self.schema.version, "Cache store opened");
                Ok::<_, StoreError>(store)
            })
            .await;

        match result {
            Ok(store) => Some(store.clone()),
            Err(e) => {
                error!(error = %e, "Failed to open cache store");
                None
            }
        }
    }

    /// Replace the contents of `collection` with `items`, stamp the sync time
    /// and notify other contexts. Returns `false` on any storage failure.
    pub async fn cache_collection<T: Serialize>(&self, collection: Collection, items: &[T]) -> bool {
        let Some(store) = self.store().await else {
            return false;
        };

        let records: Result<Vec<Value>, _> = items.iter().map(serde_json::to_value).collect();
        let records = match records {
            Ok(records) => records,
            Err(e) => {
                error!(collection = %collection, error = %e, "Failed to serialize items for cache");
                return false;
            }
        };
        let item_count = records.len();

        if let Err(e) = store.replace_all(collection.name(), records) {
            error!(collection = %collection, error = %e, "Failed to cache collection");
            return false;
        }

        let now = Utc::now().timestamp_millis();
        let metadata = CacheMetadata {
            key: collection.last_synced_key(),
            value: Value::from(now),
            timestamp: now,
        };
        let stamped = serde_json::to_value(&metadata)
            .map_err(StoreError::from)
            .and_then(|record| store.put(CACHE_METADATA, record));
        if let Err(e) = stamped {
            error!(collection = %collection, error = %e, "Failed to record sync time");
            return false;
        }

        debug!(collection = %collection, item_count, "Cached collection");
        self.hub.post(
            self.context_id,
            CacheMessage::CacheUpdated {
                data_type: collection.name().to_string(),
                item_count,
                timestamp: now,
            },
        );
        true
    }

    /// All cached items of `collection`; empty when nothing is cached or the
    /// store is unavailable. Records that no longer match `T` are skipped.
    pub async fn get_collection<T: DeserializeOwned>(&self, collection: Collection) -> Vec<T> {
        let Some(store) = self.store().await else {
            return Vec::new();
        };

        let records = match store.get_all(collection.name()) {
            Ok(records) => records,
            Err(e) => {
                error!(collection = %collection, error = %e, "Failed to read cached collection");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(record) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(collection = %collection, error = %e, "Skipping unreadable cached record");
                    None
                }
            })
            .collect()
    }

    pub async fn last_synced(&self, collection: Collection) -> Option<DateTime<Utc>> {
        let store = self.store().await?;
        let record = match store.get(CACHE_METADATA, &collection.last_synced_key()) {
            Ok(record) => record?,
            Err(e) => {
                debug!(collection = %collection, error = %e, "Failed to read sync metadata");
                return None;
            }
        };
        let metadata: CacheMetadata = serde_json::from_value(record).ok()?;
        Utc.timestamp_millis_opt(metadata.timestamp).single()
    }

    /// True when the collection was never synced or its last sync is more
    /// than `threshold_minutes` old. Errors count as stale.
    pub async fn is_stale(&self, collection: Collection, threshold_minutes: i64) -> bool {
        match self.last_synced(collection).await {
            Some(synced) => {
                let elapsed_ms = Utc::now()
                    .timestamp_millis()
                    .saturating_sub(synced.timestamp_millis());
                elapsed_ms > threshold_minutes.saturating_mul(60_000)
            }
            None => true,
        }
    }

    pub async fn status(&self, threshold_minutes: i64) -> Vec<CollectionStatus> {
        let mut statuses = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let item_count = self.get_collection::<Value>(collection).await.len();
            statuses.push(CollectionStatus {
                collection,
                item_count,
                last_synced: self.last_synced(collection).await,
                stale: self.is_stale(collection, threshold_minutes).await,
            });
        }
        statuses
    }

    /// Empty every collection, metadata included.
    pub async fn clear_all(&self) -> bool {
        let Some(store) = self.store().await else {
            return false;
        };
        let mut ok = true;
        for name in store.collections() {
            if let Err(e) = store.clear(&name) {
                error!(collection = %name, error = %e, "Failed to clear collection");
                ok = false;
            }
        }
        info!(ok, "Cleared cache store");
        ok
    }

    /// Invoke `callback` for every update another context posts.
    ///
    /// Requires a running tokio runtime. Messages this context posts itself
    /// are not delivered back to it; lagged messages are skipped. Abort the
    /// returned handle to unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(CacheMessage) + Send + 'static,
    {
        let mut rx = self.hub.receiver();
        let own = self.context_id;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) if envelope.origin != own => callback(envelope.message),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Cache subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InventoryItem;
    use crate::store::{MemoryOpener, StoreSchema};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FailingOpener;

    impl StoreOpener for FailingOpener {
        fn open(&self, _schema: &StoreSchema) -> Result<Arc<dyn ObjectStore>, StoreError> {
            Err(StoreError::Unavailable("disk gone".to_string()))
        }
    }

    fn items(ids: &[&str]) -> Vec<InventoryItem> {
        ids.iter().map(|id| InventoryItem::new(*id, format!("Item {}", id), 1)).collect()
    }

    fn cache_with(opener: Arc<MemoryOpener>) -> CacheSync {
        CacheSync::new(opener, Arc::new(BroadcastHub::default()))
    }

    #[tokio::test]
    async fn test_cache_collection_is_full_replace() {
        let cache = cache_with(Arc::new(MemoryOpener::new()));

        assert!(cache.cache_collection(Collection::Inventory, &items(&["a", "b", "c"])).await);
        assert!(cache.cache_collection(Collection::Inventory, &items(&["c", "d"])).await);

        let cached: Vec<InventoryItem> = cache.get_collection(Collection::Inventory).await;
        let mut ids: Vec<&str> = cached.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_collections_are_independent() {
        let cache = cache_with(Arc::new(MemoryOpener::new()));
        cache.cache_collection(Collection::Inventory, &items(&["a"])).await;

        let appointments: Vec<Value> = cache.get_collection(Collection::Appointments).await;
        assert!(appointments.is_empty());
    }

    #[tokio::test]
    async fn test_stale_before_sync_fresh_after() {
        let cache = cache_with(Arc::new(MemoryOpener::new()));
        assert!(cache.is_stale(Collection::Inventory, DEFAULT_STALE_MINUTES).await);

        cache.cache_collection(Collection::Inventory, &items(&["a"])).await;
        assert!(!cache.is_stale(Collection::Inventory, DEFAULT_STALE_MINUTES).await);
        assert!(cache.is_stale(Collection::Appointments, DEFAULT_STALE_MINUTES).await);
    }

    #[tokio::test]
    async fn test_stale_after_threshold_elapses() {
        let opener = Arc::new(MemoryOpener::new());
        let cache = cache_with(opener.clone());
        cache.cache_collection(Collection::Inventory, &items(&["a"])).await;

        let six_minutes_ago = Utc::now().timestamp_millis() - 6 * 60_000;
        opener
            .store()
            .put(
                CACHE_METADATA,
                json!({"key": "inventory_last_synced", "value": six_minutes_ago, "timestamp": six_minutes_ago}),
            )
            .unwrap();

        assert!(cache.is_stale(Collection::Inventory, 5).await);
        assert!(!cache.is_stale(Collection::Inventory, 10).await);
    }

    #[tokio::test]
    async fn test_huge_threshold_never_stale() {
        let cache = cache_with(Arc::new(MemoryOpener::new()));
        cache.cache_collection(Collection::Inventory, &items(&["a"])).await;

        assert!(!cache.is_stale(Collection::Inventory, i64::MAX / 1000).await);
        assert!(!cache.is_stale(Collection::Inventory, i64::MAX).await);
        assert_eq!(cache.status(i64::MAX).await.len(), Collection::ALL.len());
    }

    #[tokio::test]
    async fn test_clear_all_empties_data_and_metadata() {
        let cache = cache_with(Arc::new(MemoryOpener::new()));
        cache.cache_collection(Collection::Inventory, &items(&["a"])).await;
        cache.cache_collection(Collection::Appointments, &Vec::<Value>::new()).await;

        assert!(cache.clear_all().await);
        assert!(cache.get_collection::<Value>(Collection::Inventory).await.is_empty());
        assert!(cache.last_synced(Collection::Inventory).await.is_none());
    }

    #[tokio::test]
    async fn test_open_failure_degrades() {
        let cache = CacheSync::new(Arc::new(FailingOpener), Arc::new(BroadcastHub::default()));
        assert!(!cache.cache_collection(Collection::Inventory, &items(&["a"])).await);
        assert!(cache.get_collection::<Value>(Collection::Inventory).await.is_empty());
        assert!(cache.is_stale(Collection::Inventory, 5).await);
        assert!(!cache.clear_all().await);
    }

    #[tokio::test]
    async fn test_record_without_id_fails_and_keeps_previous() {
        let cache = cache_with(Arc::new(MemoryOpener::new()));
        cache.cache_collection(Collection::Inventory, &items(&["a"])).await;

        let bad = vec![json!({"name": "no id"})];
        assert!(!cache.cache_collection(Collection::Inventory, &bad).await);
        assert_eq!(cache.get_collection::<Value>(Collection::Inventory).await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_opens_once() {
        let opener = Arc::new(MemoryOpener::new());
        let cache = Arc::new(cache_with(opener.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get_collection::<Value>(Collection::Inventory).await.len()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(opener.open_count(), 1);
    }

    #[tokio::test]
    async fn test_other_context_is_notified_but_not_sender() {
        let shared = Arc::new(MemoryOpener::new());
        let hub = Arc::new(BroadcastHub::default());
        let tab_a = CacheSync::new(shared.clone(), hub.clone());
        let tab_b = CacheSync::new(Arc::new(MemoryOpener::with_store(shared.store())), hub);

        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let _a = tab_a.subscribe(move |msg| {
            let _ = a_tx.send(msg);
        });
        let _b = tab_b.subscribe(move |msg| {
            let _ = b_tx.send(msg);
        });

        tab_a.cache_collection(Collection::Inventory, &items(&["a", "b"])).await;

        // Delivery is best effort; only check the payload if it arrived.
        if let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(500), b_rx.recv()).await {
            match msg {
                CacheMessage::CacheUpdated { data_type, item_count, .. } => {
                    assert_eq!(data_type, "inventory");
                    assert_eq!(item_count, 2);
                }
            }
        }
        let own = tokio::time::timeout(Duration::from_millis(100), a_rx.recv()).await;
        assert!(own.is_err(), "sender must not receive its own update");

        // Both contexts read the same storage
        assert_eq!(tab_b.get_collection::<InventoryItem>(Collection::Inventory).await.len(), 2);
    }
}
