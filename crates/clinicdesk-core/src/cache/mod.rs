//! Local cache of inventory and appointment data.
//!
//! `CacheSync` mirrors the two collections into an `ObjectStore` and
//! records when each was last synced. Data older than
//! `DEFAULT_STALE_MINUTES` is considered stale. Every refresh is announced
//! on the `cache-sync` broadcast channel so other contexts can reload.

pub mod broadcast;
pub mod sync;

pub use broadcast::{BroadcastHub, CacheMessage, ContextId, CHANNEL_NAME};
pub use sync::{CacheMetadata, CacheSync, Collection, CollectionStatus, DEFAULT_STALE_MINUTES};
