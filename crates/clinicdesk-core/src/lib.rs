//! ClinicDesk core library.
//!
//! Platform-agnostic services for a clinic/salon admin tool: a local cache
//! of inventory and appointments, an audit journal, per-user preferences,
//! and an API layer that falls back to local mode when the server is
//! unreachable.

pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod models;
pub mod preferences;
pub mod store;
pub mod utils;

pub use api::{ApiError, ApiManager, BackendState};
pub use audit::{AuditLogger, AuditError};
pub use cache::CacheSync;
pub use config::Config;
pub use context::{AppContext, Ports, StatusReport, SyncReport};
pub use preferences::PreferencesManager;
pub use store::StoreError;
