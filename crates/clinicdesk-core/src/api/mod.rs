//! Access to clinic data over the REST API, with a local fallback.
//!
//! `ApiManager` sends calls to `HttpBackend` while the server answers. It
//! switches to `LocalFallback` (in-memory, fixed latency) when the server
//! is unreachable or starts failing.

pub mod backend;
pub mod base_url;
pub mod client;
pub mod error;
pub mod fallback;
pub mod manager;

pub use backend::{Backend, ConnectionTest, HealthStatus, Resource};
pub use base_url::{classify_origin, resolve_base_url, Deployment, LOCAL_DEV_API};
pub use client::{HttpBackend, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
pub use fallback::{LocalFallback, DEFAULT_FALLBACK_DELAY_MS};
pub use manager::{ApiManager, BackendState};
