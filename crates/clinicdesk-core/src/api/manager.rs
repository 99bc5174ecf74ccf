use std::future::Future;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::backend::{Backend, ConnectionTest, HealthStatus, Resource};
use super::ApiError;
use crate::models::{Patient, TimeEntry};

/// Which backend calls are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// The live backend answered and is used for every call.
    Live,
    /// The live backend failed mid-session; the local fallback serves all
    /// calls until an explicit switch back.
    Degraded,
    /// Never reached, or local mode was chosen explicitly.
    Offline,
}

impl BackendState {
    pub fn uses_live_backend(&self) -> bool {
        matches!(self, BackendState::Live)
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::Live => write!(f, "live"),
            BackendState::Degraded => write!(f, "degraded"),
            BackendState::Offline => write!(f, "offline"),
        }
    }
}

/// Routes CRUD calls to the live backend or the local fallback.
///
/// Transitions:
/// - `Offline` -> `Live` when `probe` reaches the backend
/// - `Live` -> `Degraded` when any call fails; the failing call is then
///   served by the fallback
/// - any -> `Live`/`Offline` on `switch_to_real_backend`, depending on
///   whether the backend answers
/// - any -> `Offline` on `switch_to_local`
pub struct ApiManager {
    live: Arc<dyn Backend>,
    fallback: Arc<dyn Backend>,
    state: RwLock<BackendState>,
}

impl ApiManager {
    pub fn new(live: Arc<dyn Backend>, fallback: Arc<dyn Backend>) -> Self {
        Self {
            live,
            fallback,
            state: RwLock::new(BackendState::Offline),
        }
    }

    pub fn state(&self) -> BackendState {
        self.state.read().map(|s| *s).unwrap_or(BackendState::Offline)
    }

    fn transition(&self, to: BackendState, reason: &str) {
        if let Ok(mut state) = self.state.write() {
            if *state != to {
                info!(from = %*state, to = %to, reason, "Backend state changed");
                *state = to;
            }
        }
    }

    /// Health-check the live backend without surfacing failures.
    ///
    /// Does nothing while degraded: there is no automatic re-probe.
    pub async fn probe(&self) -> BackendState {
        match self.state() {
            BackendState::Degraded => BackendState::Degraded,
            BackendState::Live => {
                if let Err(e) = self.live.health().await {
                    debug!(error = %e, "Live backend stopped answering health checks");
                    self.transition(BackendState::Degraded, "health check failed");
                }
                self.state()
            }
            BackendState::Offline => {
                match self.live.health().await {
                    Ok(health) => {
                        debug!(status = %health.status, "Live backend reachable");
                        self.transition(BackendState::Live, "health check succeeded");
                    }
                    Err(e) => debug!(error = %e, "Live backend not reachable, staying offline"),
                }
                self.state()
            }
        }
    }

    /// Explicit user request to use the live backend again.
    pub async fn switch_to_real_backend(&self) -> Result<HealthStatus, ApiError> {
        match self.live.health().await {
            Ok(health) => {
                self.transition(BackendState::Live, "switched to real backend");
                Ok(health)
            }
            Err(e) => {
                warn!(error = %e, "Real backend unavailable");
                self.transition(BackendState::Offline, "real backend unavailable");
                Err(e)
            }
        }
    }

    pub fn switch_to_local(&self) {
        self.transition(BackendState::Offline, "switched to local mode");
    }

    async fn route<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, ApiError>
    where
        F: Fn(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if self.state().uses_live_backend() {
            match call(self.live.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        operation,
                        unreachable = e.is_unreachable(),
                        error = %e,
                        "Live backend call failed, falling back to local"
                    );
                    self.transition(BackendState::Degraded, operation);
                }
            }
        }
        call(self.fallback.clone()).await
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.route("health", |b| async move { b.health().await }).await
    }

    pub async fn list(&self, resource: Resource) -> Result<Vec<Value>, ApiError> {
        self.route("list", move |b| async move { b.list(resource).await })
            .await
    }

    /// `list` deserialized into a model type.
    pub async fn list_as<T: DeserializeOwned>(&self, resource: Resource) -> Result<Vec<T>, ApiError> {
        self.list(resource)
            .await?
            .into_iter()
            .map(|record| {
                serde_json::from_value(record)
                    .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", resource, e)))
            })
            .collect()
    }

    pub async fn get_patients(&self) -> Result<Vec<Patient>, ApiError> {
        self.list_as(Resource::Patients).await
    }

    pub async fn create(&self, resource: Resource, body: Value) -> Result<Value, ApiError> {
        self.route("create", move |b| {
            let body = body.clone();
            async move { b.create(resource, body).await }
        })
        .await
    }

    pub async fn update(&self, resource: Resource, id: &str, body: Value) -> Result<Value, ApiError> {
        self.route("update", move |b| {
            let body = body.clone();
            let id = id.to_string();
            async move { b.update(resource, &id, body).await }
        })
        .await
    }

    pub async fn delete(&self, resource: Resource, id: &str) -> Result<Value, ApiError> {
        self.route("delete", move |b| {
            let id = id.to_string();
            async move { b.delete(resource, &id).await }
        })
        .await
    }

    pub async fn test_connection(&self, kind: &str) -> Result<ConnectionTest, ApiError> {
        self.route("test-connection", move |b| {
            let kind = kind.to_string();
            async move { b.test_connection(&kind).await }
        })
        .await
    }

    /// Open a time entry for `employee_id` starting now.
    pub async fn clock_in(&self, employee_id: &str) -> Result<TimeEntry, ApiError> {
        let entry = TimeEntry::start(employee_id, Utc::now());
        let body = json!({
            "employeeId": entry.employee_id,
            "clockIn": entry.clock_in,
        });
        let created = self.create(Resource::TimeEntries, body).await?;
        serde_json::from_value(created).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Close an open time entry now.
    pub async fn clock_out(&self, entry: &TimeEntry) -> Result<TimeEntry, ApiError> {
        let mut closed = entry.clone();
        closed.clock_out = Some(Utc::now());
        let body = serde_json::to_value(&closed).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let updated = self.update(Resource::TimeEntries, &entry.id, body).await?;
        serde_json::from_value(updated).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LocalFallback;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scriptable live backend: answers while `up` is true.
    #[derive(Default)]
    struct FakeLive {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeLive {
        fn up() -> Arc<Self> {
            let fake = Self::default();
            fake.up.store(true, Ordering::SeqCst);
            Arc::new(fake)
        }

        fn down() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn check(&self) -> Result<(), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ApiError::ServerError {
                    status: 503,
                    body: "down".to_string(),
                })
            }
        }
    }

    #[async_trait]
    impl Backend for FakeLive {
        async fn health(&self) -> Result<HealthStatus, ApiError> {
            self.check()?;
            Ok(HealthStatus {
                status: "ok".to_string(),
                database: None,
                timestamp: None,
            })
        }

        async fn list(&self, _resource: Resource) -> Result<Vec<Value>, ApiError> {
            self.check()?;
            Ok(vec![json!({"id": "live-1", "firstName": "Live", "lastName": "Patient"})])
        }

        async fn create(&self, _resource: Resource, body: Value) -> Result<Value, ApiError> {
            self.check()?;
            Ok(body)
        }

        async fn update(&self, _resource: Resource, _id: &str, body: Value) -> Result<Value, ApiError> {
            self.check()?;
            Ok(body)
        }

        async fn delete(&self, _resource: Resource, id: &str) -> Result<Value, ApiError> {
            self.check()?;
            Ok(json!({"id": id}))
        }

        async fn test_connection(&self, kind: &str) -> Result<ConnectionTest, ApiError> {
            self.check()?;
            Ok(ConnectionTest {
                success: true,
                message: format!("{} ok", kind),
            })
        }
    }

    fn manager(live: Arc<FakeLive>) -> ApiManager {
        ApiManager::new(live, Arc::new(LocalFallback::new(Duration::ZERO)))
    }

    #[tokio::test]
    async fn test_starts_offline_and_probe_goes_live() {
        let api = manager(FakeLive::up());
        assert_eq!(api.state(), BackendState::Offline);
        assert_eq!(api.probe().await, BackendState::Live);
    }

    #[tokio::test]
    async fn test_failed_probe_stays_offline() {
        let api = manager(FakeLive::down());
        assert_eq!(api.probe().await, BackendState::Offline);
    }

    #[tokio::test]
    async fn test_failed_health_check_while_live_degrades() {
        let live = FakeLive::up();
        let api = manager(live.clone());
        assert_eq!(api.probe().await, BackendState::Live);

        live.up.store(false, Ordering::SeqCst);
        assert_eq!(api.probe().await, BackendState::Degraded);

        // Degraded is sticky until the user switches back
        live.up.store(true, Ordering::SeqCst);
        assert_eq!(api.probe().await, BackendState::Degraded);
        api.switch_to_real_backend().await.unwrap();
        assert_eq!(api.state(), BackendState::Live);
    }

    #[tokio::test]
    async fn test_offline_uses_fallback_without_touching_live() {
        let live = FakeLive::up();
        let api = manager(live.clone());

        let patients = api.get_patients().await.unwrap();
        assert!(patients.is_empty());
        assert_eq!(live.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_serves_calls() {
        let api = manager(FakeLive::up());
        api.probe().await;

        let patients = api.get_patients().await.unwrap();
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].full_name(), "Live Patient");
    }

    #[tokio::test]
    async fn test_failure_degrades_and_falls_back_for_rest_of_session() {
        let live = FakeLive::up();
        let api = manager(live.clone());
        api.probe().await;

        live.up.store(false, Ordering::SeqCst);
        let created = api
            .create(Resource::Inventory, json!({"name": "Ink", "quantity": 2}))
            .await
            .unwrap();
        assert_eq!(api.state(), BackendState::Degraded);
        assert!(created.get("createdAt").is_some(), "served by the local fallback");

        // Backend recovers, but nothing re-probes automatically
        live.up.store(true, Ordering::SeqCst);
        let calls_before = live.calls.load(Ordering::SeqCst);
        api.list(Resource::Inventory).await.unwrap();
        assert_eq!(api.probe().await, BackendState::Degraded);
        assert_eq!(live.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_explicit_switches() {
        let live = FakeLive::down();
        let api = manager(live.clone());

        assert!(api.switch_to_real_backend().await.is_err());
        assert_eq!(api.state(), BackendState::Offline);

        live.up.store(true, Ordering::SeqCst);
        api.switch_to_real_backend().await.unwrap();
        assert_eq!(api.state(), BackendState::Live);

        api.switch_to_local();
        assert_eq!(api.state(), BackendState::Offline);
    }

    #[tokio::test]
    async fn test_clock_in_and_out_via_fallback() {
        let api = manager(FakeLive::down());
        let entry = api.clock_in("E1").await.unwrap();
        assert!(entry.is_open());
        assert!(!entry.id.is_empty());

        let closed = api.clock_out(&entry).await.unwrap();
        assert_eq!(closed.id, entry.id);
        assert!(!closed.is_open());
    }

    #[tokio::test]
    async fn test_test_connection_routes() {
        let api = manager(FakeLive::up());
        let offline = api.test_connection("mongodb").await.unwrap();
        assert!(offline.message.starts_with("Local mode"));

        api.probe().await;
        let live = api.test_connection("mongodb").await.unwrap();
        assert_eq!(live.message, "mongodb ok");
    }
}
