//! Application context wiring the services together.
//!
//! `AppContext` owns one instance of each service (cache, audit journal,
//! preferences, API manager) and implements the user-facing actions that
//! touch several of them at once.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::{ApiManager, Backend, BackendState, HttpBackend, LocalFallback, Resource};
use crate::audit::{Actor, AuditAction, AuditLogger, AuditStats, RecordOptions};
use crate::cache::{BroadcastHub, CacheSync, Collection, CollectionStatus};
use crate::config::Config;
use crate::models::{Appointment, Employee, InventoryItem, TimeEntry};
use crate::preferences::{DisplaySurface, PreferencesManager, TracingDisplay};
use crate::store::{
    load_json, save_json, FileKeyValueStore, JsonFileOpener, KeyValueStore, MemoryKeyValueStore,
    StoreOpener,
};

/// Settings key remembering the entry opened by the last clock-in, so a
/// later process can close it while the backend is unreachable.
pub const OPEN_TIME_ENTRY_KEY: &str = "openTimeEntry";

/// Records that parse as `T`; the rest are skipped.
fn typed<T: DeserializeOwned>(records: &[Value]) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| serde_json::from_value(record.clone()).ok())
        .collect()
}

fn reorder_names(items: &[InventoryItem]) -> Vec<String> {
    items
        .iter()
        .filter(|item| item.needs_reorder())
        .map(|item| item.name.clone())
        .collect()
}

fn cancelled_count(appointments: &[Appointment]) -> usize {
    appointments.iter().filter(|a| a.is_cancelled()).count()
}

/// Storage, display and backend implementations an `AppContext` runs on.
pub struct Ports {
    pub opener: Arc<dyn StoreOpener>,
    pub settings: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
    pub display: Arc<dyn DisplaySurface>,
    pub live: Arc<dyn Backend>,
    pub fallback: Arc<dyn Backend>,
    pub hub: Arc<BroadcastHub>,
}

impl Ports {
    /// File-backed storage under the configured data directory, the HTTP
    /// backend at the resolved base URL, and a log-only display.
    pub fn from_config(config: &Config) -> Result<Self> {
        let live = HttpBackend::new(&config.base_url(), config.request_timeout())
            .context("Failed to create HTTP client")?;
        debug!(base_url = %live.base_url(), "Live backend configured");
        Ok(Self {
            opener: Arc::new(JsonFileOpener::new(config.store_dir()?)),
            settings: Arc::new(FileKeyValueStore::new(config.settings_path()?)),
            session: Arc::new(MemoryKeyValueStore::new()),
            display: Arc::new(TracingDisplay),
            live: Arc::new(live),
            fallback: Arc::new(LocalFallback::new(config.fallback_delay())),
            hub: Arc::new(BroadcastHub::default()),
        })
    }
}

/// Outcome of `AppContext::sync_all`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub backend: String,
    pub inventory_count: usize,
    pub appointment_count: usize,
    /// Items at or below their reorder level.
    pub reorder_needed: Vec<String>,
    pub cancelled_appointments: usize,
    pub synced_at: DateTime<Utc>,
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub backend: String,
    pub database_status: String,
    pub preferences_key: String,
    pub cache: Vec<CollectionStatus>,
    /// Cached items at or below their reorder level.
    pub reorder_needed: Vec<String>,
    pub cancelled_appointments: usize,
    pub audit: AuditStats,
}

pub struct AppContext {
    config: Config,
    settings: Arc<dyn KeyValueStore>,
    pub cache: CacheSync,
    pub audit: Arc<AuditLogger>,
    pub preferences: PreferencesManager,
    pub api: ApiManager,
}

impl AppContext {
    pub fn from_config(config: Config) -> Result<Self> {
        let ports = Ports::from_config(&config)?;
        Ok(Self::assemble(config, ports))
    }

    pub fn assemble(config: Config, ports: Ports) -> Self {
        let audit = Arc::new(AuditLogger::new(ports.settings.clone(), ports.session.as_ref()));
        audit.set_actor(config.actor());

        let preferences = PreferencesManager::new(ports.settings.clone(), ports.display);
        preferences.set_user(config.user_email.clone());

        debug!(session_id = %audit.session_id(), "App context assembled");
        Self {
            cache: CacheSync::new(ports.opener, ports.hub),
            api: ApiManager::new(ports.live, ports.fallback),
            settings: ports.settings,
            audit,
            preferences,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Probe the backend and run the once-per-session audit cleanup.
    pub async fn start_session(&self) -> BackendState {
        let state = self.api.probe().await;
        let removed = self.audit.prune(self.config.audit_retention_days);
        debug!(state = %state, removed, "Session started");
        state
    }

    /// Fetch inventory and appointments concurrently and mirror them into
    /// the cache.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let state = self.api.probe().await;
        info!(state = %state, "Syncing inventory and appointments");

        let (inventory, appointments) = futures::join!(
            self.api.list(Resource::Inventory),
            self.api.list(Resource::Appointments)
        );
        let inventory = inventory.context("Failed to fetch inventory")?;
        let appointments = appointments.context("Failed to fetch appointments")?;

        if !self.cache.cache_collection(Collection::Inventory, &inventory).await {
            return Err(anyhow!("Failed to cache inventory"));
        }
        if !self.cache.cache_collection(Collection::Appointments, &appointments).await {
            return Err(anyhow!("Failed to cache appointments"));
        }

        let report = SyncReport {
            backend: self.api.state().to_string(),
            inventory_count: inventory.len(),
            appointment_count: appointments.len(),
            reorder_needed: reorder_names(&typed::<InventoryItem>(&inventory)),
            cancelled_appointments: cancelled_count(&typed::<Appointment>(&appointments)),
            synced_at: Utc::now(),
        };
        self.audit.log_system(
            AuditAction::Access,
            json!({
                "resource": "cache-sync",
                "backend": report.backend,
                "inventoryCount": report.inventory_count,
                "appointmentCount": report.appointment_count,
                "reorderCount": report.reorder_needed.len(),
            }),
            RecordOptions::new().entity_name("Local cache"),
        );
        Ok(report)
    }

    /// User-requested audit cleanup. Runs even when the session cleanup
    /// already happened.
    pub fn prune_audit(&self, retention_days: i64) -> Result<usize> {
        self.audit
            .prune_now(retention_days)
            .context("Failed to prune audit log")
    }

    pub async fn status(&self) -> StatusReport {
        let items: Vec<InventoryItem> = self.cache.get_collection(Collection::Inventory).await;
        let appointments: Vec<Appointment> =
            self.cache.get_collection(Collection::Appointments).await;
        StatusReport {
            backend: self.api.state().to_string(),
            database_status: self.preferences.database_status().to_string(),
            preferences_key: self.preferences.storage_key(),
            cache: self.cache.status(self.config.cache_stale_minutes).await,
            reorder_needed: reorder_names(&items),
            cancelled_appointments: cancelled_count(&appointments),
            audit: self.audit.stats(),
        }
    }

    /// Make `email` the acting user for audit entries and preferences.
    pub fn sign_in(&mut self, email: &str, name: Option<&str>, role: Option<&str>) -> Actor {
        self.config.set_user(Some(email), name, role);
        let actor = self.config.actor();
        self.audit.set_actor(actor.clone());
        self.preferences.set_user(actor.email.clone());
        self.audit.log_user(
            AuditAction::Login,
            &json!({ "email": email, "name": actor.name, "role": actor.role }),
            RecordOptions::new().entity_id(actor.id.clone()),
        );
        info!(user = %actor.name, "Signed in");
        actor
    }

    /// Log the current user out and fall back to the system actor.
    /// Returns `None` when nobody was signed in.
    pub fn sign_out(&mut self) -> Option<Actor> {
        self.config.user_email.as_ref()?;
        let actor = self.config.actor();
        self.audit.log_user(
            AuditAction::Logout,
            &json!({ "email": actor.email, "name": actor.name, "role": actor.role }),
            RecordOptions::new().entity_id(actor.id.clone()),
        );

        self.config.set_user(None, None, None);
        self.audit.set_actor(Actor::system());
        self.preferences.set_user(None);
        info!(user = %actor.name, "Signed out");
        Some(actor)
    }

    /// Create an inventory item, audit it and add it to the cached list.
    pub async fn add_inventory_item(
        &self,
        name: &str,
        category: Option<&str>,
        quantity: i64,
    ) -> Result<InventoryItem> {
        let body = json!({
            "name": name,
            "category": category,
            "quantity": quantity,
        });
        let created = self
            .api
            .create(Resource::Inventory, body)
            .await
            .context("Failed to create inventory item")?;
        let item: InventoryItem =
            serde_json::from_value(created.clone()).context("Backend returned an invalid item")?;

        self.audit.log_inventory(
            AuditAction::Create,
            &item,
            RecordOptions::new().entity_id(item.id.clone()),
        );

        let mut cached: Vec<Value> = self.cache.get_collection(Collection::Inventory).await;
        cached.push(created);
        if !self.cache.cache_collection(Collection::Inventory, &cached).await {
            warn!(id = %item.id, "Created item but failed to update the cache");
        }
        Ok(item)
    }

    /// Open a time entry. Inactive employees are refused; unknown ids are
    /// accepted since the employee list may not be reachable.
    pub async fn clock_in(&self, employee_id: &str) -> Result<TimeEntry> {
        let employee = self.find_employee(employee_id).await;
        if let Some(ref employee) = employee {
            if !employee.active {
                bail!("Employee {} is inactive", employee.name);
            }
        }

        let entry = self
            .api
            .clock_in(employee_id)
            .await
            .context("Failed to clock in")?;

        if let Err(e) = save_json(self.settings.as_ref(), OPEN_TIME_ENTRY_KEY, &entry) {
            warn!(error = %e, "Failed to remember open time entry");
        }
        self.audit.log_employee(
            AuditAction::Update,
            &json!({
                "employeeId": employee_id,
                "name": employee.map(|e| e.name),
                "clockIn": entry.clock_in,
            }),
            RecordOptions::new()
                .entity_id(employee_id)
                .reason("Clock in"),
        );
        Ok(entry)
    }

    /// Close the newest open time entry, optionally for one employee.
    pub async fn clock_out(&self, employee_id: Option<&str>) -> Result<TimeEntry> {
        let open = self
            .find_open_entry(employee_id)
            .await
            .ok_or_else(|| anyhow!("No open time entry to clock out of"))?;

        let closed = self
            .api
            .clock_out(&open)
            .await
            .context("Failed to clock out")?;

        if let Err(e) = self.settings.remove_item(OPEN_TIME_ENTRY_KEY) {
            warn!(error = %e, "Failed to forget open time entry");
        }
        self.audit.log_employee(
            AuditAction::Update,
            &json!({ "employeeId": closed.employee_id, "clockOut": closed.clock_out }),
            RecordOptions::new()
                .entity_id(closed.employee_id.clone())
                .old_value(json!({ "clockOut": Value::Null }))
                .new_value(json!({ "clockOut": closed.clock_out }))
                .reason("Clock out"),
        );
        Ok(closed)
    }

    async fn find_employee(&self, employee_id: &str) -> Option<Employee> {
        match self.api.list_as::<Employee>(Resource::Employees).await {
            Ok(employees) => employees.into_iter().find(|e| e.id == employee_id),
            Err(e) => {
                warn!(error = %e, "Failed to list employees");
                None
            }
        }
    }

    async fn find_open_entry(&self, employee_id: Option<&str>) -> Option<TimeEntry> {
        let matches = |entry: &TimeEntry| {
            entry.is_open() && employee_id.map_or(true, |id| entry.employee_id == id)
        };

        match self.api.list_as::<TimeEntry>(Resource::TimeEntries).await {
            Ok(entries) => {
                if let Some(entry) = entries
                    .into_iter()
                    .filter(|e| matches(e))
                    .max_by_key(|e| e.clock_in)
                {
                    return Some(entry);
                }
            }
            Err(e) => warn!(error = %e, "Failed to list time entries"),
        }

        match load_json::<TimeEntry>(self.settings.as_ref(), OPEN_TIME_ENTRY_KEY) {
            Ok(remembered) => remembered.filter(|e| matches(e)),
            Err(e) => {
                warn!(error = %e, "Failed to read remembered time entry");
                None
            }
        }
    }
}
