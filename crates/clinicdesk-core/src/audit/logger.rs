use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::details::{diff, shape};
use super::entry::{Actor, AuditAction, AuditLogEntry, AuditType, RecordOptions};
use super::export::{self, AuditExport, ExportFormat};
use super::filter::AuditFilter;
use super::AuditError;
use crate::store::{load_json, save_json, KeyValueStore, StoreError};

/// Key the journal is stored under.
pub const AUDIT_LOG_KEY: &str = "auditLogs";

/// Key of the per-session identity in the session store.
pub const SESSION_KEY: &str = "auditSessionId";

/// Maximum number of entries kept; the oldest are trimmed first.
pub const MAX_ENTRIES: usize = 1000;

/// Default age limit applied by `prune`.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Buffer for local entry notifications.
const EVENT_CAPACITY: usize = 128;

const SOURCE: &str = "clinicdesk";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
}

/// Append-only journal of state-changing actions.
///
/// Recording never fails from the caller's point of view: storage errors
/// are logged and the action proceeds. Every recorded entry is also
/// published to local subscribers.
pub struct AuditLogger {
    store: Arc<dyn KeyValueStore>,
    session_id: String,
    actor: RwLock<Actor>,
    events: broadcast::Sender<AuditLogEntry>,
    pruned: AtomicBool,
    write_lock: Mutex<()>,
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

impl AuditLogger {
    /// `store` holds the journal; `session` holds the session identity and
    /// should live only as long as the session does.
    pub fn new(store: Arc<dyn KeyValueStore>, session: &dyn KeyValueStore) -> Self {
        let session_id = match session.get_item(SESSION_KEY) {
            Ok(Some(id)) => id,
            other => {
                if let Err(e) = other {
                    warn!(error = %e, "Failed to read audit session id");
                }
                let id = format!("session_{}_{}", Utc::now().timestamp_millis(), random_token(9));
                if let Err(e) = session.set_item(SESSION_KEY, &id) {
                    warn!(error = %e, "Failed to persist audit session id");
                }
                id
            }
        };
        debug!(session_id = %session_id, "Audit logger ready");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            session_id,
            actor: RwLock::new(Actor::system()),
            events,
            pruned: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn set_actor(&self, actor: Actor) {
        match self.actor.write() {
            Ok(mut current) => *current = actor,
            Err(_) => error!("Audit actor lock poisoned"),
        }
    }

    pub fn actor(&self) -> Actor {
        self.actor.read().map(|a| a.clone()).unwrap_or_default()
    }

    /// Receive every entry recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditLogEntry> {
        self.events.subscribe()
    }

    fn load_entries(&self) -> Result<Vec<AuditLogEntry>, StoreError> {
        Ok(load_json(self.store.as_ref(), AUDIT_LOG_KEY)?.unwrap_or_default())
    }

    fn save_entries(&self, entries: &[AuditLogEntry]) -> Result<(), StoreError> {
        save_json(self.store.as_ref(), AUDIT_LOG_KEY, entries)
    }

    fn append(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::poisoned("audit journal"))?;
        let mut entries = self.load_entries()?;
        entries.push(entry.clone());
        if entries.len() > MAX_ENTRIES {
            let excess = entries.len() - MAX_ENTRIES;
            entries.drain(..excess);
        }
        self.save_entries(&entries)
    }

    fn build(
        &self,
        entry_type: AuditType,
        action: AuditAction,
        data: &Value,
        options: RecordOptions,
    ) -> AuditLogEntry {
        let now = Utc::now();
        let actor = self.actor();
        let shaped = shape(
            entry_type,
            action,
            data,
            options.old_value.as_ref(),
            options.new_value.as_ref(),
        );

        let changes = options.changes.unwrap_or_else(|| match (&options.old_value, &options.new_value) {
            (Some(old), Some(new)) => diff(old, new),
            _ => Vec::new(),
        });

        let mut metadata = json!({ "source": SOURCE, "appVersion": env!("CARGO_PKG_VERSION") });
        if let (Some(Value::Object(extra)), Some(base)) = (options.metadata, metadata.as_object_mut()) {
            base.extend(extra);
        }

        AuditLogEntry {
            id: format!("audit_{}_{}", now.timestamp_millis(), random_token(9)),
            timestamp: now,
            entry_type,
            action,
            user_id: actor.id,
            user_name: actor.name,
            user_role: actor.role,
            entity_id: options.entity_id.or(shaped.entity_id),
            entity_name: options.entity_name.or(shaped.entity_name),
            details: shaped.details,
            old_value: options.old_value,
            new_value: options.new_value,
            changes,
            reason: options.reason,
            session_id: self.session_id.clone(),
            metadata,
        }
    }

    /// Record one action. Returns the stored entry, or `None` if it could
    /// not be persisted (the failure is logged, never raised).
    pub fn record(
        &self,
        entry_type: AuditType,
        action: AuditAction,
        data: Value,
        options: RecordOptions,
    ) -> Option<AuditLogEntry> {
        let entry = self.build(entry_type, action, &data, options);

        if let Err(e) = self.append(&entry) {
            error!(
                entry_type = %entry_type,
                action = %action,
                error = %e,
                "Failed to record audit entry"
            );
            return None;
        }

        debug!(id = %entry.id, entry_type = %entry_type, action = %action, "Recorded audit entry");
        // No subscribers is fine
        let _ = self.events.send(entry.clone());
        Some(entry)
    }

    fn record_serialized<T: Serialize>(
        &self,
        entry_type: AuditType,
        action: AuditAction,
        data: &T,
        options: RecordOptions,
    ) -> Option<AuditLogEntry> {
        match serde_json::to_value(data) {
            Ok(value) => self.record(entry_type, action, value, options),
            Err(e) => {
                error!(entry_type = %entry_type, error = %e, "Failed to serialize audit data");
                None
            }
        }
    }

    pub fn log_patient<T: Serialize>(
        &self,
        action: AuditAction,
        patient: &T,
        options: RecordOptions,
    ) -> Option<AuditLogEntry> {
        self.record_serialized(AuditType::Patient, action, patient, options)
    }

    pub fn log_employee<T: Serialize>(
        &self,
        action: AuditAction,
        employee: &T,
        options: RecordOptions,
    ) -> Option<AuditLogEntry> {
        self.record_serialized(AuditType::Employee, action, employee, options)
    }

    pub fn log_inventory<T: Serialize>(
        &self,
        action: AuditAction,
        item: &T,
        options: RecordOptions,
    ) -> Option<AuditLogEntry> {
        self.record_serialized(AuditType::Inventory, action, item, options)
    }

    pub fn log_user<T: Serialize>(
        &self,
        action: AuditAction,
        user: &T,
        options: RecordOptions,
    ) -> Option<AuditLogEntry> {
        self.record_serialized(AuditType::User, action, user, options)
    }

    pub fn log_system(
        &self,
        action: AuditAction,
        details: Value,
        options: RecordOptions,
    ) -> Option<AuditLogEntry> {
        self.record(AuditType::System, action, details, options)
    }

    fn try_query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, StoreError> {
        let mut entries: Vec<AuditLogEntry> = self
            .load_entries()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Entries matching `filter`, newest first. Empty on storage failure.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        self.try_query(filter).unwrap_or_else(|e| {
            error!(error = %e, "Failed to query audit log");
            Vec::new()
        })
    }

    /// Render the entries matching `filter` and record the export itself.
    pub fn export(&self, filter: &AuditFilter, format: ExportFormat) -> Result<AuditExport, AuditError> {
        let entries = self.try_query(filter)?;
        let content = export::render(&entries, format)?;
        let record_count = entries.len();

        self.log_system(
            AuditAction::Export,
            json!({
                "recordCount": record_count,
                "format": format.extension(),
                "filters": filter,
            }),
            RecordOptions::new().entity_name("Audit Log Export"),
        );
        info!(record_count, format = %format, "Exported audit log");

        Ok(AuditExport {
            file_name: export::file_name(format, Utc::now()),
            format,
            record_count,
            content,
        })
    }

    /// Cutoff for a retention period, or `None` when the period is
    /// negative or too large to represent.
    fn retention_cutoff(retention_days: i64) -> Option<DateTime<Utc>> {
        if retention_days < 0 {
            return None;
        }
        Duration::try_days(retention_days).and_then(|period| Utc::now().checked_sub_signed(period))
    }

    fn remove_older_than(&self, retention_days: i64) -> Result<usize, StoreError> {
        let Some(cutoff) = Self::retention_cutoff(retention_days) else {
            warn!(retention_days, "Retention period out of range, nothing pruned");
            return Ok(0);
        };
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::poisoned("audit journal"))?;
        let mut entries = self.load_entries()?;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            self.save_entries(&entries)?;
        }
        Ok(removed)
    }

    /// Remove expired entries and describe the cleanup in a `system/delete`
    /// entry when anything was removed.
    fn cleanup(&self, retention_days: i64) -> Result<usize, StoreError> {
        let removed = self.remove_older_than(retention_days)?;
        if removed == 0 {
            debug!(retention_days, "No audit entries to prune");
            return Ok(0);
        }
        self.log_system(
            AuditAction::Delete,
            json!({
                "action": "cleanup",
                "removedCount": removed,
                "retentionDays": retention_days,
            }),
            RecordOptions::new()
                .entity_name("Audit Log")
                .reason("Retention cleanup"),
        );
        info!(removed, retention_days, "Pruned audit log");
        Ok(removed)
    }

    /// Automatic retention cleanup, run at most once per session.
    ///
    /// Returns the number of removed entries; 0 on later calls in the same
    /// session and on failure. Negative or out-of-range periods remove
    /// nothing.
    pub fn prune(&self, retention_days: i64) -> usize {
        if self.pruned.swap(true, Ordering::SeqCst) {
            debug!("Audit log already pruned this session");
            return 0;
        }

        self.cleanup(retention_days).unwrap_or_else(|e| {
            // Allow another attempt later in the session
            self.pruned.store(false, Ordering::SeqCst);
            warn!(error = %e, "Failed to prune audit log");
            0
        })
    }

    /// Cleanup requested explicitly by a user. Not limited by the session
    /// guard, and storage failures are returned.
    pub fn prune_now(&self, retention_days: i64) -> Result<usize, AuditError> {
        Ok(self.cleanup(retention_days)?)
    }

    pub fn stats(&self) -> AuditStats {
        let entries = self.query(&AuditFilter::default());
        let mut stats = AuditStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            *stats.by_type.entry(entry.entry_type.to_string()).or_default() += 1;
            *stats.by_action.entry(entry.action.to_string()).or_default() += 1;
        }
        stats
    }
}
