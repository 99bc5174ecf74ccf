//! End-to-end behavior of `AppContext` on in-memory storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use clinicdesk_core::api::{
    ApiError, Backend, BackendState, ConnectionTest, HealthStatus, LocalFallback, Resource,
};
use clinicdesk_core::audit::{Actor, AuditAction, AuditFilter, AuditType};
use clinicdesk_core::cache::{BroadcastHub, Collection};
use clinicdesk_core::models::InventoryItem;
use clinicdesk_core::preferences::TracingDisplay;
use clinicdesk_core::store::{
    save_json, KeyValueStore, MemoryKeyValueStore, MemoryOpener,
};
use clinicdesk_core::{AppContext, Config, Ports};

/// A server that never answers.
struct Unreachable;

fn down() -> ApiError {
    ApiError::ServerError {
        status: 502,
        body: "bad gateway".to_string(),
    }
}

#[async_trait]
impl Backend for Unreachable {
    async fn health(&self) -> Result<HealthStatus, ApiError> {
        Err(down())
    }
    async fn list(&self, _: Resource) -> Result<Vec<Value>, ApiError> {
        Err(down())
    }
    async fn create(&self, _: Resource, _: Value) -> Result<Value, ApiError> {
        Err(down())
    }
    async fn update(&self, _: Resource, _: &str, _: Value) -> Result<Value, ApiError> {
        Err(down())
    }
    async fn delete(&self, _: Resource, _: &str) -> Result<Value, ApiError> {
        Err(down())
    }
    async fn test_connection(&self, _: &str) -> Result<ConnectionTest, ApiError> {
        Err(down())
    }
}

fn local() -> Arc<LocalFallback> {
    Arc::new(LocalFallback::new(Duration::ZERO))
}

fn ports(live: Arc<dyn Backend>, settings: Arc<dyn KeyValueStore>) -> Ports {
    Ports {
        opener: Arc::new(MemoryOpener::new()),
        settings,
        session: Arc::new(MemoryKeyValueStore::new()),
        display: Arc::new(TracingDisplay),
        live,
        fallback: local(),
        hub: Arc::new(BroadcastHub::default()),
    }
}

fn offline_context(settings: Arc<dyn KeyValueStore>) -> AppContext {
    AppContext::assemble(Config::default(), ports(Arc::new(Unreachable), settings))
}

#[tokio::test]
async fn test_sync_all_caches_both_collections_and_audits() {
    let server = local();
    server
        .create(Resource::Inventory, json!({"name": "Ink", "quantity": 4}))
        .await
        .unwrap();
    server
        .create(Resource::Inventory, json!({"name": "Foil", "quantity": 9}))
        .await
        .unwrap();
    server
        .create(Resource::Appointments, json!({"startTime": "2024-05-01T10:00:00Z"}))
        .await
        .unwrap();

    let ctx = AppContext::assemble(
        Config::default(),
        ports(server, Arc::new(MemoryKeyValueStore::new())),
    );
    assert_eq!(ctx.start_session().await, BackendState::Live);

    let report = ctx.sync_all().await.unwrap();
    assert_eq!(report.backend, "live");
    assert_eq!(report.inventory_count, 2);
    assert_eq!(report.appointment_count, 1);

    let items: Vec<InventoryItem> = ctx.cache.get_collection(Collection::Inventory).await;
    assert_eq!(items.len(), 2);
    assert!(!ctx.cache.is_stale(Collection::Appointments, 5).await);

    let access = ctx.audit.query(
        &AuditFilter::new()
            .entry_type(AuditType::System)
            .action(AuditAction::Access),
    );
    assert_eq!(access.len(), 1);
    assert_eq!(access[0].details["inventoryCount"], 2);
}

#[tokio::test]
async fn test_offline_sync_uses_fallback() {
    let ctx = offline_context(Arc::new(MemoryKeyValueStore::new()));
    assert_eq!(ctx.start_session().await, BackendState::Offline);

    let report = ctx.sync_all().await.unwrap();
    assert_eq!(report.backend, "offline");
    assert_eq!(report.inventory_count, 0);
    assert!(ctx.cache.last_synced(Collection::Inventory).await.is_some());
}

#[tokio::test]
async fn test_add_inventory_item_offline_is_audited_and_cached() {
    let ctx = offline_context(Arc::new(MemoryKeyValueStore::new()));

    let item = ctx.add_inventory_item("Ink", Some("Supplies"), 5).await.unwrap();
    assert!(!item.id.is_empty());
    assert_eq!(item.category.as_deref(), Some("Supplies"));

    let created = ctx.audit.query(
        &AuditFilter::new()
            .entry_type(AuditType::Inventory)
            .action(AuditAction::Create),
    );
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].entity_name.as_deref(), Some("Ink"));
    assert_eq!(created[0].entity_id.as_deref(), Some(item.id.as_str()));
    assert_eq!(created[0].details["initialQuantity"], 5);

    let cached: Vec<InventoryItem> = ctx.cache.get_collection(Collection::Inventory).await;
    assert_eq!(cached, vec![item]);
}

#[tokio::test]
async fn test_clock_out_in_later_session_uses_remembered_entry() {
    let settings: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());

    let first = offline_context(settings.clone());
    let opened = first.clock_in("E7").await.unwrap();
    assert!(opened.is_open());

    // New process: fresh fallback, same settings file
    let second = offline_context(settings);
    let closed = second.clock_out(Some("E7")).await.unwrap();
    assert_eq!(closed.employee_id, "E7");
    assert!(!closed.is_open());

    let updates = second.audit.query(
        &AuditFilter::new()
            .entry_type(AuditType::Employee)
            .action(AuditAction::Update)
            .entity_id("E7"),
    );
    assert_eq!(updates.len(), 2);

    assert!(second.clock_out(None).await.is_err(), "nothing left to close");
}

#[tokio::test]
async fn test_start_session_prunes_expired_audit_entries_once() {
    let settings: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    let old = (Utc::now() - chrono::Duration::days(200)).to_rfc3339();
    save_json(
        settings.as_ref(),
        "auditLogs",
        &json!([{
            "id": "audit_1_old",
            "timestamp": old,
            "type": "patient",
            "action": "access",
            "userId": "u1",
            "userName": "Ana",
            "userRole": "admin",
            "sessionId": "session_old",
        }]),
    )
    .unwrap();

    let ctx = offline_context(settings);
    ctx.start_session().await;
    ctx.start_session().await;

    let entries = ctx.audit.query(&AuditFilter::default());
    assert_eq!(entries.len(), 1, "only the cleanup entry remains");
    assert_eq!(entries[0].entry_type, AuditType::System);
    assert_eq!(entries[0].action, AuditAction::Delete);
    assert_eq!(entries[0].details["removedCount"], 1);
}

#[tokio::test]
async fn test_configured_user_drives_actor_and_preferences() {
    let settings: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    let config = Config {
        user_email: Some("dana@example.com".to_string()),
        user_name: Some("Dana".to_string()),
        user_role: Some("manager".to_string()),
        ..Config::default()
    };
    let ctx = AppContext::assemble(config, ports(Arc::new(Unreachable), settings));

    ctx.preferences.update("theme", json!("dark")).unwrap();
    let status = ctx.status().await;
    assert_eq!(status.preferences_key, "preferences_dana@example.com");
    assert_eq!(status.database_status, "Mock Data");
    assert_eq!(status.backend, "offline");

    let entry = ctx.add_inventory_item("Gloves", None, 1).await.unwrap();
    let logged = ctx.audit.query(&AuditFilter::new().entity_id(entry.id));
    assert_eq!(logged[0].user_name, "Dana");
    assert_eq!(logged[0].user_role, "manager");
}

fn audit_entry_aged(days: i64, id: &str) -> Value {
    json!({
        "id": id,
        "timestamp": (Utc::now() - chrono::Duration::days(days)).to_rfc3339(),
        "type": "patient",
        "action": "access",
        "userId": "u1",
        "userName": "Ana",
        "userRole": "admin",
        "sessionId": "session_old",
    })
}

#[tokio::test]
async fn test_explicit_prune_runs_after_session_cleanup() {
    let settings: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    save_json(
        settings.as_ref(),
        "auditLogs",
        &json!([audit_entry_aged(45, "audit_1_recent"), audit_entry_aged(5, "audit_2_new")]),
    )
    .unwrap();

    let ctx = offline_context(settings);
    ctx.start_session().await;
    assert_eq!(ctx.audit.stats().total, 2, "45 days is inside the default retention");

    assert_eq!(ctx.prune_audit(30).unwrap(), 1);
    assert_eq!(ctx.prune_audit(30).unwrap(), 0);

    let remaining = ctx.audit.query(&AuditFilter::new().entry_type(AuditType::Patient));
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "audit_2_new");
}

#[tokio::test]
async fn test_status_flags_reorders_and_cancellations() {
    let server = local();
    for body in [
        json!({"name": "Ink", "quantity": 2, "reorderLevel": 5}),
        json!({"name": "Foil", "quantity": 9, "reorderLevel": 3}),
        json!({"name": "Tape", "quantity": 0}),
    ] {
        server.create(Resource::Inventory, body).await.unwrap();
    }
    for status in ["scheduled", "Cancelled", "cancelled"] {
        server
            .create(
                Resource::Appointments,
                json!({"startTime": "2024-05-01T10:00:00Z", "status": status}),
            )
            .await
            .unwrap();
    }

    let ctx = AppContext::assemble(
        Config::default(),
        ports(server, Arc::new(MemoryKeyValueStore::new())),
    );
    ctx.start_session().await;
    let report = ctx.sync_all().await.unwrap();
    assert_eq!(report.reorder_needed, vec!["Ink".to_string()]);
    assert_eq!(report.cancelled_appointments, 2);

    let status = ctx.status().await;
    assert_eq!(status.reorder_needed, vec!["Ink".to_string()]);
    assert_eq!(status.cancelled_appointments, 2);
}

#[tokio::test]
async fn test_clock_in_names_employee_and_refuses_inactive() {
    let server = local();
    let active = server
        .create(Resource::Employees, json!({"name": "Lee"}))
        .await
        .unwrap();
    let inactive = server
        .create(Resource::Employees, json!({"name": "Sam", "active": false}))
        .await
        .unwrap();
    let active_id = active["id"].to_string();
    let inactive_id = inactive["id"].to_string();

    let ctx = AppContext::assemble(
        Config::default(),
        ports(server, Arc::new(MemoryKeyValueStore::new())),
    );
    assert_eq!(ctx.start_session().await, BackendState::Live);

    assert!(ctx.clock_in(&inactive_id).await.is_err());
    ctx.clock_in(&active_id).await.unwrap();
    // Unknown ids are accepted
    ctx.clock_in("E404").await.unwrap();

    let entries = ctx.audit.query(&AuditFilter::new().entry_type(AuditType::Employee));
    assert_eq!(entries.len(), 2);
    let lee = ctx.audit.query(&AuditFilter::new().entity_id(active_id));
    assert_eq!(lee[0].entity_name.as_deref(), Some("Lee"));
}

#[tokio::test]
async fn test_sign_in_and_out_switch_actor_and_preferences() {
    let mut ctx = offline_context(Arc::new(MemoryKeyValueStore::new()));
    assert!(ctx.sign_out().is_none());

    let actor = ctx.sign_in("kim@clinic.test", Some("Kim"), Some("admin"));
    assert_eq!(actor.name, "Kim");
    assert_eq!(ctx.audit.actor(), actor);
    assert_eq!(ctx.preferences.storage_key(), "preferences_kim@clinic.test");

    let logins = ctx.audit.query(&AuditFilter::new().action(AuditAction::Login));
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].entry_type, AuditType::User);
    assert_eq!(logins[0].user_name, "Kim");
    assert_eq!(logins[0].details["role"], "admin");

    let signed_out = ctx.sign_out().unwrap();
    assert_eq!(signed_out.email.as_deref(), Some("kim@clinic.test"));
    assert_eq!(ctx.audit.actor(), Actor::system());
    assert_eq!(ctx.preferences.storage_key(), "preferences_guest");

    let logouts = ctx.audit.query(&AuditFilter::new().action(AuditAction::Logout));
    assert_eq!(logouts[0].user_name, "Kim", "logout is recorded by the leaving user");
}
