use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::{Backend, ConnectionTest, HealthStatus, Resource};
use super::ApiError;

/// Default simulated latency of the local fallback.
pub const DEFAULT_FALLBACK_DELAY_MS: u64 = 150;

/// In-process stand-in for the REST API.
///
/// Every call resolves after a fixed delay. Created records get ids taken
/// from the current time (strictly increasing) and stay in memory for the
/// lifetime of the fallback, so later `list` calls return them.
pub struct LocalFallback {
    delay: Duration,
    records: Mutex<HashMap<Resource, Vec<Value>>>,
    last_id: AtomicI64,
}

impl LocalFallback {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            records: Mutex::new(HashMap::new()),
            last_id: AtomicI64::new(0),
        }
    }

    async fn simulate_latency(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn next_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_id.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last_id
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for LocalFallback {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_FALLBACK_DELAY_MS))
    }
}

fn id_of(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Backend for LocalFallback {
    async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.simulate_latency().await;
        Ok(HealthStatus {
            status: "local".to_string(),
            database: Some("mock".to_string()),
            timestamp: Some(Utc::now().to_rfc3339()),
        })
    }

    async fn list(&self, resource: Resource) -> Result<Vec<Value>, ApiError> {
        self.simulate_latency().await;
        let records = self.records.lock().await;
        Ok(records.get(&resource).cloned().unwrap_or_default())
    }

    async fn create(&self, resource: Resource, body: Value) -> Result<Value, ApiError> {
        self.simulate_latency().await;
        let mut record = match body {
            Value::Object(map) => map,
            other => {
                return Err(ApiError::InvalidResponse(format!(
                    "expected a JSON object for {}, got {}",
                    resource, other
                )))
            }
        };
        record.insert("id".to_string(), json!(self.next_id()));
        record.insert("createdAt".to_string(), json!(Utc::now().to_rfc3339()));
        let record = Value::Object(record);

        debug!(resource = %resource, id = ?id_of(&record), "Created record locally");
        self.records
            .lock()
            .await
            .entry(resource)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, resource: Resource, id: &str, body: Value) -> Result<Value, ApiError> {
        self.simulate_latency().await;
        let mut records = self.records.lock().await;
        let existing = records
            .entry(resource)
            .or_default()
            .iter_mut()
            .find(|r| id_of(r).as_deref() == Some(id));

        let mut merged = match existing.as_deref() {
            Some(Value::Object(current)) => current.clone(),
            _ => serde_json::Map::new(),
        };
        if let Value::Object(changes) = body {
            merged.extend(changes);
        }
        merged.insert("id".to_string(), json!(id));
        merged.insert("updatedAt".to_string(), json!(Utc::now().to_rfc3339()));
        let merged = Value::Object(merged);

        if let Some(slot) = existing {
            *slot = merged.clone();
        }
        Ok(merged)
    }

    async fn delete(&self, resource: Resource, id: &str) -> Result<Value, ApiError> {
        self.simulate_latency().await;
        let mut records = self.records.lock().await;
        if let Some(list) = records.get_mut(&resource) {
            list.retain(|r| id_of(r).as_deref() != Some(id));
        }
        Ok(json!({ "success": true, "id": id }))
    }

    async fn test_connection(&self, kind: &str) -> Result<ConnectionTest, ApiError> {
        self.simulate_latency().await;
        Ok(ConnectionTest {
            success: true,
            message: format!("Local mode: {} connection simulated with mock data", kind),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> LocalFallback {
        LocalFallback::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let local = fallback();
        let a = local.create(Resource::Inventory, json!({"name": "Ink"})).await.unwrap();
        let b = local.create(Resource::Inventory, json!({"name": "Foil"})).await.unwrap();

        let a_id: i64 = a["id"].as_str().unwrap().parse().unwrap();
        let b_id: i64 = b["id"].as_str().unwrap().parse().unwrap();
        assert!(b_id > a_id);
        assert_eq!(local.list(Resource::Inventory).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_merges_existing_record() {
        let local = fallback();
        let created = local
            .create(Resource::Patients, json!({"firstName": "Ana", "lastName": "Ruiz"}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let updated = local
            .update(Resource::Patients, &id, json!({"phone": "555"}))
            .await
            .unwrap();
        assert_eq!(updated["firstName"], "Ana");
        assert_eq!(updated["phone"], "555");

        let listed = local.list(Resource::Patients).await.unwrap();
        assert_eq!(listed[0]["phone"], "555");
    }

    #[tokio::test]
    async fn test_update_unknown_id_echoes_body() {
        let local = fallback();
        let updated = local
            .update(Resource::Employees, "E9", json!({"position": "Lead"}))
            .await
            .unwrap();
        assert_eq!(updated["id"], "E9");
        assert_eq!(updated["position"], "Lead");
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let local = fallback();
        let created = local.create(Resource::Appointments, json!({"startTime": "x"})).await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let result = local.delete(Resource::Appointments, &id).await.unwrap();
        assert_eq!(result["success"], true);
        assert!(local.list(Resource::Appointments).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_non_object() {
        let local = fallback();
        assert!(local.create(Resource::Inventory, json!([1, 2])).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_is_applied() {
        let local = LocalFallback::new(Duration::from_millis(150));
        let started = tokio::time::Instant::now();
        local.health().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
