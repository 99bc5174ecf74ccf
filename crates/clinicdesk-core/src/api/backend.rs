use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiError;

/// REST resources exposed under `/api/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Patients,
    Employees,
    Inventory,
    Appointments,
    TimeEntries,
}

impl Resource {
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Patients => "patients",
            Resource::Employees => "employees",
            Resource::Inventory => "inventory",
            Resource::Appointments => "appointments",
            Resource::TimeEntries => "time-entries",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Body of `POST /api/test-connection`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

/// CRUD surface shared by the live HTTP backend and the local fallback.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn health(&self) -> Result<HealthStatus, ApiError>;

    async fn list(&self, resource: Resource) -> Result<Vec<Value>, ApiError>;

    async fn create(&self, resource: Resource, body: Value) -> Result<Value, ApiError>;

    async fn update(&self, resource: Resource, id: &str, body: Value) -> Result<Value, ApiError>;

    async fn delete(&self, resource: Resource, id: &str) -> Result<Value, ApiError>;

    async fn test_connection(&self, kind: &str) -> Result<ConnectionTest, ApiError>;
}
