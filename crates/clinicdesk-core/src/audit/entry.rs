use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of entity an audit entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AuditType {
    Patient,
    Employee,
    Inventory,
    User,
    System,
}

impl AuditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditType::Patient => "patient",
            AuditType::Employee => "employee",
            AuditType::Inventory => "inventory",
            AuditType::User => "user",
            AuditType::System => "system",
        }
    }
}

impl std::fmt::Display for AuditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "patient" => Ok(AuditType::Patient),
            "employee" => Ok(AuditType::Employee),
            "inventory" => Ok(AuditType::Inventory),
            "user" => Ok(AuditType::User),
            "system" => Ok(AuditType::System),
            other => Err(format!("unknown audit type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    Access,
    Export,
    Import,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Access => "access",
            AuditAction::Export => "export",
            AuditAction::Import => "import",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "login" => Ok(AuditAction::Login),
            "logout" => Ok(AuditAction::Logout),
            "access" => Ok(AuditAction::Access),
            "export" => Ok(AuditAction::Export),
            "import" => Ok(AuditAction::Import),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

/// One field that differs between the old and new value of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// The user an audit entry is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: String,
    pub email: Option<String>,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            name: "System".to_string(),
            role: "system".to_string(),
            email: None,
        }
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::system()
    }
}

/// Immutable record of one state-changing or access action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: AuditType,
    pub action: AuditAction,
    pub user_id: String,
    pub user_name: String,
    pub user_role: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    #[serde(default)]
    pub reason: Option<String>,
    pub session_id: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Optional context attached to a recorded action.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    /// Explicit changes; derived from old/new values when absent
    pub changes: Option<Vec<FieldChange>>,
    pub reason: Option<String>,
    pub metadata: Option<Value>,
}

impl RecordOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn entity_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn old_value(mut self, value: Value) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn new_value(mut self, value: Value) -> Self {
        self.new_value = Some(value);
        self
    }

    pub fn changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_and_action_parse_case_insensitive() {
        assert_eq!("Inventory".parse::<AuditType>().unwrap(), AuditType::Inventory);
        assert_eq!("EXPORT".parse::<AuditAction>().unwrap(), AuditAction::Export);
        assert!("billing".parse::<AuditType>().is_err());
    }

    #[test]
    fn test_entry_wire_names() {
        let entry = AuditLogEntry {
            id: "audit_1_abc".to_string(),
            timestamp: Utc::now(),
            entry_type: AuditType::Patient,
            action: AuditAction::Update,
            user_id: "u1".to_string(),
            user_name: "Ana".to_string(),
            user_role: "admin".to_string(),
            entity_id: Some("P1".to_string()),
            entity_name: None,
            details: Value::Null,
            old_value: None,
            new_value: None,
            changes: Vec::new(),
            reason: None,
            session_id: "s".to_string(),
            metadata: Value::Null,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "patient");
        assert_eq!(json["action"], "update");
        assert_eq!(json["userRole"], "admin");
        assert_eq!(json["entityId"], "P1");
        assert!(json.get("sessionId").is_some());
    }
}
