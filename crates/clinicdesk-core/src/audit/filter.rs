use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{AuditAction, AuditLogEntry, AuditType};

/// Conjunctive audit query. Unset fields match everything; the date range
/// is inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<AuditType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<AuditAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_type(mut self, entry_type: AuditType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.entry_type.map_or(true, |t| entry.entry_type == t)
            && self.action.map_or(true, |a| entry.action == a)
            && self.user_id.as_ref().map_or(true, |u| &entry.user_id == u)
            && self
                .entity_id
                .as_ref()
                .map_or(true, |id| entry.entity_id.as_ref() == Some(id))
            && self.start_date.map_or(true, |start| entry.timestamp >= start)
            && self.end_date.map_or(true, |end| entry.timestamp <= end)
    }
}
