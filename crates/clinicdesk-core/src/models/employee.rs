use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    #[serde(deserialize_with = "super::string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// One clock-in/clock-out span for an employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    #[serde(default, deserialize_with = "super::string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "super::string_or_number")]
    pub employee_id: String,
    pub clock_in: DateTime<Utc>,
    #[serde(default)]
    pub clock_out: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TimeEntry {
    pub fn start(employee_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            employee_id: employee_id.into(),
            clock_in: at,
            clock_out: None,
            notes: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.clock_out.is_none()
    }

    /// Hours worked, measured up to `now` while the entry is still open.
    pub fn worked_hours(&self, now: DateTime<Utc>) -> f64 {
        let end = self.clock_out.unwrap_or(now);
        let minutes = (end - self.clock_in).num_minutes().max(0);
        minutes as f64 / 60.0
    }
}
