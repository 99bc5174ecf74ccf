//! Data models for clinic records.
//!
//! - `Patient`: client records
//! - `Employee`, `TimeEntry`: staff and clock-in/clock-out tracking
//! - `InventoryItem`: stock kept on hand
//! - `Appointment`: scheduled services
//!
//! Ids are strings on the wire; numeric ids from the backend or the local
//! fallback are accepted and converted.

pub mod appointment;
pub mod employee;
pub mod inventory;
pub mod patient;

pub use appointment::Appointment;
pub use employee::{Employee, TimeEntry};
pub use inventory::InventoryItem;
pub use patient::Patient;

use serde::{Deserialize, Deserializer};

/// Accept either a JSON string or number for an id field.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
