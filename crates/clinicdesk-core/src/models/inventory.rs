use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(deserialize_with = "super::string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub reorder_level: Option<i64>,
    #[serde(default)]
    pub supplier: Option<String>,
}

impl InventoryItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, quantity: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: None,
            quantity,
            unit: None,
            reorder_level: None,
            supplier: None,
        }
    }

    pub fn needs_reorder(&self) -> bool {
        self.reorder_level.map(|level| self.quantity <= level).unwrap_or(false)
    }
}
