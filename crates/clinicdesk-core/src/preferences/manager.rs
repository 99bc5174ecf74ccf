use std::sync::{Arc, RwLock};

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::display::{DisplayState, DisplaySurface};
use crate::store::{load_json, save_json, KeyValueStore, StoreError};

/// Identity used when no user is signed in
pub const GUEST_IDENTITY: &str = "guest";

/// Built-in preference values; stored preferences override these.
pub fn defaults() -> Map<String, Value> {
    let defaults = json!({
        "theme": "light",
        "fontSize": "medium",
        "sidebarCollapsed": false,
        "language": "en",
        "databaseMode": "mock",
        "notifications": true,
        "autoSave": true,
        "itemsPerPage": 25,
    });
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Storage backend the preferences say the app should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseMode {
    Mock,
    Sqlite,
    MongoDb,
}

impl DatabaseMode {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "mock" => Some(DatabaseMode::Mock),
            "sqlite" => Some(DatabaseMode::Sqlite),
            "mongodb" => Some(DatabaseMode::MongoDb),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DatabaseMode::Mock => "Mock Data",
            DatabaseMode::Sqlite => "SQLite Local",
            DatabaseMode::MongoDb => "MongoDB Atlas",
        }
    }
}

struct State {
    user: Option<String>,
    values: Map<String, Value>,
}

/// Per-user settings with display side effects.
pub struct PreferencesManager {
    store: Arc<dyn KeyValueStore>,
    display: Arc<dyn DisplaySurface>,
    state: RwLock<State>,
}

fn storage_key(user: Option<&str>) -> String {
    format!("preferences_{}", user.unwrap_or(GUEST_IDENTITY))
}

impl PreferencesManager {
    pub fn new(store: Arc<dyn KeyValueStore>, display: Arc<dyn DisplaySurface>) -> Self {
        Self {
            store,
            display,
            state: RwLock::new(State {
                user: None,
                values: defaults(),
            }),
        }
    }

    fn read_stored(&self, user: Option<&str>) -> Map<String, Value> {
        let key = storage_key(user);
        match load_json::<Map<String, Value>>(self.store.as_ref(), &key) {
            Ok(Some(stored)) => stored,
            Ok(None) => Map::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read stored preferences, using defaults");
                Map::new()
            }
        }
    }

    fn apply(&self, values: &Map<String, Value>) {
        self.display.apply(&DisplayState::from_preferences(values));
    }

    /// Key under which the current identity's preferences are stored.
    pub fn storage_key(&self) -> String {
        let user = self.state.read().ok().and_then(|s| s.user.clone());
        storage_key(user.as_deref())
    }

    /// Switch identity (`None` for guest) and load that user's preferences.
    pub fn set_user(&self, email: Option<String>) -> Map<String, Value> {
        if let Ok(mut state) = self.state.write() {
            state.user = email.filter(|e| !e.is_empty());
        }
        self.load()
    }

    /// Merge stored preferences over the defaults and apply them.
    pub fn load(&self) -> Map<String, Value> {
        let Ok(mut state) = self.state.write() else {
            warn!("Preferences lock poisoned");
            return defaults();
        };
        let mut values = defaults();
        values.extend(self.read_stored(state.user.as_deref()));
        debug!(user = ?state.user, count = values.len(), "Loaded preferences");
        state.values = values.clone();
        drop(state);

        self.apply(&values);
        values
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.read().ok()?.values.get(key).cloned()
    }

    pub fn values(&self) -> Map<String, Value> {
        self.state
            .read()
            .map(|s| s.values.clone())
            .unwrap_or_else(|_| defaults())
    }

    fn persist(&self, user: Option<&str>, values: &Map<String, Value>) -> Result<(), StoreError> {
        save_json(self.store.as_ref(), &storage_key(user), values)
    }

    /// Set one preference, persist, and re-apply display effects.
    pub fn update(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let values = {
            let mut state = self
                .state
                .write()
                .map_err(|_| StoreError::poisoned("preferences"))?;
            let mut next = state.values.clone();
            next.insert(key.to_string(), value);
            self.persist(state.user.as_deref(), &next)?;
            state.values = next.clone();
            next
        };
        debug!(key, "Updated preference");
        self.apply(&values);
        Ok(())
    }

    /// Restore defaults, persist, and re-apply display effects.
    pub fn reset(&self) -> Result<(), StoreError> {
        let values = {
            let mut state = self
                .state
                .write()
                .map_err(|_| StoreError::poisoned("preferences"))?;
            let next = defaults();
            self.persist(state.user.as_deref(), &next)?;
            state.values = next.clone();
            next
        };
        debug!("Reset preferences to defaults");
        self.apply(&values);
        Ok(())
    }

    pub fn database_mode(&self) -> Option<DatabaseMode> {
        self.get("databaseMode")
            .and_then(|v| v.as_str().and_then(DatabaseMode::from_value))
    }

    /// Label for the configured database mode.
    pub fn database_status(&self) -> &'static str {
        self.database_mode().map(|m| m.label()).unwrap_or("Unknown")
    }
}
