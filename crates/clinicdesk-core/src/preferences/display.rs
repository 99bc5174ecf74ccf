use serde_json::{Map, Value};
use tracing::debug;

/// Visual state derived from preferences: the theme attribute plus the set
/// of classes the front end toggles on its root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayState {
    pub theme: String,
    pub classes: Vec<String>,
}

impl DisplayState {
    pub fn from_preferences(prefs: &Map<String, Value>) -> Self {
        let theme = prefs
            .get("theme")
            .and_then(Value::as_str)
            .unwrap_or("light")
            .to_string();
        let font_size = prefs
            .get("fontSize")
            .and_then(Value::as_str)
            .unwrap_or("medium");
        let collapsed = prefs
            .get("sidebarCollapsed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut classes = Vec::new();
        if theme == "dark" {
            classes.push("dark-theme".to_string());
        }
        classes.push(format!("font-{}", font_size));
        if collapsed {
            classes.push("sidebar-collapsed".to_string());
        }

        Self { theme, classes }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

/// Receives display effects whenever preferences change.
pub trait DisplaySurface: Send + Sync {
    fn apply(&self, state: &DisplayState);
}

/// Surface for headless front ends: logs what would be applied.
#[derive(Debug, Default)]
pub struct TracingDisplay;

impl DisplaySurface for TracingDisplay {
    fn apply(&self, state: &DisplayState) {
        debug!(theme = %state.theme, classes = ?state.classes, "Applied display preferences");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dark_theme_large_font_collapsed() {
        let prefs = json!({"theme": "dark", "fontSize": "large", "sidebarCollapsed": true});
        let state = DisplayState::from_preferences(prefs.as_object().unwrap());
        assert_eq!(state.theme, "dark");
        assert_eq!(state.classes, vec!["dark-theme", "font-large", "sidebar-collapsed"]);
    }

    #[test]
    fn test_missing_values_fall_back() {
        let state = DisplayState::from_preferences(&Map::new());
        assert_eq!(state.theme, "light");
        assert!(state.has_class("font-medium"));
        assert!(!state.has_class("dark-theme"));
    }
}
