//! Per-user preferences.
//!
//! Preferences are a free-form JSON object merged over `defaults()` and
//! stored under `preferences_<email>` (or `preferences_guest`). Every
//! change is pushed to a `DisplaySurface` as a `DisplayState`.

pub mod display;
pub mod manager;

pub use display::{DisplayState, DisplaySurface, TracingDisplay};
pub use manager::{defaults, DatabaseMode, PreferencesManager, GUEST_IDENTITY};
