//! # lineup-settings
//!
//! Configuration with layered sources (in priority order):
//! 1. **Compiled defaults**: [`LineupSettings::default()`]
//! 2. **User file**: `~/.lineup/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `LINEUP_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, lineup_home, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
