//! # rollcall-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`Settings::default()`]
//! 2. **User file**: `~/.rollcall/settings.json` or `--config` (deep-merged over defaults)
//! 3. **Environment variables**: `ROLLCALL_*` overrides (highest priority)
//!
//! The loaded [`Settings`] value is owned by `main` and handed to each
//! component that needs it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
