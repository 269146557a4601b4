//! # planvix-settings
//!
//! Configuration for the activity feed server and its clients.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`PlanvixSettings::default()`])
//! 2. **User file** (`~/.planvix/settings.json`, deep-merged over defaults)
//! 3. **Environment variables** (`PLANVIX_*` overrides, highest priority)
//!
//! The merged result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, planvix_dir, settings_path};
pub use types::*;
