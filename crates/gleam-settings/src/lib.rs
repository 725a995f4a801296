//! # gleam-settings
//!
//! Layered configuration for the Gleam gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: `~/.gleam/settings.json` or `--config <path>`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `GLEAM_*` overrides (highest priority)
//!
//! The result is validated once and then treated as immutable; components
//! receive the section they need by reference.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_under_home_dir() {
        let path = settings_path();
        assert!(path.ends_with(".gleam/settings.json"));
    }
}
