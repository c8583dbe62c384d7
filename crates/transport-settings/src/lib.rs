//! # transport-settings
//!
//! Layered configuration for the bridge worker and sidecar.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TransportSettings::default()`]
//! 2. **Environment file**: `configs/config_{APP_ENV}.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TRANSPORT_*` overrides (highest priority)
//!
//! Secrets may come from a mounted file named by `{NAME}_FILE`; see
//! [`secret_or_env`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    app_env, config_path, deep_merge, load_settings, load_settings_from_path, node_id_from_env,
    secret_or_env,
};
pub use types::*;
