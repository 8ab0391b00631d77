//! Configuration for Quire.
//!
//! Two concerns live here:
//! - [`QuireConfig`]: the file-backed configuration (`~/.quire/config.toml`)
//!   holding user settings, server tuning and completion options.
//! - [`resolve`]: turning a resource URI, the open workspace roots and the
//!   user settings into a fully resolved [`BuildConfig`].

mod resolver;
mod settings;

pub use resolver::{BuildConfig, Unresolved, resolve, scope_for};
pub use settings::{
    CacheSettings, CompletionSettings, ConfigError, QuireConfig, ServerSettings, UserSettings,
    config_path, expand_env_vars, expand_variables,
};
