//! Settings management for the `set` and `unset` commands.
//!
//! Each key is served by a [`SettingHandler`]; the data-driven boolean and
//! text handlers cover most keys, and the model and tool-round keys validate
//! their input first.

pub mod error;
pub mod handlers;
pub mod registry;

pub use error::SettingError;
pub use registry::SettingRegistry;

use crate::core::config::{Config, ConfigStore};

/// Context provided to setting handlers during set/unset operations.
pub struct SetContext<'a> {
    pub store: &'a ConfigStore,
}

impl SetContext<'_> {
    /// Applies `mutator` and persists the result.
    pub fn mutate<F>(&self, mutator: F) -> Result<(), SettingError>
    where
        F: FnOnce(&mut Config),
    {
        self.store
            .mutate(mutator)
            .map_err(|e| SettingError::Save(e.to_string()))
    }
}

/// Trait for handling a configuration setting.
pub trait SettingHandler: Send + Sync {
    /// Returns the configuration key this handler manages.
    fn key(&self) -> &'static str;

    /// Set the configuration value from the arguments after the key.
    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError>;

    /// Reset the configuration value to its default.
    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError>;

    /// Format the current value for display in `mcp-assistant set` output.
    fn format(&self, config: &Config) -> String;
}

/// Parse a boolean value from user input.
///
/// Accepts: on/off, true/false, yes/no (case-insensitive).
pub fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub fn truncate_with_ellipsis(value: &str, max_chars: usize) -> String {
    let flat = value.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut truncated: String = flat.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
