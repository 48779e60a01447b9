//! Runtime configuration.
//!
//! Values are deserializable from TOML so an embedding application can ship
//! a config file; everything has a sensible default.

use crate::error::Result;
use serde::Deserialize;

/// Tunables for the runtime.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Debounce window in logical-clock ticks: edits to the same cell whose
    /// clocks fall within this window coalesce into a single admitted edit.
    pub debounce_ticks: u64,
    /// Maximum number of snapshots retained for rollback.
    pub snapshot_history: usize,
    /// Operation budget handed to the executor as a runaway guard; the
    /// reference executor maps this onto `rhai`'s max-operations limit.
    pub executor_ops_budget: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            debounce_ticks: 10,
            snapshot_history: 64,
            executor_ops_budget: 1_000_000,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from TOML text. Missing keys fall back to defaults.
    pub fn from_toml_str(text: &str) -> Result<RuntimeConfig> {
        Ok(toml::from_str(text)?)
    }
}
