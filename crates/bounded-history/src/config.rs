#![forbid(unsafe_code)]

//! Budget configuration for the history engine.
//!
//! # Loading
//!
//! With the `config` feature, a [`HistoryConfig`] can be read from TOML or
//! JSON. Missing fields fall back to their defaults and the result is
//! validated before it is returned.
//!
//! ```toml
//! max_undo_steps = 50
//! total_threshold_bytes = 536870912
//! is_free_threshold_bytes = 4096
//! ```
//!
//! ```rust,ignore
//! let config = HistoryConfig::from_toml_file("history.toml")?;
//! ```

#[cfg(feature = "config")]
use std::path::Path;

#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "config")]
use crate::error::ConfigError;

/// Budgets enforced by compaction after every push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct HistoryConfig {
    /// Number of non-free steps kept individually behind the newest entry.
    pub max_undo_steps: usize,
    /// Ceiling for the summed byte estimates of all retained entries.
    pub total_threshold_bytes: usize,
    /// Entries cheaper than this count against bytes but not against steps.
    pub is_free_threshold_bytes: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_undo_steps: 100,
            total_threshold_bytes: 256 * 1024 * 1024, // 256 MiB
            is_free_threshold_bytes: 1024,
        }
    }
}

impl HistoryConfig {
    /// Create a configuration with explicit budgets.
    #[must_use]
    pub fn new(
        max_undo_steps: usize,
        total_threshold_bytes: usize,
        is_free_threshold_bytes: usize,
    ) -> Self {
        Self {
            max_undo_steps,
            total_threshold_bytes,
            is_free_threshold_bytes,
        }
    }

    /// Create a configuration that never compacts (for testing).
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_undo_steps: usize::MAX,
            total_threshold_bytes: usize::MAX,
            is_free_threshold_bytes: 0,
        }
    }

    /// Set the step budget.
    #[must_use]
    pub fn with_max_undo_steps(mut self, steps: usize) -> Self {
        self.max_undo_steps = steps;
        self
    }

    /// Set the byte ceiling.
    #[must_use]
    pub fn with_total_threshold_bytes(mut self, bytes: usize) -> Self {
        self.total_threshold_bytes = bytes;
        self
    }

    /// Set the free-entry threshold.
    #[must_use]
    pub fn with_is_free_threshold_bytes(mut self, bytes: usize) -> Self {
        self.is_free_threshold_bytes = bytes;
        self
    }

    /// True if an entry of `bytes` does not consume a step slot.
    #[must_use]
    pub fn is_free(&self, bytes: usize) -> bool {
        bytes < self.is_free_threshold_bytes
    }

    /// Validate all parameters.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.total_threshold_bytes == 0 {
            errors.push("total_threshold_bytes must be > 0".into());
        }

        if self.is_free_threshold_bytes > self.total_threshold_bytes {
            errors.push(format!(
                "is_free_threshold_bytes ({}) must be <= total_threshold_bytes ({})",
                self.is_free_threshold_bytes, self.total_threshold_bytes
            ));
        }

        errors
    }

    /// Load from a TOML string.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validated()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validated()
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Serialize to a TOML string.
    #[cfg(feature = "config")]
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    #[cfg(feature = "config")]
    fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}
