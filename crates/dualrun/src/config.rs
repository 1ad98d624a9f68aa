//! Migration settings.
//!
//! Settings can be built in code or loaded from TOML:
//!
//! ```toml
//! execution = "serial_random"
//! latency_tracking = true
//! error_tracking = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;
use crate::execution::ExecutionOrder;

const fn default_true() -> bool {
    true
}

/// Tunable behavior of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSettings {
    /// How reads that touch both origins are scheduled.
    #[serde(default)]
    pub execution: ExecutionOrder,

    /// Whether per-origin latency is measured.
    #[serde(default = "default_true")]
    pub latency_tracking: bool,

    /// Whether per-origin failures are recorded.
    #[serde(default = "default_true")]
    pub error_tracking: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            execution: ExecutionOrder::default(),
            latency_tracking: true,
            error_tracking: true,
        }
    }
}

impl MigrationSettings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, MigrationError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or contains unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, MigrationError> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize settings to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, MigrationError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
