//! Error types for migration operations.
//!
//! Two families of errors exist:
//!
//! - [`OperationError`]: a single old/new implementation failed. These are
//!   never raised out of [`Migration::read`](crate::Migration::read) or
//!   [`Migration::write`](crate::Migration::write); they travel inside the
//!   returned [`MigrationResult`](crate::MigrationResult).
//! - [`MigrationError`]: a migration could not be configured (missing
//!   methods, unreadable or unparseable settings).
//!
//! Telemetry failures are not errors at all: an invalid tracker state only
//! suppresses the event and is reported through `tracing`.

use std::fmt;

use thiserror::Error;

/// The result every old/new implementation produces.
pub type MethodResult<T> = Result<T, OperationError>;

/// A failure produced by one origin's implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The implementation completed and reported a failure.
    #[error("operation failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// The implementation panicked while running.
    #[error("operation panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl OperationError {
    /// Creates a new failed-operation error.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a new panicked-operation error.
    #[must_use]
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    /// Wraps any displayable error as a failed operation.
    ///
    /// Handy at the end of an implementation:
    ///
    /// ```rust
    /// use dualrun::{MethodResult, OperationError};
    ///
    /// fn parse(raw: &str) -> MethodResult<u32> {
    ///     raw.parse::<u32>().map_err(|e| OperationError::from_error(&e))
    /// }
    ///
    /// assert!(parse("12").is_ok());
    /// assert!(parse("twelve").is_err());
    /// ```
    #[must_use]
    pub fn from_error(err: &impl fmt::Display) -> Self {
        Self::failed(err.to_string())
    }

    /// Returns the error kind as a string identifier.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Panicked { .. } => "panicked",
        }
    }

    /// Returns the human-readable message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Failed { message } | Self::Panicked { message } => message,
        }
    }
}

/// Errors raised while configuring a migration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrationError {
    /// One of the four required methods was not supplied to the builder.
    #[error("migration is missing required method: {method}")]
    MissingMethod {
        /// Name of the missing method (`read_old`, `read_new`, ...).
        method: &'static str,
    },

    /// Settings file could not be read.
    #[error("failed to read migration settings: {0}")]
    Io(#[from] std::io::Error),

    /// Settings TOML could not be parsed.
    #[error("failed to parse migration settings: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Settings could not be serialized.
    #[error("failed to serialize migration settings: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl MigrationError {
    /// Creates a new missing method error.
    #[must_use]
    pub const fn missing_method(method: &'static str) -> Self {
        Self::MissingMethod { method }
    }

    /// Returns `true` if this error came from loading or saving settings.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        match self {
            Self::Io(_) | Self::ConfigParse(_) | Self::ConfigSerialize(_) => true,
            Self::MissingMethod { .. } => false,
        }
    }
}
