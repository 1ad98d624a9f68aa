//! Migration operation events.
//!
//! A [`MigrationOpEvent`] is the only artifact this crate emits. It is built
//! once by [`OperationTracker::create_event`](crate::OperationTracker::create_event)
//! after all cross-field checks pass, and is immutable afterwards.
//!
//! # Wire Shape
//!
//! ```json
//! {
//!   "kind": "migration_op",
//!   "operation": "read",
//!   "creationDate": 1700000000000,
//!   "contextKeys": {"user": "user-key"},
//!   "evaluation": {"key": "flag", "value": "shadow", "default": "off",
//!                  "reason": {"kind": "FALLTHROUGH"}},
//!   "measurements": [
//!     {"key": "invoked", "values": {"old": true, "new": true}},
//!     {"key": "consistent", "value": true, "samplingRatio": 1.0},
//!     {"key": "latency_ms", "values": {"old": 3.2, "new": 4.1}}
//!   ],
//!   "samplingRatio": 1.0
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::reason::EvaluationReason;
use crate::stage::{MigrationStage, OperationKind, Origin, OriginPair};

/// Discriminator carried in every migration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A migration read or write.
    #[serde(rename = "migration_op")]
    MigrationOp,
}

/// Summary of the evaluation that selected the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// Flag key.
    pub key: String,
    /// Stage that was served.
    pub value: MigrationStage,
    /// Stage the caller passed as default.
    pub default: MigrationStage,
    /// Why the stage was served.
    pub reason: EvaluationReason,
    /// Index of the served variation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<u32>,
    /// Version of the flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde passes by reference
const fn is_false(value: &bool) -> bool {
    !*value
}

/// Per-origin boolean values; `false` entries are omitted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OriginFlags {
    /// Set for the old origin.
    #[serde(default, skip_serializing_if = "is_false")]
    pub old: bool,
    /// Set for the new origin.
    #[serde(default, skip_serializing_if = "is_false")]
    pub new: bool,
}

impl OriginFlags {
    /// Returns `true` if neither origin is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.old && !self.new
    }

    /// Returns the flag for `origin`.
    #[must_use]
    pub const fn get(&self, origin: Origin) -> bool {
        match origin {
            Origin::Old => self.old,
            Origin::New => self.new,
        }
    }
}

impl From<OriginPair<bool>> for OriginFlags {
    fn from(pair: OriginPair<bool>) -> Self {
        Self {
            old: pair.old,
            new: pair.new,
        }
    }
}

/// Per-origin latencies in milliseconds; missing entries are omitted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OriginLatencies {
    /// Latency of the old origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<f64>,
    /// Latency of the new origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<f64>,
}

impl OriginLatencies {
    /// Returns `true` if neither origin has a latency.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.old.is_none() && self.new.is_none()
    }

    /// Returns the latency for `origin`.
    #[must_use]
    pub const fn get(&self, origin: Origin) -> Option<f64> {
        match origin {
            Origin::Old => self.old,
            Origin::New => self.new,
        }
    }
}

impl From<OriginPair<Option<f64>>> for OriginLatencies {
    fn from(pair: OriginPair<Option<f64>>) -> Self {
        Self {
            old: pair.old,
            new: pair.new,
        }
    }
}

/// A single measurement attached to a migration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key")]
pub enum Measurement {
    /// Which origins were invoked.
    #[serde(rename = "invoked")]
    Invoked {
        /// Invoked origins.
        values: OriginFlags,
    },

    /// Result of a sampled consistency check.
    #[serde(rename = "consistent")]
    Consistent {
        /// Whether the two results agreed.
        value: bool,
        /// Ratio the check was sampled at.
        #[serde(rename = "samplingRatio")]
        sampling_ratio: f64,
    },

    /// Wall-clock time per origin.
    #[serde(rename = "latency_ms")]
    Latency {
        /// Latencies in milliseconds.
        values: OriginLatencies,
    },

    /// Which origins failed.
    #[serde(rename = "error")]
    Error {
        /// Failed origins.
        values: OriginFlags,
    },
}

impl Measurement {
    /// Returns the wire key of this measurement.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Invoked { .. } => "invoked",
            Self::Consistent { .. } => "consistent",
            Self::Latency { .. } => "latency_ms",
            Self::Error { .. } => "error",
        }
    }
}

/// An immutable record of one migration read or write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOpEvent {
    kind: EventKind,
    operation: OperationKind,
    /// Unix milliseconds.
    creation_date: i64,
    context_keys: BTreeMap<String, String>,
    evaluation: EvaluationSummary,
    measurements: Vec<Measurement>,
    sampling_ratio: f64,
}

impl MigrationOpEvent {
    /// Assembles an event. Only the tracker calls this, after validation.
    pub(crate) fn new(
        operation: OperationKind,
        creation_date: i64,
        context_keys: BTreeMap<String, String>,
        evaluation: EvaluationSummary,
        measurements: Vec<Measurement>,
        sampling_ratio: f64,
    ) -> Self {
        Self {
            kind: EventKind::MigrationOp,
            operation,
            creation_date,
            context_keys,
            evaluation,
            measurements,
            sampling_ratio,
        }
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the operation kind.
    #[must_use]
    pub const fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Returns the creation time in Unix milliseconds.
    #[must_use]
    pub const fn creation_date(&self) -> i64 {
        self.creation_date
    }

    /// Returns the context kind-to-key map.
    #[must_use]
    pub const fn context_keys(&self) -> &BTreeMap<String, String> {
        &self.context_keys
    }

    /// Returns the evaluation summary.
    #[must_use]
    pub const fn evaluation(&self) -> &EvaluationSummary {
        &self.evaluation
    }

    /// Returns the measurements in emission order.
    #[must_use]
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Returns the measurement with the given wire key, if present.
    #[must_use]
    pub fn measurement(&self, key: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.key() == key)
    }

    /// Returns the event sampling ratio.
    #[must_use]
    pub const fn sampling_ratio(&self) -> f64 {
        self.sampling_ratio
    }
}
