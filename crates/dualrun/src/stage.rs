//! Migration stages, origins, and operation kinds.
//!
//! A migration moves traffic from an *old* implementation to a *new* one
//! through six ordered [`MigrationStage`]s. Each stage fixes which
//! [`Origin`] is authoritative for reads and writes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which of the two implementations produced a result or measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The implementation being migrated away from.
    Old,
    /// The implementation being migrated to.
    New,
}

impl Origin {
    /// Both origins, old first.
    pub const BOTH: [Self; 2] = [Self::Old, Self::New];

    /// Returns the other origin.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Old => Self::New,
            Self::New => Self::Old,
        }
    }

    /// Returns the wire name of this origin.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Old => "old",
            Self::New => "new",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of operation a migration performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A read through the migration.
    Read,
    /// A write through the migration.
    Write,
}

impl OperationKind {
    /// Returns the wire name of this operation kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a migration from fully-old to fully-new.
///
/// Stages are ordered: `Off < DualWrite < Shadow < Live < RampDown <
/// Complete`.
///
/// | Stage | Reads | Writes |
/// |---|---|---|
/// | `Off` | old | old |
/// | `DualWrite` | old | old, then new |
/// | `Shadow` | old + new, old authoritative | old, then new |
/// | `Live` | old + new, new authoritative | new, then old |
/// | `RampDown` | new | new, then old |
/// | `Complete` | new | new |
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStage {
    /// Only the old implementation is used.
    #[default]
    Off,
    /// Writes go to both, reads come from old.
    #[serde(rename = "dualwrite")]
    DualWrite,
    /// Reads are compared between both, old remains authoritative.
    Shadow,
    /// Reads are compared between both, new is authoritative.
    Live,
    /// New is authoritative, writes still reach old.
    #[serde(rename = "rampdown")]
    RampDown,
    /// Only the new implementation is used.
    Complete,
}

impl MigrationStage {
    /// Every stage in migration order.
    pub const ALL: [Self; 6] = [
        Self::Off,
        Self::DualWrite,
        Self::Shadow,
        Self::Live,
        Self::RampDown,
        Self::Complete,
    ];

    /// Returns the wire name of this stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::DualWrite => "dualwrite",
            Self::Shadow => "shadow",
            Self::Live => "live",
            Self::RampDown => "rampdown",
            Self::Complete => "complete",
        }
    }

    /// Returns the origin whose read result is returned to the caller.
    #[must_use]
    pub const fn read_authority(self) -> Origin {
        match self {
            Self::Off | Self::DualWrite | Self::Shadow => Origin::Old,
            Self::Live | Self::RampDown | Self::Complete => Origin::New,
        }
    }

    /// Returns the origin whose write result is authoritative.
    #[must_use]
    pub const fn write_authority(self) -> Origin {
        match self {
            Self::Off | Self::DualWrite | Self::Shadow => Origin::Old,
            Self::Live | Self::RampDown | Self::Complete => Origin::New,
        }
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a migration stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown migration stage: {0:?}")]
pub struct UnknownStage(pub String);

impl FromStr for MigrationStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// A pair of values, one per [`Origin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OriginPair<V> {
    /// Value for the old origin.
    pub old: V,
    /// Value for the new origin.
    pub new: V,
}

impl<V> OriginPair<V> {
    /// Returns the value for `origin`.
    #[must_use]
    pub const fn get(&self, origin: Origin) -> &V {
        match origin {
            Origin::Old => &self.old,
            Origin::New => &self.new,
        }
    }

    /// Returns a mutable reference to the value for `origin`.
    pub fn get_mut(&mut self, origin: Origin) -> &mut V {
        match origin {
            Origin::Old => &mut self.old,
            Origin::New => &mut self.new,
        }
    }
}
