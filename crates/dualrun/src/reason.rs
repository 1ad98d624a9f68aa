//! Evaluation reasons.
//!
//! The reason explains why the evaluation collaborator picked a stage. It is
//! carried through the tracker unchanged and lands in the event's
//! `evaluation.reason` field.

use serde::{Deserialize, Serialize};

/// Why a flag evaluated to the stage it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    /// The flag is off and served its off variation.
    Off,

    /// No targets or rules matched.
    Fallthrough,

    /// The context was individually targeted.
    TargetMatch,

    /// A rule matched.
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        /// Position of the matching rule.
        rule_index: usize,
        /// Identifier of the matching rule.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rule_id: Option<String>,
    },

    /// A prerequisite flag did not return the required variation.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed {
        /// Key of the failing prerequisite.
        prerequisite_key: String,
    },

    /// Evaluation failed and the default was served.
    #[serde(rename_all = "camelCase")]
    Error {
        /// What went wrong.
        error_kind: EvaluationErrorKind,
    },
}

impl EvaluationReason {
    /// Creates an error reason.
    #[must_use]
    pub const fn error(error_kind: EvaluationErrorKind) -> Self {
        Self::Error { error_kind }
    }

    /// Returns `true` if this reason reports an evaluation error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Categories of evaluation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationErrorKind {
    /// The evaluator was not ready.
    ClientNotReady,
    /// The flag does not exist.
    FlagNotFound,
    /// The flag value was not a migration stage.
    WrongType,
    /// The flag data was malformed.
    MalformedFlag,
    /// The context was unusable.
    UserNotSpecified,
    /// Any other failure.
    Exception,
}
