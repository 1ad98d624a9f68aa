//! Per-call measurement accumulator.
//!
//! An [`OperationTracker`] is created by the evaluation collaborator for a
//! single `read` or `write` and is owned by that call alone. The executor
//! records invocations, errors, latencies and consistency on it, then asks
//! it for a [`MigrationOpEvent`].
//!
//! # Invariants
//!
//! Checked only in [`OperationTracker::create_event`], never earlier:
//!
//! - The operation kind is set.
//! - The flag key and context keys are non-empty.
//! - At least one origin was invoked.
//! - A latency or error measurement exists only for invoked origins.
//! - A consistency result exists only if both origins were invoked.
//!
//! When any invariant fails the event is suppressed and the violation is
//! logged at `error` level; nothing is raised to the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::error;

use crate::context::Context;
use crate::event::{EvaluationSummary, Measurement, MigrationOpEvent};
use crate::invoke::panic_message;
use crate::reason::EvaluationReason;
use crate::sampling::{RandomSampler, Sampler};
use crate::stage::{MigrationStage, OperationKind, Origin, OriginPair};

#[cfg(test)]
mod proptest_tracker;

/// Outcome of the consistency check for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// No check ran (not configured, sampled out, or it panicked).
    #[default]
    NotChecked,
    /// The check ran and the results agreed.
    Consistent,
    /// The check ran and the results differed.
    Inconsistent,
}

impl Consistency {
    /// Returns the check result, if a check ran.
    #[must_use]
    pub const fn value(self) -> Option<bool> {
        match self {
            Self::NotChecked => None,
            Self::Consistent => Some(true),
            Self::Inconsistent => Some(false),
        }
    }
}

/// Accumulates measurements for one migration operation.
pub struct OperationTracker {
    flag_key: String,
    context_keys: BTreeMap<String, String>,
    default_stage: MigrationStage,
    stage: MigrationStage,
    reason: EvaluationReason,
    check_ratio: Option<f64>,
    variation: Option<u32>,
    version: Option<u64>,
    sampling_ratio: Option<f64>,
    sampler: Arc<dyn Sampler>,

    operation: Option<OperationKind>,
    invoked: OriginPair<bool>,
    errors: OriginPair<bool>,
    latencies: OriginPair<Option<f64>>,
    consistency: Consistency,
}

impl OperationTracker {
    /// Creates a tracker bound to one flag evaluation.
    ///
    /// # Example
    ///
    /// ```rust
    /// use dualrun::{
    ///     Context, EvaluationReason, MigrationStage, OperationKind, OperationTracker,
    ///     Origin,
    /// };
    ///
    /// let mut tracker = OperationTracker::new(
    ///     "flag",
    ///     &Context::user("user-key"),
    ///     MigrationStage::Off,
    ///     MigrationStage::Off,
    ///     EvaluationReason::Fallthrough,
    /// );
    /// tracker.op(OperationKind::Write);
    /// tracker.invoked(Origin::Old);
    ///
    /// let event = tracker.create_event().expect("valid tracker");
    /// assert_eq!(event.operation(), OperationKind::Write);
    /// ```
    #[must_use]
    pub fn new(
        flag_key: impl Into<String>,
        context: &Context,
        default_stage: MigrationStage,
        stage: MigrationStage,
        reason: EvaluationReason,
    ) -> Self {
        Self {
            flag_key: flag_key.into(),
            context_keys: context.keys().clone(),
            default_stage,
            stage,
            reason,
            check_ratio: None,
            variation: None,
            version: None,
            sampling_ratio: None,
            sampler: Arc::new(RandomSampler),
            operation: None,
            invoked: OriginPair::default(),
            errors: OriginPair::default(),
            latencies: OriginPair::default(),
            consistency: Consistency::NotChecked,
        }
    }

    /// Sets the probability that the consistency check runs.
    #[must_use]
    pub const fn with_check_ratio(mut self, ratio: f64) -> Self {
        self.check_ratio = Some(ratio);
        self
    }

    /// Sets the served variation index.
    #[must_use]
    pub const fn with_variation(mut self, variation: u32) -> Self {
        self.variation = Some(variation);
        self
    }

    /// Sets the flag version.
    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the event sampling ratio.
    #[must_use]
    pub const fn with_sampling_ratio(mut self, ratio: f64) -> Self {
        self.sampling_ratio = Some(ratio);
        self
    }

    /// Replaces the sampler used for consistency checks.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Records the kind of operation being performed.
    pub fn op(&mut self, kind: OperationKind) {
        self.operation = Some(kind);
    }

    /// Records that `origin`'s implementation was called.
    pub fn invoked(&mut self, origin: Origin) {
        *self.invoked.get_mut(origin) = true;
    }

    /// Records that `origin`'s implementation failed.
    pub fn error(&mut self, origin: Origin) {
        *self.errors.get_mut(origin) = true;
    }

    /// Records how long `origin`'s implementation took.
    pub fn latency(&mut self, origin: Origin, elapsed: Duration) {
        *self.latencies.get_mut(origin) = Some(elapsed.as_secs_f64() * 1000.0);
    }

    /// Runs a sampled consistency check.
    ///
    /// The check only runs if the sampler accepts the check ratio (default
    /// `1`, always). A panicking check is logged and leaves the consistency
    /// state untouched.
    pub fn consistency(&mut self, check: impl FnOnce() -> bool) {
        if !self.sampler.should_sample(self.check_ratio()) {
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(check)) {
            Ok(true) => self.consistency = Consistency::Consistent,
            Ok(false) => self.consistency = Consistency::Inconsistent,
            Err(payload) => {
                error!(
                    flag_key = %self.flag_key,
                    "exception when executing consistency check function for migration '{}', \
                     the consistency check will not be included. Error: {}",
                    self.flag_key,
                    panic_message(payload.as_ref()),
                );
            },
        }
    }

    /// Returns the flag key.
    #[must_use]
    pub fn flag_key(&self) -> &str {
        &self.flag_key
    }

    /// Returns the stage this tracker was created for.
    #[must_use]
    pub const fn stage(&self) -> MigrationStage {
        self.stage
    }

    /// Returns the default stage passed by the caller.
    #[must_use]
    pub const fn default_stage(&self) -> MigrationStage {
        self.default_stage
    }

    /// Returns the evaluation reason.
    #[must_use]
    pub const fn reason(&self) -> &EvaluationReason {
        &self.reason
    }

    /// Returns the effective consistency check ratio.
    #[must_use]
    pub fn check_ratio(&self) -> f64 {
        self.check_ratio.unwrap_or(1.0)
    }

    /// Returns the recorded operation kind.
    #[must_use]
    pub const fn operation(&self) -> Option<OperationKind> {
        self.operation
    }

    /// Returns `true` if `origin` was invoked.
    #[must_use]
    pub const fn was_invoked(&self, origin: Origin) -> bool {
        *self.invoked.get(origin)
    }

    /// Returns `true` if `origin` recorded an error.
    #[must_use]
    pub const fn had_error(&self, origin: Origin) -> bool {
        *self.errors.get(origin)
    }

    /// Returns the recorded latency for `origin` in milliseconds.
    #[must_use]
    pub const fn latency_ms(&self, origin: Origin) -> Option<f64> {
        *self.latencies.get(origin)
    }

    /// Returns the consistency state.
    #[must_use]
    pub const fn consistency_state(&self) -> Consistency {
        self.consistency
    }

    /// Validates the accumulated state and builds the event.
    ///
    /// Returns `None` (after logging the reason) if any invariant from the
    /// module docs is violated.
    #[must_use]
    pub fn create_event(&self) -> Option<MigrationOpEvent> {
        let Some(operation) = self.operation else {
            error!("The operation must be set using \"op\" before an event can be created.");
            return None;
        };

        if self.flag_key.is_empty() {
            error!("The flag key for a migration operation must not be empty.");
            return None;
        }

        if self.context_keys.is_empty() {
            error!(
                flag_key = %self.flag_key,
                "The migration was not done against a valid context and cannot generate an event."
            );
            return None;
        }

        if !self.invoked.old && !self.invoked.new {
            error!(
                flag_key = %self.flag_key,
                "The migration invoked neither the \"old\" or \"new\" implementation and an \
                 event cannot be generated."
            );
            return None;
        }

        if !self.measurements_consistent(operation) {
            return None;
        }

        Some(MigrationOpEvent::new(
            operation,
            Utc::now().timestamp_millis(),
            self.context_keys.clone(),
            EvaluationSummary {
                key: self.flag_key.clone(),
                value: self.stage,
                default: self.default_stage,
                reason: self.reason.clone(),
                variation: self.variation,
                version: self.version,
            },
            self.measurements(),
            self.sampling_ratio.unwrap_or(1.0),
        ))
    }

    fn measurements_consistent(&self, operation: OperationKind) -> bool {
        for origin in Origin::BOTH {
            if self.was_invoked(origin) {
                continue;
            }
            let problem = if self.latency_ms(origin).is_some() {
                format!("Latency measurement for \"{origin}\", but \"{origin}\" was not invoked.")
            } else if self.had_error(origin) {
                format!("Error occurred for \"{origin}\", but \"{origin}\" was not invoked.")
            } else if self.consistency != Consistency::NotChecked {
                format!("Consistency check was done, but \"{origin}\" was not invoked.")
            } else {
                continue;
            };
            error!(
                flag_key = %self.flag_key,
                %origin,
                "For migration op({operation}) flagKey({}): {problem}",
                self.flag_key,
            );
            return false;
        }
        true
    }

    fn measurements(&self) -> Vec<Measurement> {
        let mut measurements = vec![Measurement::Invoked {
            values: self.invoked.into(),
        }];

        if let Some(value) = self.consistency.value() {
            measurements.push(Measurement::Consistent {
                value,
                sampling_ratio: self.check_ratio(),
            });
        }

        if self.latencies.old.is_some() || self.latencies.new.is_some() {
            measurements.push(Measurement::Latency {
                values: self.latencies.into(),
            });
        }

        if self.errors.old || self.errors.new {
            measurements.push(Measurement::Error {
                values: self.errors.into(),
            });
        }

        measurements
    }
}

impl fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTracker")
            .field("flag_key", &self.flag_key)
            .field("stage", &self.stage)
            .field("operation", &self.operation)
            .field("invoked", &self.invoked)
            .field("errors", &self.errors)
            .field("latencies", &self.latencies)
            .field("consistency", &self.consistency)
            .finish_non_exhaustive()
    }
}
