//! The stage evaluation seam.
//!
//! The migration never decides which stage is active. It asks a
//! [`StageEvaluator`] once per call, and the evaluator answers with a
//! [`StageDecision`] that includes a fresh [`OperationTracker`].
//!
//! Two helpers are provided for evaluators:
//!
//! - [`StageDecision::from_flag_value`] maps a raw flag value onto a stage,
//!   falling back to the default stage with a `WRONG_TYPE` error reason.
//! - [`StaticStageEvaluator`] serves fixed stages from memory, for tests and
//!   local development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::context::Context;
use crate::reason::{EvaluationErrorKind, EvaluationReason};
use crate::sampling::Sampler;
use crate::stage::MigrationStage;
use crate::tracker::OperationTracker;

/// Optional flag details that travel into the tracker and the event.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlagMetadata {
    /// Index of the served variation.
    pub variation: Option<u32>,
    /// Flag version.
    pub version: Option<u64>,
    /// Probability of running the consistency check.
    pub check_ratio: Option<f64>,
    /// Event sampling ratio.
    pub sampling_ratio: Option<f64>,
}

/// The evaluator's answer for one migration call.
#[derive(Debug)]
pub struct StageDecision {
    /// Stage to execute.
    pub stage: MigrationStage,
    /// Why this stage was chosen.
    pub reason: EvaluationReason,
    /// Tracker bound to this evaluation.
    pub tracker: OperationTracker,
    /// Probability of running the consistency check.
    pub check_ratio: Option<f64>,
    /// Index of the served variation.
    pub variation: Option<u32>,
    /// Flag version.
    pub version: Option<u64>,
}

impl StageDecision {
    /// Builds a decision and its tracker.
    #[must_use]
    pub fn new(
        flag_key: &str,
        context: &Context,
        default_stage: MigrationStage,
        stage: MigrationStage,
        reason: EvaluationReason,
        metadata: FlagMetadata,
    ) -> Self {
        let mut tracker =
            OperationTracker::new(flag_key, context, default_stage, stage, reason.clone());
        if let Some(ratio) = metadata.check_ratio {
            tracker = tracker.with_check_ratio(ratio);
        }
        if let Some(variation) = metadata.variation {
            tracker = tracker.with_variation(variation);
        }
        if let Some(version) = metadata.version {
            tracker = tracker.with_version(version);
        }
        if let Some(ratio) = metadata.sampling_ratio {
            tracker = tracker.with_sampling_ratio(ratio);
        }

        Self {
            stage,
            reason,
            tracker,
            check_ratio: metadata.check_ratio,
            variation: metadata.variation,
            version: metadata.version,
        }
    }

    /// Builds a decision from a raw flag value.
    ///
    /// A string naming a stage is served as-is. Anything else serves
    /// `default_stage` with reason `ERROR`/`WRONG_TYPE` and no variation.
    #[must_use]
    pub fn from_flag_value(
        flag_key: &str,
        context: &Context,
        default_stage: MigrationStage,
        value: &Value,
        reason: EvaluationReason,
        metadata: FlagMetadata,
    ) -> Self {
        if let Some(stage) = value.as_str().and_then(|s| s.parse::<MigrationStage>().ok()) {
            return Self::new(flag_key, context, default_stage, stage, reason, metadata);
        }

        warn!(
            flag_key = %flag_key,
            value = %value,
            default_stage = %default_stage,
            "flag value is not a migration stage, serving default"
        );
        Self::new(
            flag_key,
            context,
            default_stage,
            default_stage,
            EvaluationReason::error(EvaluationErrorKind::WrongType),
            FlagMetadata {
                variation: None,
                ..metadata
            },
        )
    }

    /// Replaces the tracker's sampler.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.tracker = self.tracker.with_sampler(sampler);
        self
    }
}

/// Resolves a flag key and context into a migration stage.
///
/// Implementations must build a fresh tracker for every call.
#[async_trait]
pub trait StageEvaluator: Send + Sync {
    /// Resolves the stage for `flag_key` and `context`.
    async fn resolve_stage(
        &self,
        flag_key: &str,
        context: &Context,
        default_stage: MigrationStage,
    ) -> StageDecision;
}

#[async_trait]
impl<E: StageEvaluator + ?Sized> StageEvaluator for Arc<E> {
    async fn resolve_stage(
        &self,
        flag_key: &str,
        context: &Context,
        default_stage: MigrationStage,
    ) -> StageDecision {
        (**self)
            .resolve_stage(flag_key, context, default_stage)
            .await
    }
}

/// Serves fixed stages from memory.
///
/// Unknown flags serve the caller's default stage with reason
/// `ERROR`/`FLAG_NOT_FOUND`.
#[derive(Debug, Default)]
pub struct StaticStageEvaluator {
    flags: HashMap<String, (MigrationStage, FlagMetadata)>,
    sampler: Option<Arc<dyn Sampler>>,
}

impl StaticStageEvaluator {
    /// Creates an evaluator with no flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `stage` for `flag_key`.
    #[must_use]
    pub fn with_stage(self, flag_key: impl Into<String>, stage: MigrationStage) -> Self {
        self.with_flag(flag_key, stage, FlagMetadata::default())
    }

    /// Serves `stage` for `flag_key` with the given metadata.
    #[must_use]
    pub fn with_flag(
        mut self,
        flag_key: impl Into<String>,
        stage: MigrationStage,
        metadata: FlagMetadata,
    ) -> Self {
        self.flags.insert(flag_key.into(), (stage, metadata));
        self
    }

    /// Uses `sampler` for every tracker this evaluator creates.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }
}

#[async_trait]
impl StageEvaluator for StaticStageEvaluator {
    async fn resolve_stage(
        &self,
        flag_key: &str,
        context: &Context,
        default_stage: MigrationStage,
    ) -> StageDecision {
        let decision = match self.flags.get(flag_key) {
            Some((stage, metadata)) => StageDecision::new(
                flag_key,
                context,
                default_stage,
                *stage,
                EvaluationReason::Fallthrough,
                *metadata,
            ),
            None => StageDecision::new(
                flag_key,
                context,
                default_stage,
                default_stage,
                EvaluationReason::error(EvaluationErrorKind::FlagNotFound),
                FlagMetadata::default(),
            ),
        };

        match &self.sampler {
            Some(sampler) => decision.with_sampler(Arc::clone(sampler)),
            None => decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stage::{OperationKind, Origin};

    fn context() -> Context {
        Context::user("user-key")
    }

    #[test]
    fn test_from_flag_value_valid_stage() {
        let decision = StageDecision::from_flag_value(
            "flag",
            &context(),
            MigrationStage::Off,
            &json!("live"),
            EvaluationReason::TargetMatch,
            FlagMetadata {
                variation: Some(3),
                version: Some(12),
                ..FlagMetadata::default()
            },
        );

        assert_eq!(decision.stage, MigrationStage::Live);
        assert_eq!(decision.reason, EvaluationReason::TargetMatch);
        assert_eq!(decision.variation, Some(3));
        assert_eq!(decision.tracker.stage(), MigrationStage::Live);
        assert_eq!(decision.tracker.default_stage(), MigrationStage::Off);
    }

    #[test]
    fn test_from_flag_value_wrong_type_serves_default() {
        for value in [json!("bogus"), json!(true), json!(3), json!(null)] {
            let decision = StageDecision::from_flag_value(
                "flag",
                &context(),
                MigrationStage::Shadow,
                &value,
                EvaluationReason::Fallthrough,
                FlagMetadata {
                    variation: Some(1),
                    ..FlagMetadata::default()
                },
            );

            assert_eq!(decision.stage, MigrationStage::Shadow);
            assert_eq!(
                decision.reason,
                EvaluationReason::error(EvaluationErrorKind::WrongType)
            );
            assert_eq!(decision.variation, None);
        }
    }

    #[test]
    fn test_decision_metadata_reaches_event() {
        let mut decision = StageDecision::new(
            "flag",
            &context(),
            MigrationStage::Off,
            MigrationStage::DualWrite,
            EvaluationReason::Fallthrough,
            FlagMetadata {
                variation: Some(2),
                version: Some(9),
                check_ratio: Some(0.5),
                sampling_ratio: Some(0.25),
            },
        );
        assert!((decision.tracker.check_ratio() - 0.5).abs() < f64::EPSILON);

        decision.tracker.op(OperationKind::Write);
        decision.tracker.invoked(Origin::Old);
        let event = decision.tracker.create_event().unwrap();

        assert_eq!(event.evaluation().value, MigrationStage::DualWrite);
        assert_eq!(event.evaluation().variation, Some(2));
        assert_eq!(event.evaluation().version, Some(9));
        assert!((event.sampling_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_static_evaluator_known_and_unknown_flags() {
        let evaluator = StaticStageEvaluator::new().with_stage("known", MigrationStage::RampDown);

        let decision = evaluator
            .resolve_stage("known", &context(), MigrationStage::Off)
            .await;
        assert_eq!(decision.stage, MigrationStage::RampDown);
        assert_eq!(decision.reason, EvaluationReason::Fallthrough);

        let decision = evaluator
            .resolve_stage("unknown", &context(), MigrationStage::Shadow)
            .await;
        assert_eq!(decision.stage, MigrationStage::Shadow);
        assert_eq!(
            decision.reason,
            EvaluationReason::error(EvaluationErrorKind::FlagNotFound)
        );
    }

    #[tokio::test]
    async fn test_shared_evaluator_delegates() {
        let evaluator = Arc::new(StaticStageEvaluator::new().with_stage("f", MigrationStage::Live));
        let decision = evaluator
            .resolve_stage("f", &context(), MigrationStage::Off)
            .await;
        assert_eq!(decision.stage, MigrationStage::Live);
    }
}
