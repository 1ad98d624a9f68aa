//! The migration executor.
//!
//! A [`Migration`] owns the four old/new implementations and dispatches each
//! `read` or `write` according to the stage the [`StageEvaluator`] returns.
//!
//! # Architecture
//!
//! ```text
//! Migration
//!     │
//!     ├── read_old / read_new / write_old / write_new: Box<dyn MigrationMethod>
//!     ├── check: Option<ConsistencyCheck>
//!     ├── settings: MigrationSettings
//!     ├── evaluator: Arc<dyn StageEvaluator>
//!     └── sink: Arc<dyn EventSink>
//!
//! Call Flow:
//!     1. resolve_stage() - Ask the evaluator for stage + tracker
//!     2. dispatch        - Run origin(s) per the stage table
//!     3. op() + create_event() - Validate measurements
//!     4. sink.send()     - Hand the event off, if one was produced
//! ```
//!
//! # Stage Tables
//!
//! | Stage | Read | Write |
//! |---|---|---|
//! | off | old | old |
//! | dualwrite | old | old, then new if old succeeded |
//! | shadow | old + new, old returned | old, then new if old succeeded |
//! | live | old + new, new returned | new, then old if new succeeded |
//! | rampdown | new | new, then old if new succeeded |
//! | complete | new | new |
//!
//! # Safety Properties
//!
//! - Writes are always sequential. The non-authoritative write is not even
//!   created until the authoritative write has succeeded.
//! - Each implementation runs at most once per call.
//! - Failures and panics inside implementations are returned as results,
//!   never raised.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::MigrationSettings;
use crate::context::Context;
use crate::error::{MethodResult, MigrationError, OperationError};
use crate::evaluation::{StageDecision, StageEvaluator};
use crate::execution::ExecutionOrder;
use crate::invoke::timed_invoke;
use crate::sink::EventSink;
use crate::stage::{MigrationStage, OperationKind, Origin};
use crate::tracker::OperationTracker;

/// Compares the old and new read results; `true` means consistent.
pub type ConsistencyCheck<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// One old or new implementation of a read or write.
///
/// Closures of the form `Fn(Option<P>) -> impl Future<Output =
/// MethodResult<T>>` implement this automatically.
#[async_trait]
pub trait MigrationMethod<P, T>: Send + Sync {
    /// Runs the implementation with the caller's payload.
    async fn call(&self, payload: Option<P>) -> MethodResult<T>;
}

#[async_trait]
impl<P, T, F, Fut> MigrationMethod<P, T> for F
where
    F: Fn(Option<P>) -> Fut + Send + Sync,
    Fut: Future<Output = MethodResult<T>> + Send,
    P: Send + 'static,
    T: Send + 'static,
{
    async fn call(&self, payload: Option<P>) -> MethodResult<T> {
        (self)(payload).await
    }
}

/// The outcome of one origin's implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult<T> {
    /// Which implementation produced this result.
    pub origin: Origin,
    /// The value or the failure.
    pub result: MethodResult<T>,
}

impl<T> MigrationResult<T> {
    /// Creates a result for `origin`.
    #[must_use]
    pub const fn new(origin: Origin, result: MethodResult<T>) -> Self {
        Self { origin, result }
    }

    /// Returns `true` if the implementation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns the value, if the implementation succeeded.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// Returns the failure, if the implementation failed.
    #[must_use]
    pub fn error(&self) -> Option<&OperationError> {
        self.result.as_ref().err()
    }

    /// Consumes this result and returns the inner `Result`.
    ///
    /// # Errors
    ///
    /// Returns the implementation's failure.
    pub fn into_result(self) -> MethodResult<T> {
        self.result
    }
}

/// Result of a migration read: the authoritative origin's result.
pub type MigrationReadResult<T> = MigrationResult<T>;

/// Result of a migration write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationWriteResult<T> {
    /// Result of the write whose origin is authoritative for the stage.
    pub authoritative: MigrationResult<T>,
    /// Result of the secondary write, if it ran.
    pub non_authoritative: Option<MigrationResult<T>>,
}

/// Builder for [`Migration`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use dualrun::{
///     Context, ExecutionOrder, InMemoryEventSink, MethodResult, Migration, MigrationStage,
///     StaticStageEvaluator,
/// };
///
/// async fn fetch(source: &'static str) -> MethodResult<String> {
///     Ok(format!("{source} row"))
/// }
///
/// # futures::executor::block_on(async {
/// let sink = Arc::new(InMemoryEventSink::new());
/// let evaluator = Arc::new(StaticStageEvaluator::new().with_stage("users-db", MigrationStage::Live));
///
/// let migration = Migration::<(), String>::builder()
///     .read_old(|_| fetch("old"))
///     .read_new(|_| fetch("new"))
///     .write_old(|_| fetch("old"))
///     .write_new(|_| fetch("new"))
///     .check(|a, b| a == b)
///     .execution(ExecutionOrder::SerialFixed)
///     .build(evaluator, sink.clone())
///     .expect("all methods configured");
///
/// let result = migration
///     .read("users-db", &Context::user("user-key"), MigrationStage::Off, None)
///     .await;
/// assert_eq!(result.value().map(String::as_str), Some("new row"));
/// assert_eq!(sink.len(), 1);
/// # });
/// ```
pub struct MigrationBuilder<P, T> {
    read_old: Option<Box<dyn MigrationMethod<P, T>>>,
    read_new: Option<Box<dyn MigrationMethod<P, T>>>,
    write_old: Option<Box<dyn MigrationMethod<P, T>>>,
    write_new: Option<Box<dyn MigrationMethod<P, T>>>,
    check: Option<ConsistencyCheck<T>>,
    settings: MigrationSettings,
}

impl<P, T> Default for MigrationBuilder<P, T> {
    fn default() -> Self {
        Self {
            read_old: None,
            read_new: None,
            write_old: None,
            write_new: None,
            check: None,
            settings: MigrationSettings::default(),
        }
    }
}

impl<P, T> MigrationBuilder<P, T>
where
    P: Clone + Send + 'static,
    T: Send + 'static,
{
    /// Creates a builder with default settings and no methods.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the implementation for one operation kind and origin.
    #[must_use]
    pub fn method(
        mut self,
        kind: OperationKind,
        origin: Origin,
        method: impl MigrationMethod<P, T> + 'static,
    ) -> Self {
        let slot = match (kind, origin) {
            (OperationKind::Read, Origin::Old) => &mut self.read_old,
            (OperationKind::Read, Origin::New) => &mut self.read_new,
            (OperationKind::Write, Origin::Old) => &mut self.write_old,
            (OperationKind::Write, Origin::New) => &mut self.write_new,
        };
        *slot = Some(Box::new(method));
        self
    }

    /// Sets the old read implementation.
    #[must_use]
    pub fn read_old<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Option<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult<T>> + Send + 'static,
    {
        self.method(OperationKind::Read, Origin::Old, f)
    }

    /// Sets the new read implementation.
    #[must_use]
    pub fn read_new<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Option<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult<T>> + Send + 'static,
    {
        self.method(OperationKind::Read, Origin::New, f)
    }

    /// Sets the old write implementation.
    #[must_use]
    pub fn write_old<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Option<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult<T>> + Send + 'static,
    {
        self.method(OperationKind::Write, Origin::Old, f)
    }

    /// Sets the new write implementation.
    #[must_use]
    pub fn write_new<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Option<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult<T>> + Send + 'static,
    {
        self.method(OperationKind::Write, Origin::New, f)
    }

    /// Sets the read consistency check.
    #[must_use]
    pub fn check(mut self, check: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.check = Some(Arc::new(check));
        self
    }

    /// Replaces all settings at once.
    #[must_use]
    pub fn settings(mut self, settings: MigrationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the read execution order.
    #[must_use]
    pub fn execution(mut self, order: ExecutionOrder) -> Self {
        self.settings.execution = order;
        self
    }

    /// Enables or disables latency measurements.
    #[must_use]
    pub fn latency_tracking(mut self, enabled: bool) -> Self {
        self.settings.latency_tracking = enabled;
        self
    }

    /// Enables or disables error measurements.
    #[must_use]
    pub fn error_tracking(mut self, enabled: bool) -> Self {
        self.settings.error_tracking = enabled;
        self
    }

    /// Finalizes the migration.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MissingMethod`] if any of the four
    /// implementations was not set.
    pub fn build(
        self,
        evaluator: Arc<dyn StageEvaluator>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Migration<P, T>, MigrationError> {
        Ok(Migration {
            read_old: self
                .read_old
                .ok_or(MigrationError::missing_method("read_old"))?,
            read_new: self
                .read_new
                .ok_or(MigrationError::missing_method("read_new"))?,
            write_old: self
                .write_old
                .ok_or(MigrationError::missing_method("write_old"))?,
            write_new: self
                .write_new
                .ok_or(MigrationError::missing_method("write_new"))?,
            check: self.check,
            settings: self.settings,
            evaluator,
            sink,
        })
    }
}

/// Executes reads and writes against an old and a new implementation.
pub struct Migration<P, T> {
    read_old: Box<dyn MigrationMethod<P, T>>,
    read_new: Box<dyn MigrationMethod<P, T>>,
    write_old: Box<dyn MigrationMethod<P, T>>,
    write_new: Box<dyn MigrationMethod<P, T>>,
    check: Option<ConsistencyCheck<T>>,
    settings: MigrationSettings,
    evaluator: Arc<dyn StageEvaluator>,
    sink: Arc<dyn EventSink>,
}

impl<P, T> Migration<P, T>
where
    P: Clone + Send + 'static,
    T: Send + 'static,
{
    /// Returns a new builder.
    #[must_use]
    pub fn builder() -> MigrationBuilder<P, T> {
        MigrationBuilder::new()
    }

    /// Returns the settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Performs a read through the migration.
    ///
    /// The returned result comes from the authoritative origin for the
    /// resolved stage. Failures of either origin are reported in the result
    /// or the event, never raised.
    #[instrument(skip(self, context, payload), fields(operation = "read"))]
    pub async fn read(
        &self,
        key: &str,
        context: &Context,
        default_stage: MigrationStage,
        payload: Option<P>,
    ) -> MigrationReadResult<T> {
        let StageDecision {
            stage, mut tracker, ..
        } = self
            .evaluator
            .resolve_stage(key, context, default_stage)
            .await;
        debug!(%stage, "dispatching migration read");

        let authority = stage.read_authority();
        let result = match stage {
            MigrationStage::Shadow | MigrationStage::Live => {
                self.read_both(&mut tracker, authority, payload).await
            },
            MigrationStage::Off
            | MigrationStage::DualWrite
            | MigrationStage::RampDown
            | MigrationStage::Complete => {
                self.invoke(&mut tracker, authority, self.read_method(authority), payload)
                    .await
            },
        };

        self.finish(tracker, OperationKind::Read);
        result
    }

    /// Performs a write through the migration.
    ///
    /// Writes are sequential: the authoritative origin is written first and
    /// the other origin is written only if that succeeded.
    #[instrument(skip(self, context, payload), fields(operation = "write"))]
    pub async fn write(
        &self,
        key: &str,
        context: &Context,
        default_stage: MigrationStage,
        payload: Option<P>,
    ) -> MigrationWriteResult<T> {
        let StageDecision {
            stage, mut tracker, ..
        } = self
            .evaluator
            .resolve_stage(key, context, default_stage)
            .await;
        debug!(%stage, "dispatching migration write");

        let authority = stage.write_authority();
        let result = match stage {
            MigrationStage::Off | MigrationStage::Complete => MigrationWriteResult {
                authoritative: self
                    .invoke(&mut tracker, authority, self.write_method(authority), payload)
                    .await,
                non_authoritative: None,
            },
            MigrationStage::DualWrite
            | MigrationStage::Shadow
            | MigrationStage::Live
            | MigrationStage::RampDown => self.write_both(&mut tracker, authority, payload).await,
        };

        self.finish(tracker, OperationKind::Write);
        result
    }

    // =========================================================================
    // Private helpers
    // =========================================================================

    fn read_method(&self, origin: Origin) -> &dyn MigrationMethod<P, T> {
        match origin {
            Origin::Old => self.read_old.as_ref(),
            Origin::New => self.read_new.as_ref(),
        }
    }

    fn write_method(&self, origin: Origin) -> &dyn MigrationMethod<P, T> {
        match origin {
            Origin::Old => self.write_old.as_ref(),
            Origin::New => self.write_new.as_ref(),
        }
    }

    /// Runs one origin and records it on the tracker.
    async fn invoke(
        &self,
        tracker: &mut OperationTracker,
        origin: Origin,
        method: &dyn MigrationMethod<P, T>,
        payload: Option<P>,
    ) -> MigrationResult<T> {
        tracker.invoked(origin);
        let (result, elapsed) = timed_invoke(method.call(payload)).await;
        self.record(tracker, origin, &result, elapsed);
        MigrationResult::new(origin, result)
    }

    /// Runs both read paths per the execution order and returns `authority`'s
    /// result.
    async fn read_both(
        &self,
        tracker: &mut OperationTracker,
        authority: Origin,
        payload: Option<P>,
    ) -> MigrationResult<T> {
        tracker.invoked(Origin::Old);
        tracker.invoked(Origin::New);

        let ((from_old, old_elapsed), (from_new, new_elapsed)) = self
            .settings
            .execution
            .run(
                timed_invoke(self.read_old.call(payload.clone())),
                timed_invoke(self.read_new.call(payload)),
            )
            .await;

        self.record(tracker, Origin::Old, &from_old, old_elapsed);
        self.record(tracker, Origin::New, &from_new, new_elapsed);

        if let (Some(check), Ok(old_value), Ok(new_value)) = (&self.check, &from_old, &from_new) {
            tracker.consistency(|| check(old_value, new_value));
        }

        match authority {
            Origin::Old => MigrationResult::new(Origin::Old, from_old),
            Origin::New => MigrationResult::new(Origin::New, from_new),
        }
    }

    /// Writes `authority` first and the other origin only on success.
    async fn write_both(
        &self,
        tracker: &mut OperationTracker,
        authority: Origin,
        payload: Option<P>,
    ) -> MigrationWriteResult<T> {
        let authoritative = self
            .invoke(
                tracker,
                authority,
                self.write_method(authority),
                payload.clone(),
            )
            .await;

        if !authoritative.is_success() {
            debug!(
                origin = %authority,
                "authoritative write failed, skipping non-authoritative write"
            );
            return MigrationWriteResult {
                authoritative,
                non_authoritative: None,
            };
        }

        let secondary = authority.other();
        let non_authoritative = self
            .invoke(tracker, secondary, self.write_method(secondary), payload)
            .await;

        MigrationWriteResult {
            authoritative,
            non_authoritative: Some(non_authoritative),
        }
    }

    fn record(
        &self,
        tracker: &mut OperationTracker,
        origin: Origin,
        result: &MethodResult<T>,
        elapsed: Duration,
    ) {
        if self.settings.latency_tracking {
            tracker.latency(origin, elapsed);
        }
        if let Err(err) = result {
            debug!(%origin, error = %err, "migration origin failed");
            if self.settings.error_tracking {
                tracker.error(origin);
            }
        }
    }

    fn finish(&self, mut tracker: OperationTracker, kind: OperationKind) {
        tracker.op(kind);
        if let Some(event) = tracker.create_event() {
            self.sink.send(event);
        }
    }
}

impl<P, T> fmt::Debug for Migration<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("settings", &self.settings)
            .field("has_check", &self.check.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::{Ready, ready};

    use super::*;
    use crate::evaluation::StaticStageEvaluator;
    use crate::event::Measurement;
    use crate::sink::InMemoryEventSink;
    use crate::tracker::tests::capture_logs;

    const FLAG: &str = "migration-flag";

    fn ok(value: &'static str) -> impl Fn(Option<u32>) -> Ready<MethodResult<String>> {
        move |_| ready(Ok(value.to_string()))
    }

    fn fail(message: &'static str) -> impl Fn(Option<u32>) -> Ready<MethodResult<String>> {
        move |_| ready(Err(OperationError::failed(message)))
    }

    fn evaluator(stage: MigrationStage) -> Arc<StaticStageEvaluator> {
        Arc::new(StaticStageEvaluator::new().with_stage(FLAG, stage))
    }

    fn complete_builder() -> MigrationBuilder<u32, String> {
        MigrationBuilder::<u32, String>::new()
            .read_old(ok("read-old"))
            .read_new(ok("read-new"))
            .write_old(ok("write-old"))
            .write_new(ok("write-new"))
    }

    /// Counts calls and echoes the payload.
    struct CountingMethod {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MigrationMethod<u32, String> for CountingMethod {
        async fn call(&self, payload: Option<u32>) -> MethodResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("payload={payload:?}"))
        }
    }

    #[test]
    fn test_build_requires_every_method() {
        let sink = Arc::new(InMemoryEventSink::new());

        let cases: [(MigrationBuilder<u32, String>, &str); 4] = [
            (
                MigrationBuilder::new()
                    .read_new(ok("n"))
                    .write_old(ok("o"))
                    .write_new(ok("n")),
                "read_old",
            ),
            (
                MigrationBuilder::new()
                    .read_old(ok("o"))
                    .write_old(ok("o"))
                    .write_new(ok("n")),
                "read_new",
            ),
            (
                MigrationBuilder::new()
                    .read_old(ok("o"))
                    .read_new(ok("n"))
                    .write_new(ok("n")),
                "write_old",
            ),
            (
                MigrationBuilder::new()
                    .read_old(ok("o"))
                    .read_new(ok("n"))
                    .write_old(ok("o")),
                "write_new",
            ),
        ];

        for (builder, missing) in cases {
            let err = builder
                .build(evaluator(MigrationStage::Off), sink.clone())
                .unwrap_err();
            assert!(
                matches!(err, MigrationError::MissingMethod { method } if method == missing),
                "expected {missing} to be reported, got {err}"
            );
        }
    }

    #[test]
    fn test_builder_settings() {
        let migration = complete_builder()
            .execution(ExecutionOrder::SerialRandom)
            .latency_tracking(false)
            .error_tracking(false)
            .build(
                evaluator(MigrationStage::Off),
                Arc::new(InMemoryEventSink::new()),
            )
            .unwrap();

        let settings = migration.settings();
        assert_eq!(settings.execution, ExecutionOrder::SerialRandom);
        assert!(!settings.latency_tracking);
        assert!(!settings.error_tracking);

        let debug = format!("{migration:?}");
        assert!(debug.contains("Migration"));
        assert!(debug.contains("has_check: false"));
    }

    #[test]
    fn test_migration_result_accessors() {
        let success = MigrationResult::new(Origin::New, Ok::<_, OperationError>(5));
        assert!(success.is_success());
        assert_eq!(success.value(), Some(&5));
        assert!(success.error().is_none());
        assert_eq!(success.into_result(), Ok(5));

        let failure = MigrationResult::<u8>::new(Origin::Old, Err(OperationError::failed("boom")));
        assert!(!failure.is_success());
        assert_eq!(failure.value(), None);
        assert_eq!(failure.error().map(OperationError::kind), Some("failed"));
    }

    #[tokio::test]
    async fn test_custom_method_receives_payload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(InMemoryEventSink::new());

        let migration = complete_builder()
            .method(
                OperationKind::Read,
                Origin::Old,
                CountingMethod {
                    calls: Arc::clone(&calls),
                },
            )
            .build(evaluator(MigrationStage::Off), sink.clone())
            .unwrap();

        let result = migration
            .read(FLAG, &Context::user("u"), MigrationStage::Off, Some(42))
            .await;

        assert_eq!(result.origin, Origin::Old);
        assert_eq!(result.value().map(String::as_str), Some("payload=Some(42)"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_both_origins_run_once_in_shadow() {
        let old_calls = Arc::new(AtomicUsize::new(0));
        let new_calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(InMemoryEventSink::new());

        let migration = complete_builder()
            .method(
                OperationKind::Read,
                Origin::Old,
                CountingMethod {
                    calls: Arc::clone(&old_calls),
                },
            )
            .method(
                OperationKind::Read,
                Origin::New,
                CountingMethod {
                    calls: Arc::clone(&new_calls),
                },
            )
            .check(|a: &String, b: &String| a == b)
            .build(evaluator(MigrationStage::Shadow), sink.clone())
            .unwrap();

        let result = migration
            .read(FLAG, &Context::user("u"), MigrationStage::Off, None)
            .await;

        assert_eq!(result.origin, Origin::Old);
        assert_eq!(old_calls.load(Ordering::SeqCst), 1);
        assert_eq!(new_calls.load(Ordering::SeqCst), 1);

        let event = sink.drain().pop().unwrap();
        assert_eq!(
            event.measurement("consistent"),
            Some(&Measurement::Consistent {
                value: true,
                sampling_ratio: 1.0,
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_context_suppresses_event_but_not_result() {
        let sink = Arc::new(InMemoryEventSink::new());
        let migration = complete_builder()
            .build(evaluator(MigrationStage::Live), sink.clone())
            .unwrap();

        let result = migration
            .read(
                FLAG,
                &Context::multi(Vec::<(String, String)>::new()),
                MigrationStage::Off,
                None,
            )
            .await;

        assert_eq!(result.value().map(String::as_str), Some("read-new"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_failed_origin_is_logged() {
        let sink = Arc::new(InMemoryEventSink::new());
        let migration = complete_builder()
            .read_old(fail("old store offline"))
            .build(evaluator(MigrationStage::Off), sink.clone())
            .unwrap();

        let (result, logs) = capture_logs(|| {
            futures::executor::block_on(migration.read(
                FLAG,
                &Context::user("u"),
                MigrationStage::Off,
                None,
            ))
        });

        assert!(!result.is_success());
        assert!(logs.contains("migration origin failed"), "logs: {logs}");
        assert!(logs.contains("old store offline"), "logs: {logs}");
    }
}
