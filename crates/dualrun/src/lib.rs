//! # dualrun
//!
//! Staged execution of an old and a new implementation of the same
//! operation, with validated migration telemetry.
//!
//! A [`Migration`] wraps four implementations (old/new read and old/new
//! write). Every call asks a [`StageEvaluator`] which [`MigrationStage`] is
//! active and dispatches accordingly:
//!
//! - Reads run one origin, or both origins (`shadow`, `live`) with an optional
//!   consistency check. Both-origin reads may run concurrently.
//! - Writes always run sequentially. The non-authoritative write is skipped
//!   when the authoritative write fails.
//!
//! Each call produces at most one [`MigrationOpEvent`], built by an
//! [`OperationTracker`] that refuses to emit events whose measurements
//! disagree with what actually ran.
//!
//! ## Stages
//!
//! | Stage | Read authority | Write authority |
//! |---|---|---|
//! | `off` | old | old |
//! | `dualwrite` | old | old |
//! | `shadow` | old | old |
//! | `live` | new | new |
//! | `rampdown` | new | new |
//! | `complete` | new | new |
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dualrun::prelude::*;
//!
//! async fn old_store(payload: Option<u32>) -> MethodResult<String> {
//!     Ok(format!("old:{}", payload.unwrap_or_default()))
//! }
//!
//! async fn new_store(payload: Option<u32>) -> MethodResult<String> {
//!     Err(OperationError::failed(format!(
//!         "new store unavailable for {}",
//!         payload.unwrap_or_default()
//!     )))
//! }
//!
//! # futures::executor::block_on(async {
//! let sink = Arc::new(InMemoryEventSink::new());
//! let evaluator = Arc::new(
//!     StaticStageEvaluator::new().with_stage("orders-store", MigrationStage::DualWrite),
//! );
//!
//! let migration = MigrationBuilder::<u32, String>::new()
//!     .read_old(old_store)
//!     .read_new(new_store)
//!     .write_old(old_store)
//!     .write_new(new_store)
//!     .build(evaluator, sink.clone())
//!     .expect("all methods configured");
//!
//! let written = migration
//!     .write("orders-store", &Context::user("user-key"), MigrationStage::Off, Some(7))
//!     .await;
//!
//! assert_eq!(written.authoritative.origin, Origin::Old);
//! assert!(written.authoritative.is_success());
//! assert!(!written.non_authoritative.unwrap().is_success());
//! assert_eq!(sink.len(), 1);
//! # });
//! ```
//!
//! ## Modules
//!
//! - [`stage`]: stages, origins and authority tables
//! - [`migration`]: the executor and its builder
//! - [`tracker`]: per-call measurement collection and validation
//! - [`event`]: the serialized telemetry event
//! - [`evaluation`]: the stage evaluator seam
//! - [`config`]: settings loadable from TOML

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod execution;
pub mod invoke;
pub mod migration;
pub mod reason;
pub mod sampling;
pub mod sink;
pub mod stage;
pub mod tracker;

// Re-export main types at crate root for convenience
pub use config::MigrationSettings;
pub use context::Context;
pub use error::{MethodResult, MigrationError, OperationError};
pub use evaluation::{FlagMetadata, StageDecision, StageEvaluator, StaticStageEvaluator};
pub use event::{
    EvaluationSummary, EventKind, Measurement, MigrationOpEvent, OriginFlags, OriginLatencies,
};
pub use execution::ExecutionOrder;
pub use invoke::{safe_invoke, timed_invoke};
pub use migration::{
    ConsistencyCheck, Migration, MigrationBuilder, MigrationMethod, MigrationReadResult,
    MigrationResult, MigrationWriteResult,
};
pub use reason::{EvaluationErrorKind, EvaluationReason};
pub use sampling::{FixedSampler, RandomSampler, Sampler};
pub use sink::{EventSink, InMemoryEventSink};
pub use stage::{MigrationStage, OperationKind, Origin, OriginPair, UnknownStage};
pub use tracker::{Consistency, OperationTracker};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::MigrationSettings;
    pub use crate::context::Context;
    pub use crate::error::{MethodResult, MigrationError, OperationError};
    pub use crate::evaluation::{StageDecision, StageEvaluator, StaticStageEvaluator};
    pub use crate::event::MigrationOpEvent;
    pub use crate::execution::ExecutionOrder;
    pub use crate::migration::{
        Migration, MigrationBuilder, MigrationReadResult, MigrationResult, MigrationWriteResult,
    };
    pub use crate::reason::EvaluationReason;
    pub use crate::sink::{EventSink, InMemoryEventSink};
    pub use crate::stage::{MigrationStage, OperationKind, Origin};
    pub use crate::tracker::OperationTracker;
}
