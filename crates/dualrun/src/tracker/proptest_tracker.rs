//! Property-based tests for tracker event validation.
//!
//! Any sequence of tracker calls either yields no event, or an event whose
//! measurements only mention invoked origins.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use super::OperationTracker;
use crate::context::Context;
use crate::event::Measurement;
use crate::reason::EvaluationReason;
use crate::sampling::FixedSampler;
use crate::stage::{MigrationStage, OperationKind, Origin};

#[derive(Debug, Clone)]
enum Call {
    Op(OperationKind),
    Invoked(Origin),
    Error(Origin),
    Latency(Origin, u64),
    Consistency(bool),
}

fn origin() -> impl Strategy<Value = Origin> {
    prop_oneof![Just(Origin::Old), Just(Origin::New)]
}

fn call() -> impl Strategy<Value = Call> {
    prop_oneof![
        prop_oneof![Just(OperationKind::Read), Just(OperationKind::Write)].prop_map(Call::Op),
        origin().prop_map(Call::Invoked),
        origin().prop_map(Call::Error),
        (origin(), 0u64..10_000).prop_map(|(o, us)| Call::Latency(o, us)),
        any::<bool>().prop_map(Call::Consistency),
    ]
}

fn apply(calls: &[Call]) -> OperationTracker {
    let mut tracker = OperationTracker::new(
        "flag",
        &Context::user("user-key"),
        MigrationStage::Off,
        MigrationStage::Shadow,
        EvaluationReason::Fallthrough,
    )
    .with_sampler(Arc::new(FixedSampler::ALWAYS));

    for call in calls {
        match call {
            Call::Op(kind) => tracker.op(*kind),
            Call::Invoked(origin) => tracker.invoked(*origin),
            Call::Error(origin) => tracker.error(*origin),
            Call::Latency(origin, us) => tracker.latency(*origin, Duration::from_micros(*us)),
            Call::Consistency(result) => {
                let result = *result;
                tracker.consistency(move || result);
            },
        }
    }
    tracker
}

proptest! {
    /// Property: an emitted event never mentions an origin that was not
    /// invoked.
    #[test]
    fn prop_event_measurements_reference_invoked_origins(
        calls in prop::collection::vec(call(), 0..16),
    ) {
        let tracker = apply(&calls);
        let Some(event) = tracker.create_event() else {
            return Ok(());
        };

        let mut invoked = None;
        for measurement in event.measurements() {
            match measurement {
                Measurement::Invoked { values } => invoked = Some(*values),
                Measurement::Consistent { .. } => {
                    let values = invoked.expect("invoked comes first");
                    prop_assert!(values.old && values.new);
                },
                Measurement::Latency { values } => {
                    let flags = invoked.expect("invoked comes first");
                    for origin in Origin::BOTH {
                        prop_assert!(values.get(origin).is_none() || flags.get(origin));
                    }
                },
                Measurement::Error { values } => {
                    let flags = invoked.expect("invoked comes first");
                    for origin in Origin::BOTH {
                        prop_assert!(!values.get(origin) || flags.get(origin));
                    }
                },
            }
        }
        prop_assert!(invoked.is_some_and(|flags| !flags.is_empty()));
    }

    /// Property: an event is produced exactly when the tracker state is valid.
    #[test]
    fn prop_event_emitted_iff_state_valid(
        calls in prop::collection::vec(call(), 0..16),
    ) {
        let tracker = apply(&calls);

        let mut valid = tracker.operation().is_some()
            && (tracker.was_invoked(Origin::Old) || tracker.was_invoked(Origin::New));
        for origin in Origin::BOTH {
            if !tracker.was_invoked(origin) {
                valid &= tracker.latency_ms(origin).is_none();
                valid &= !tracker.had_error(origin);
                valid &= tracker.consistency_state().value().is_none();
            }
        }

        prop_assert_eq!(tracker.create_event().is_some(), valid);
    }
}
