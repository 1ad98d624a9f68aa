//! Telemetry sinks.
//!
//! A sink receives each validated [`MigrationOpEvent`]. Batching, retry and
//! delivery are the sink's business; the migration hands the event over and
//! forgets it.

use std::sync::{Arc, PoisonError, RwLock};

use crate::event::MigrationOpEvent;

/// Receives finished migration events.
pub trait EventSink: Send + Sync {
    /// Accepts one event.
    fn send(&self, event: MigrationOpEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn send(&self, event: MigrationOpEvent) {
        (**self).send(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: RwLock<Vec<MigrationOpEvent>>,
}

impl InMemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event received so far.
    #[must_use]
    pub fn events(&self) -> Vec<MigrationOpEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of events received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no events were received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every event received so far.
    pub fn drain(&self) -> Vec<MigrationOpEvent> {
        std::mem::take(
            &mut *self
                .events
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl EventSink for InMemoryEventSink {
    fn send(&self, event: MigrationOpEvent) {
        // A poisoned lock only means a holder panicked; keep collecting.
        let mut events = self
            .events
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        events.push(event);
    }
}
