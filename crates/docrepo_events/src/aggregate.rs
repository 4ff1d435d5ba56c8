//! Event-sourced aggregates.
//!
//! # Invariants
//! - Pending events are applied to in-memory state when raised and stay
//!   pending until a persist succeeds.
//! - Sequence numbers grow by one per event within a stream.

use crate::events::{AtomicEvent, DomainEvent, DomainEventPayload, Event, EventMetadata};

/// Replay position, unsaved events and the stream marker of one aggregate.
#[derive(Debug, Default)]
pub struct AggregateState {
    sequence: u64,
    pending: Vec<Box<dyn DomainEvent>>,
    atomic: Option<AtomicEvent>,
}

impl AggregateState {
    /// Sequence of the last persisted event.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Metadata for the next event to raise.
    pub fn next_metadata(&self) -> EventMetadata {
        EventMetadata::new(self.sequence + self.pending.len() as u64 + 1)
    }

    pub fn pending(&self) -> &[Box<dyn DomainEvent>] {
        &self.pending
    }

    pub fn atomic(&self) -> Option<&AtomicEvent> {
        self.atomic.as_ref()
    }

    pub(crate) fn record(&mut self, event: Box<dyn DomainEvent>) {
        self.pending.push(event);
    }

    pub(crate) fn observe(&mut self, payload: &DomainEventPayload) {
        self.sequence = self.sequence.max(payload.metadata().sequence);
        if let DomainEventPayload::Atomic(atomic) = payload {
            self.atomic = Some(atomic.clone());
        }
    }

    /// Marks every pending event persisted under `atomic`.
    pub(crate) fn commit(&mut self, atomic: AtomicEvent) {
        self.sequence += self.pending.len() as u64;
        self.pending.clear();
        self.atomic = Some(atomic);
    }
}

/// Domain object rebuilt from its event stream.
pub trait AggregateRoot: Send + Sync + Sized {
    /// Empty aggregate for the stream `partition_key`.
    fn empty(partition_key: &str) -> Self;

    fn partition_key(&self) -> &str;

    /// Folds one event into state; must not fail.
    fn apply(&mut self, event: &dyn DomainEvent);

    fn state(&self) -> &AggregateState;

    fn state_mut(&mut self) -> &mut AggregateState;

    /// Applies `event` and queues it for the next persist.
    fn raise<E: Event>(&mut self, event: E) {
        self.apply(&event);
        self.state_mut().record(Box::new(event));
    }

    /// Rebuilds state from stored payloads, in stream order.
    fn replay(&mut self, events: &[DomainEventPayload]) {
        for payload in events {
            if let DomainEventPayload::Domain(event) = payload {
                self.apply(event.as_ref());
            }
            self.state_mut().observe(payload);
        }
    }
}
