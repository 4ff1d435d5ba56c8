//! Append-only event streams on top of `docrepo_core` repositories.
//!
//! Every stream is one logical partition. Events are immutable once
//! appended; a per-stream atomic marker carries the etag that serializes
//! concurrent writers.

pub mod aggregate;
pub mod events;
pub mod item;
pub mod store;

pub use aggregate::{AggregateRoot, AggregateState};
pub use events::{
    AtomicEvent, DomainEvent, DomainEventPayload, Event, EventMetadata, EventRegistry,
    ATOMIC_EVENT_NAME,
};
pub use item::EventItem;
pub use store::{DefaultEventStore, EventStore};
