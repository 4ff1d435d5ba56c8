//! Domain event contracts and the payload registry.
//!
//! # Responsibility
//! - Describe what a storable event looks like (`Event`) and expose an
//!   object-safe view (`DomainEvent`) for heterogeneous streams.
//! - Decode stored payloads by event name through an explicit registry.
//!
//! # Invariants
//! - `sys.atomic` is reserved for the stream marker and cannot be
//!   registered by callers.

use chrono::{DateTime, Utc};
use docrepo_core::{RepoError, RepoResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Event name of the per-stream concurrency marker.
pub const ATOMIC_EVENT_NAME: &str = "sys.atomic";

/// Position and time of one event within its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub sequence: u64,
    pub occurred_utc: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            occurred_utc: Utc::now(),
        }
    }
}

/// A concrete, serializable domain event.
///
/// Flatten [`EventMetadata`] into the struct and return it from `metadata`.
pub trait Event: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    const EVENT_NAME: &'static str;

    fn metadata(&self) -> &EventMetadata;
}

/// Object-safe view over any [`Event`].
pub trait DomainEvent: fmt::Debug + Send + Sync {
    fn event_name(&self) -> &str;

    fn metadata(&self) -> &EventMetadata;

    fn to_payload(&self) -> Result<Value, serde_json::Error>;

    fn as_any(&self) -> &dyn Any;
}

impl<E: Event> DomainEvent for E {
    fn event_name(&self) -> &str {
        E::EVENT_NAME
    }

    fn metadata(&self) -> &EventMetadata {
        Event::metadata(self)
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<'a> dyn DomainEvent + 'a {
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}

/// Stream marker with a fixed identity and the store-assigned etag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicEvent {
    pub id: Uuid,
    /// Never serialized into the payload; lives on the stored item.
    #[serde(skip)]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub metadata: EventMetadata,
}

impl AtomicEvent {
    /// Fresh marker for a stream that has none yet.
    pub fn new(sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            etag: None,
            metadata: EventMetadata::new(sequence),
        }
    }
}

impl Event for AtomicEvent {
    const EVENT_NAME: &'static str = ATOMIC_EVENT_NAME;

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

/// A stored event decoded back into memory.
#[derive(Debug)]
pub enum DomainEventPayload {
    Atomic(AtomicEvent),
    Domain(Box<dyn DomainEvent>),
}

impl DomainEventPayload {
    pub fn event_name(&self) -> &str {
        match self {
            Self::Atomic(_) => ATOMIC_EVENT_NAME,
            Self::Domain(event) => event.event_name(),
        }
    }

    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::Atomic(atomic) => &atomic.metadata,
            Self::Domain(event) => event.metadata(),
        }
    }

    pub fn as_atomic(&self) -> Option<&AtomicEvent> {
        match self {
            Self::Atomic(atomic) => Some(atomic),
            Self::Domain(_) => None,
        }
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        match self {
            Self::Atomic(_) => None,
            Self::Domain(event) => event.downcast_ref::<E>(),
        }
    }
}

type DecodeFn = fn(Value) -> Result<Box<dyn DomainEvent>, serde_json::Error>;

fn decode_event<E: Event>(payload: Value) -> Result<Box<dyn DomainEvent>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<E>(payload)?))
}

/// Maps event names to payload decoders.
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.decoders.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("EventRegistry").field("events", &names).finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` under `E::EVENT_NAME`; a later registration of the
    /// same name wins.
    pub fn register<E: Event>(mut self) -> Self {
        if E::EVENT_NAME != ATOMIC_EVENT_NAME {
            self.decoders
                .insert(E::EVENT_NAME.to_string(), decode_event::<E> as DecodeFn);
        }
        self
    }

    pub fn contains(&self, event_name: &str) -> bool {
        self.decoders.contains_key(event_name)
    }

    /// Decodes `payload` stored under `event_name`.
    ///
    /// # Errors
    /// - `Configuration` when the name was never registered.
    /// - `Serialization` when the payload does not match the event shape.
    pub fn decode(&self, event_name: &str, payload: Value) -> RepoResult<Box<dyn DomainEvent>> {
        let decode = self.decoders.get(event_name).ok_or_else(|| {
            RepoError::Configuration(format!("event `{event_name}` is not registered"))
        })?;
        Ok(decode(payload)?)
    }
}
