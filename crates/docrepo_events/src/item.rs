//! Stored form of one event.
//!
//! # Invariants
//! - `partitionKey` is non-empty from construction on; it names the stream.
//! - Items built from an `AtomicEvent` keep its id and etag, and convert
//!   back into the same marker.

use crate::events::{AtomicEvent, DomainEvent, DomainEventPayload, EventRegistry, ATOMIC_EVENT_NAME};
use chrono::{DateTime, Utc};
use docrepo_core::{Item, ItemHeader, RepoError, RepoResult, Timestamps};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventItem {
    #[serde(flatten)]
    header: ItemHeader,
    #[serde(flatten)]
    pub timestamps: Timestamps,
    pub event_payload: Value,
    pub event_name: String,
    pub partition_key: String,
}

impl Item for EventItem {
    const TYPE_NAME: &'static str = "EventItem";

    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ItemHeader {
        &mut self.header
    }

    fn partition_key_value(&self) -> String {
        self.partition_key.clone()
    }

    fn timestamps(&self) -> Option<&Timestamps> {
        Some(&self.timestamps)
    }

    fn timestamps_mut(&mut self) -> Option<&mut Timestamps> {
        Some(&mut self.timestamps)
    }
}

fn require_partition_key(partition_key: &str) -> RepoResult<String> {
    if partition_key.trim().is_empty() {
        return Err(RepoError::InvalidItem {
            type_name: EventItem::TYPE_NAME.to_string(),
            message: "event partition key must be provided".to_string(),
        });
    }
    Ok(partition_key.to_string())
}

impl EventItem {
    /// Wraps a fresh domain event under a newly generated id.
    pub fn from_event(event: &dyn DomainEvent, partition_key: &str) -> RepoResult<Self> {
        let partition_key = require_partition_key(partition_key)?;
        Ok(Self {
            header: ItemHeader::new::<Self>(),
            timestamps: Timestamps::default(),
            event_payload: event.to_payload()?,
            event_name: event.event_name().to_string(),
            partition_key,
        })
    }

    /// Wraps the stream marker, keeping its id and etag.
    pub fn from_atomic(atomic: &AtomicEvent, partition_key: &str) -> RepoResult<Self> {
        let partition_key = require_partition_key(partition_key)?;
        let mut header = ItemHeader::with_id::<Self>(atomic.id.to_string());
        header.etag = atomic.etag.clone();
        Ok(Self {
            header,
            timestamps: Timestamps::default(),
            event_payload: serde_json::to_value(atomic)?,
            event_name: ATOMIC_EVENT_NAME.to_string(),
            partition_key,
        })
    }

    /// Replaces the generated id; used when the caller owns event identity.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.header.id = id.into();
        self
    }

    /// Stamps write times for a batch write; `createdTimeUtc` only when
    /// `creating` and still unset.
    pub(crate) fn stamp_write(&mut self, now: DateTime<Utc>, creating: bool) {
        if creating && self.timestamps.created_time_utc.is_none() {
            self.timestamps.created_time_utc = Some(now);
        }
        self.timestamps.updated_time_utc = Some(now);
    }

    pub fn is_atomic(&self) -> bool {
        self.event_name == ATOMIC_EVENT_NAME
    }

    /// Stream position recorded in the payload; `0` when absent.
    pub fn sequence(&self) -> u64 {
        self.event_payload
            .get("sequence")
            .and_then(Value::as_u64)
            .unwrap_or_default()
    }

    /// Decodes the stored payload.
    ///
    /// # Errors
    /// - `InvariantViolation` when a stored atomic marker has no etag or a
    ///   non-UUID id.
    /// - `Configuration` when the event name is not registered.
    pub fn domain_event_payload(&self, registry: &EventRegistry) -> RepoResult<DomainEventPayload> {
        if !self.is_atomic() {
            let event = registry.decode(&self.event_name, self.event_payload.clone())?;
            return Ok(DomainEventPayload::Domain(event));
        }

        let etag = self.header.etag.clone().ok_or_else(|| {
            RepoError::InvariantViolation(format!(
                "atomic event `{}` in stream `{}` has no etag",
                self.header.id, self.partition_key
            ))
        })?;
        let id = Uuid::parse_str(&self.header.id).map_err(|err| {
            RepoError::InvariantViolation(format!(
                "atomic event id `{}` is not a UUID: {err}",
                self.header.id
            ))
        })?;
        let mut atomic: AtomicEvent = serde_json::from_value(self.event_payload.clone())?;
        atomic.id = id;
        atomic.etag = Some(etag);
        Ok(DomainEventPayload::Atomic(atomic))
    }
}

#[cfg(test)]
mod tests {
    use super::EventItem;
    use crate::events::{AtomicEvent, DomainEventPayload, EventRegistry};
    use docrepo_core::{Item, RepoError};

    #[test]
    fn blank_partition_key_is_rejected() {
        let err = EventItem::from_atomic(&AtomicEvent::new(1), "  ").expect_err("blank stream");
        assert!(matches!(err, RepoError::InvalidItem { .. }));
    }

    #[test]
    fn atomic_round_trip_keeps_identity() {
        let mut atomic = AtomicEvent::new(4);
        atomic.etag = Some("\"e7\"".to_string());
        let item = EventItem::from_atomic(&atomic, "cart-1").expect("atomic item");
        assert_eq!(item.id(), atomic.id.to_string());
        assert_eq!(item.etag(), Some("\"e7\""));
        assert_eq!(item.partition_key_value(), "cart-1");
        assert_eq!(item.sequence(), 4);

        match item
            .domain_event_payload(&EventRegistry::new())
            .expect("decode atomic")
        {
            DomainEventPayload::Atomic(decoded) => assert_eq!(decoded, atomic),
            other => panic!("expected atomic payload, got {other:?}"),
        }
    }

    #[test]
    fn stored_atomic_without_etag_violates_invariant() {
        let item = EventItem::from_atomic(&AtomicEvent::new(1), "cart-1").expect("atomic item");
        let err = item
            .domain_event_payload(&EventRegistry::new())
            .expect_err("missing etag");
        assert!(matches!(err, RepoError::InvariantViolation(_)));
    }
}
