//! Event store over the `EventItem` repository.
//!
//! # Responsibility
//! - Append immutable events and maintain the per-stream atomic marker.
//! - Persist a set of events per stream in one transactional batch.
//! - Read streams back in sequence order and replay aggregates.
//!
//! # Invariants
//! - No update path exists for regular events; a duplicate id in the same
//!   stream is a `Conflict`.
//! - The atomic marker is created when it has no etag and replaced under
//!   `if-match` otherwise, so concurrent writers of one stream serialize.

use crate::aggregate::AggregateRoot;
use crate::events::{AtomicEvent, DomainEvent, DomainEventPayload, EventRegistry};
use crate::item::EventItem;
use async_trait::async_trait;
use chrono::Utc;
use docrepo_core::store::BatchOperation;
use docrepo_core::{
    field, validate_item, with_cancellation, DefaultRepository, ErrorContext, Filter, Item,
    RepoError, RepoResult, Repository, RepositoryFactory,
};
use log::{debug, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a fresh event to stream `partition_key`.
    async fn append(
        &self,
        event: &dyn DomainEvent,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<EventItem>;

    /// Appends a prepared item, keeping its id.
    async fn append_item(&self, item: EventItem, cancel: &CancellationToken)
        -> RepoResult<EventItem>;

    /// Creates or conditionally replaces the stream marker.
    async fn append_atomic(
        &self,
        atomic: &AtomicEvent,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<EventItem>;

    /// Writes `items` with one transactional batch per stream.
    async fn persist(
        &self,
        items: Vec<EventItem>,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<EventItem>>;

    /// Every stored item of stream `partition_key`, by sequence.
    async fn read_stream(
        &self,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<EventItem>>;

    async fn read_stream_where(
        &self,
        partition_key: &str,
        filter: Filter,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<EventItem>>;

    /// Decoded events of stream `partition_key`, by sequence.
    async fn read_events(
        &self,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<DomainEventPayload>>;
}

#[derive(Debug)]
pub struct DefaultEventStore {
    repository: DefaultRepository<EventItem>,
    registry: Arc<EventRegistry>,
}

impl DefaultEventStore {
    /// # Errors
    /// - `Configuration` when `EventItem` has no registered container.
    pub fn new(factory: &RepositoryFactory, registry: EventRegistry) -> RepoResult<Self> {
        Ok(Self {
            repository: factory.repository::<EventItem>()?,
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Rebuilds aggregate `A` from stream `partition_key`.
    pub async fn read_aggregate<A: AggregateRoot>(
        &self,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<A> {
        let events = self.read_events(partition_key, cancel).await?;
        let mut aggregate = A::empty(partition_key);
        aggregate.replay(&events);
        debug!(
            "event=aggregate_replay module=event_store status=ok stream={} events={} sequence={}",
            partition_key,
            events.len(),
            aggregate.state().sequence()
        );
        Ok(aggregate)
    }

    /// Persists the pending events of `aggregate` together with its marker.
    ///
    /// On failure the events stay pending and the marker is unchanged.
    pub async fn persist_aggregate<A: AggregateRoot>(
        &self,
        aggregate: &mut A,
        cancel: &CancellationToken,
    ) -> RepoResult<()> {
        let state = aggregate.state();
        if state.pending().is_empty() {
            return Ok(());
        }
        let partition_key = aggregate.partition_key().to_string();
        let last_sequence = state.sequence() + state.pending().len() as u64;

        let mut items = state
            .pending()
            .iter()
            .map(|event| EventItem::from_event(event.as_ref(), &partition_key))
            .collect::<RepoResult<Vec<_>>>()?;

        let mut atomic = state
            .atomic()
            .cloned()
            .unwrap_or_else(|| AtomicEvent::new(last_sequence));
        atomic.metadata.sequence = last_sequence;
        items.push(EventItem::from_atomic(&atomic, &partition_key)?);

        let stored = self.persist(items, cancel).await?;
        let marker_id = atomic.id.to_string();
        atomic.etag = stored
            .iter()
            .find(|item| item.is_atomic() && item.id() == marker_id)
            .and_then(|item| item.etag().map(str::to_string));
        if atomic.etag.is_none() {
            return Err(RepoError::InvariantViolation(format!(
                "stream `{partition_key}` marker was persisted without an etag"
            )));
        }
        aggregate.state_mut().commit(atomic);
        Ok(())
    }

    async fn persist_batches(&self, items: Vec<EventItem>) -> RepoResult<Vec<EventItem>> {
        let mut streams: Vec<(String, Vec<EventItem>)> = Vec::new();
        for item in items {
            let partition_key = validate_item(&item)
                .map_err(|err| RepoError::invalid_item(EventItem::TYPE_NAME, err))?;
            match streams.iter_mut().find(|(key, _)| *key == partition_key) {
                Some((_, group)) => group.push(item),
                None => streams.push((partition_key, vec![item])),
            }
        }

        let container = self.repository.container().await?;
        let mut persisted = Vec::new();
        let now = Utc::now();
        for (partition_key, mut group) in streams {
            let mut operations = Vec::with_capacity(group.len());
            for item in &mut group {
                let replace_etag = match (item.is_atomic(), item.etag()) {
                    (true, Some(etag)) => Some(etag.to_string()),
                    _ => None,
                };
                item.stamp_write(now, replace_etag.is_none());
                let document = serde_json::to_value(&*item)?;
                let operation = match replace_etag {
                    Some(etag) => BatchOperation::Replace {
                        id: item.id().to_string(),
                        document,
                        if_match: Some(etag),
                    },
                    None => BatchOperation::Create { document },
                };
                operations.push(operation);
            }

            let response = container
                .execute_batch(&partition_key, operations)
                .await
                .map_err(|err| {
                    RepoError::from_store(
                        err,
                        ErrorContext {
                            type_name: EventItem::TYPE_NAME,
                            id: "batch",
                            partition_key: &partition_key,
                        },
                    )
                })?;
            info!(
                "event=event_persist module=event_store status=ok stream={} events={} charge={}",
                partition_key,
                group.len(),
                response.request_charge
            );

            for result in response.results {
                if let Some(document) = result.document {
                    persisted.push(serde_json::from_value::<EventItem>(document)?);
                }
            }
        }
        Ok(persisted)
    }

    async fn stream(
        &self,
        partition_key: &str,
        filter: Filter,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<EventItem>> {
        let scoped = field("partitionKey").eq(partition_key).and(filter);
        let mut items = self.repository.get_where(scoped, cancel).await?;
        items.sort_by_key(EventItem::sequence);
        Ok(items)
    }
}

#[async_trait]
impl EventStore for DefaultEventStore {
    async fn append(
        &self,
        event: &dyn DomainEvent,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<EventItem> {
        let item = EventItem::from_event(event, partition_key)?;
        self.append_item(item, cancel).await
    }

    async fn append_item(
        &self,
        item: EventItem,
        cancel: &CancellationToken,
    ) -> RepoResult<EventItem> {
        let stored = self.repository.create(item, cancel).await?;
        debug!(
            "event=event_append module=event_store status=ok stream={} name={} id={}",
            stored.partition_key,
            stored.event_name,
            stored.id()
        );
        Ok(stored)
    }

    async fn append_atomic(
        &self,
        atomic: &AtomicEvent,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<EventItem> {
        let item = EventItem::from_atomic(atomic, partition_key)?;
        if item.etag().is_some() {
            self.repository.update(item, false, cancel).await
        } else {
            self.repository.create(item, cancel).await
        }
    }

    async fn persist(
        &self,
        items: Vec<EventItem>,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<EventItem>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        with_cancellation("persist", cancel, self.persist_batches(items)).await
    }

    async fn read_stream(
        &self,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<EventItem>> {
        self.stream(partition_key, Filter::All, cancel).await
    }

    async fn read_stream_where(
        &self,
        partition_key: &str,
        filter: Filter,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<EventItem>> {
        self.stream(partition_key, filter, cancel).await
    }

    async fn read_events(
        &self,
        partition_key: &str,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<DomainEventPayload>> {
        self.read_stream(partition_key, cancel)
            .await?
            .iter()
            .map(|item| item.domain_event_payload(&self.registry))
            .collect()
    }
}
