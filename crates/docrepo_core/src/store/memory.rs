//! In-process `DocumentStore`.
//!
//! # Responsibility
//! - Back tests and single-process deployments without any external service.
//! - Mirror hosted-store semantics: etags, partition routing, unique keys,
//!   time-to-live, request charges and transactional batches.
//!
//! # Invariants
//! - Query results follow insertion order unless `ORDER BY` says otherwise.
//! - A failed batch leaves the container exactly as it was.

use super::document::{
    check_if_match, check_partition_key, check_unique_keys, document_id, is_expired,
    now_epoch_seconds, stamp,
};
use super::{
    query_charge, BatchOperation, BatchOperationResult, BatchResponse, Container,
    ContainerProperties, DocumentStore, ItemResponse, QueryOptions, QueryPage, StoreError,
    StoreResult, READ_CHARGE, WRITE_CHARGE,
};
use crate::query::engine::{page_rows, run};
use crate::query::QueryDefinition;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory document database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: RwLock<HashMap<String, Arc<MemoryContainer>>>,
    container_requests: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artificial delay before every store call.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Number of `create_container_if_not_exists` calls received so far.
    pub fn container_requests(&self) -> usize {
        self.container_requests.load(Ordering::SeqCst)
    }

    pub async fn container_names(&self) -> Vec<String> {
        let mut names = self.containers.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

async fn simulate_latency(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_container_if_not_exists(
        &self,
        properties: ContainerProperties,
    ) -> StoreResult<Arc<dyn Container>> {
        self.container_requests.fetch_add(1, Ordering::SeqCst);
        simulate_latency(self.latency).await;

        let mut containers = self.containers.write().await;
        if let Some(existing) = containers.get(&properties.name) {
            let existing: Arc<dyn Container> = existing.clone();
            return Ok(existing);
        }

        let name = properties.name.clone();
        let container = Arc::new(MemoryContainer {
            name: name.clone(),
            properties: StdRwLock::new(properties),
            state: RwLock::new(ContainerState::default()),
            latency: self.latency,
        });
        containers.insert(name.clone(), Arc::clone(&container));
        info!(
            "event=container_create module=store status=ok store=memory container={}",
            name
        );
        let container: Arc<dyn Container> = container;
        Ok(container)
    }

    async fn replace_container_properties(
        &self,
        properties: ContainerProperties,
    ) -> StoreResult<()> {
        simulate_latency(self.latency).await;
        let containers = self.containers.read().await;
        let container = containers.get(&properties.name).ok_or_else(|| {
            StoreError::not_found(format!("container `{}` does not exist", properties.name))
        })?;
        let mut current = container
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Partitioning is fixed at creation time.
        if current.partition_key_path != properties.partition_key_path {
            return Err(StoreError::bad_request(format!(
                "partition key path of container `{}` cannot change",
                properties.name
            )));
        }
        *current = properties;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    sequence: u64,
    timestamp: i64,
    etag: String,
    document: Value,
}

type DocumentKey = (String, String);

#[derive(Debug, Clone, Default)]
struct ContainerState {
    documents: HashMap<DocumentKey, StoredDocument>,
    next_sequence: u64,
}

fn key(partition_key: &str, id: &str) -> DocumentKey {
    (partition_key.to_string(), id.to_string())
}

fn missing(id: &str, partition_key: &str) -> StoreError {
    StoreError::not_found(format!(
        "document `{id}` does not exist in partition `{partition_key}`"
    ))
}

impl ContainerState {
    fn live(
        &self,
        key: &DocumentKey,
        properties: &ContainerProperties,
        now: i64,
    ) -> Option<&StoredDocument> {
        self.documents.get(key).filter(|stored| {
            !is_expired(
                &stored.document,
                stored.timestamp,
                properties.default_time_to_live,
                now,
            )
        })
    }

    fn peers<'a>(
        &'a self,
        partition_key: &'a str,
        properties: &'a ContainerProperties,
        now: i64,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + Clone {
        self.documents
            .iter()
            .filter(move |((pk, _), stored)| {
                pk == partition_key
                    && !is_expired(
                        &stored.document,
                        stored.timestamp,
                        properties.default_time_to_live,
                        now,
                    )
            })
            .map(|((_, id), stored)| (id.as_str(), &stored.document))
    }

    fn write(
        &mut self,
        key: DocumentKey,
        mut document: Value,
        now: i64,
        sequence: Option<u64>,
    ) -> StoreResult<(Value, String)> {
        let etag = stamp(&mut document, now)?;
        let sequence = match sequence {
            Some(sequence) => sequence,
            None => {
                self.next_sequence += 1;
                self.next_sequence
            }
        };
        self.documents.insert(
            key,
            StoredDocument {
                sequence,
                timestamp: now,
                etag: etag.clone(),
                document: document.clone(),
            },
        );
        Ok((document, etag))
    }

    fn create(
        &mut self,
        properties: &ContainerProperties,
        partition_key: &str,
        document: Value,
        now: i64,
    ) -> StoreResult<(Value, String)> {
        let id = document_id(&document)?;
        check_partition_key(&document, &properties.partition_key_path, partition_key)?;
        let key = key(partition_key, &id);
        if self.live(&key, properties, now).is_some() {
            return Err(StoreError::conflict(format!(
                "document `{id}` already exists in partition `{partition_key}`"
            )));
        }
        check_unique_keys(
            &properties.unique_key_policy,
            &id,
            &document,
            self.peers(partition_key, properties, now),
        )?;
        self.write(key, document, now, None)
    }

    fn replace(
        &mut self,
        properties: &ContainerProperties,
        id: &str,
        partition_key: &str,
        document: Value,
        if_match: Option<&str>,
        now: i64,
    ) -> StoreResult<(Value, String)> {
        if document_id(&document)? != id {
            return Err(StoreError::bad_request(format!(
                "replacement body id does not match `{id}`"
            )));
        }
        check_partition_key(&document, &properties.partition_key_path, partition_key)?;
        let key = key(partition_key, id);
        let sequence = {
            let current = self
                .live(&key, properties, now)
                .ok_or_else(|| missing(id, partition_key))?;
            check_if_match(id, &current.etag, if_match)?;
            current.sequence
        };
        check_unique_keys(
            &properties.unique_key_policy,
            id,
            &document,
            self.peers(partition_key, properties, now),
        )?;
        self.write(key, document, now, Some(sequence))
    }

    fn upsert(
        &mut self,
        properties: &ContainerProperties,
        partition_key: &str,
        document: Value,
        if_match: Option<&str>,
        now: i64,
    ) -> StoreResult<(Value, String)> {
        let id = document_id(&document)?;
        if self.live(&key(partition_key, &id), properties, now).is_some() {
            return self.replace(properties, &id, partition_key, document, if_match, now);
        }
        if if_match.is_some() {
            return Err(StoreError::precondition_failed(format!(
                "etag supplied for missing document `{id}`"
            )));
        }
        self.create(properties, partition_key, document, now)
    }

    fn delete(
        &mut self,
        properties: &ContainerProperties,
        id: &str,
        partition_key: &str,
        now: i64,
    ) -> StoreResult<()> {
        let key = key(partition_key, id);
        if self.live(&key, properties, now).is_none() {
            return Err(missing(id, partition_key));
        }
        self.documents.remove(&key);
        Ok(())
    }

    fn apply(
        &mut self,
        properties: &ContainerProperties,
        partition_key: &str,
        operation: BatchOperation,
        now: i64,
    ) -> StoreResult<BatchOperationResult> {
        let (id, stored) = match operation {
            BatchOperation::Create { document } => {
                let id = document_id(&document)?;
                (id, Some(self.create(properties, partition_key, document, now)?))
            }
            BatchOperation::Replace {
                id,
                document,
                if_match,
            } => {
                let stored =
                    self.replace(properties, &id, partition_key, document, if_match.as_deref(), now)?;
                (id, Some(stored))
            }
            BatchOperation::Upsert { document } => {
                let id = document_id(&document)?;
                (id, Some(self.upsert(properties, partition_key, document, None, now)?))
            }
            BatchOperation::Delete { id } => {
                self.delete(properties, &id, partition_key, now)?;
                (id, None)
            }
        };
        let (document, etag) = match stored {
            Some((document, etag)) => (Some(document), Some(etag)),
            None => (None, None),
        };
        Ok(BatchOperationResult { id, document, etag })
    }
}

#[derive(Debug)]
struct MemoryContainer {
    name: String,
    properties: StdRwLock<ContainerProperties>,
    state: RwLock<ContainerState>,
    latency: Option<Duration>,
}

impl MemoryContainer {
    fn snapshot(&self) -> ContainerProperties {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn log_write(&self, op: &str, id: &str) {
        debug!(
            "event=store_write module=store status=ok store=memory container={} op={} id={} charge={}",
            self.name, op, id, WRITE_CHARGE
        );
    }
}

#[async_trait]
impl Container for MemoryContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn properties(&self) -> ContainerProperties {
        self.snapshot()
    }

    async fn create_item(
        &self,
        partition_key: &str,
        document: Value,
    ) -> StoreResult<ItemResponse> {
        simulate_latency(self.latency).await;
        let properties = self.snapshot();
        let mut state = self.state.write().await;
        let (document, etag) =
            state.create(&properties, partition_key, document, now_epoch_seconds())?;
        self.log_write("create", document_id(&document)?.as_str());
        Ok(ItemResponse {
            document,
            etag,
            request_charge: WRITE_CHARGE,
        })
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> StoreResult<ItemResponse> {
        simulate_latency(self.latency).await;
        let properties = self.snapshot();
        let state = self.state.read().await;
        let stored = state
            .live(&key(partition_key, id), &properties, now_epoch_seconds())
            .ok_or_else(|| missing(id, partition_key))?;
        Ok(ItemResponse {
            document: stored.document.clone(),
            etag: stored.etag.clone(),
            request_charge: READ_CHARGE,
        })
    }

    async fn replace_item(
        &self,
        id: &str,
        partition_key: &str,
        document: Value,
        if_match: Option<&str>,
    ) -> StoreResult<ItemResponse> {
        simulate_latency(self.latency).await;
        let properties = self.snapshot();
        let mut state = self.state.write().await;
        let (document, etag) = state.replace(
            &properties,
            id,
            partition_key,
            document,
            if_match,
            now_epoch_seconds(),
        )?;
        self.log_write("replace", id);
        Ok(ItemResponse {
            document,
            etag,
            request_charge: WRITE_CHARGE,
        })
    }

    async fn upsert_item(
        &self,
        partition_key: &str,
        document: Value,
        if_match: Option<&str>,
    ) -> StoreResult<ItemResponse> {
        simulate_latency(self.latency).await;
        let properties = self.snapshot();
        let mut state = self.state.write().await;
        let (document, etag) = state.upsert(
            &properties,
            partition_key,
            document,
            if_match,
            now_epoch_seconds(),
        )?;
        self.log_write("upsert", document_id(&document)?.as_str());
        Ok(ItemResponse {
            document,
            etag,
            request_charge: WRITE_CHARGE,
        })
    }

    async fn delete_item(&self, id: &str, partition_key: &str) -> StoreResult<f64> {
        simulate_latency(self.latency).await;
        let properties = self.snapshot();
        let mut state = self.state.write().await;
        state.delete(&properties, id, partition_key, now_epoch_seconds())?;
        self.log_write("delete", id);
        Ok(WRITE_CHARGE)
    }

    async fn query_page(
        &self,
        query: &QueryDefinition,
        options: &QueryOptions,
        continuation: Option<&str>,
    ) -> StoreResult<QueryPage> {
        simulate_latency(self.latency).await;
        let properties = self.snapshot();
        let now = now_epoch_seconds();
        let state = self.state.read().await;

        let mut candidates = state
            .documents
            .iter()
            .filter(|((pk, _), stored)| {
                options
                    .partition_key
                    .as_deref()
                    .map_or(true, |partition_key| pk == partition_key)
                    && !is_expired(
                        &stored.document,
                        stored.timestamp,
                        properties.default_time_to_live,
                        now,
                    )
            })
            .map(|(_, stored)| stored)
            .collect::<Vec<_>>();
        candidates.sort_by_key(|stored| stored.sequence);

        let rows = run(
            query,
            candidates.iter().map(|stored| &stored.document),
            properties.vector_embedding_policy.as_ref(),
        )?;
        let (documents, continuation) = page_rows(rows, continuation, options.max_item_count)?;
        let request_charge = query_charge(documents.len());
        debug!(
            "event=store_query module=store status=ok store=memory container={} rows={} charge={}",
            self.name,
            documents.len(),
            request_charge
        );
        Ok(QueryPage {
            documents,
            continuation,
            request_charge,
        })
    }

    async fn execute_batch(
        &self,
        partition_key: &str,
        operations: Vec<BatchOperation>,
    ) -> StoreResult<BatchResponse> {
        simulate_latency(self.latency).await;
        let properties = self.snapshot();
        let now = now_epoch_seconds();
        let mut state = self.state.write().await;

        let mut staged = state.clone();
        let mut results = Vec::with_capacity(operations.len());
        let mut request_charge = 0.0;
        for (index, operation) in operations.into_iter().enumerate() {
            let name = operation.name();
            let result = staged
                .apply(&properties, partition_key, operation, now)
                .map_err(|err| {
                    StoreError::new(
                        err.kind,
                        format!("batch operation {index} ({name}) failed: {}", err.message),
                    )
                })?;
            request_charge += WRITE_CHARGE;
            results.push(result);
        }
        *state = staged;

        debug!(
            "event=store_batch module=store status=ok store=memory container={} operations={} charge={}",
            self.name,
            results.len(),
            request_charge
        );
        Ok(BatchResponse {
            results,
            request_charge,
        })
    }
}
