//! Document store boundary.
//!
//! # Responsibility
//! - Define the async traits the repository engine talks to
//!   (`DocumentStore`, `Container`).
//! - Ship two adapters: `MemoryStore` (in-process) and `SqliteStore`
//!   (durable single file).
//!
//! # Invariants
//! - Every response reports the request charge it consumed.
//! - Writes return the freshly assigned etag.
//! - Dropping a returned future abandons the call; no adapter leaves a
//!   partially applied write behind.

pub(crate) mod document;
pub mod error;
pub mod memory;
pub mod properties;
pub mod sqlite;

use crate::query::QueryDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

pub use error::{StoreError, StoreErrorKind, StoreResult};
pub use memory::MemoryStore;
pub use properties::{
    ContainerProperties, Embedding, IndexPath, IndexingPolicy, VectorDataType,
    VectorEmbeddingPolicy, VectorIndexPath,
};
pub use sqlite::SqliteStore;

pub(crate) const READ_CHARGE: f64 = 1.0;
pub(crate) const WRITE_CHARGE: f64 = 5.0;
pub(crate) const QUERY_BASE_CHARGE: f64 = 2.5;
pub(crate) const QUERY_DOCUMENT_CHARGE: f64 = 0.1;

pub(crate) fn query_charge(documents: usize) -> f64 {
    QUERY_BASE_CHARGE + QUERY_DOCUMENT_CHARGE * documents as f64
}

/// Result of a point operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResponse {
    pub document: Value,
    pub etag: String,
    pub request_charge: f64,
}

/// Per-query execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Restricts execution to one logical partition when set.
    pub partition_key: Option<String>,
    /// Page size hint; `None` lets the store choose.
    pub max_item_count: Option<usize>,
}

impl QueryOptions {
    pub fn for_partition(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: Some(partition_key.into()),
            max_item_count: None,
        }
    }

    pub fn with_max_item_count(mut self, max_item_count: usize) -> Self {
        self.max_item_count = Some(max_item_count);
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub documents: Vec<Value>,
    /// Opaque token for the next page; `None` once drained.
    pub continuation: Option<String>,
    pub request_charge: f64,
}

/// Operation inside a transactional batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    Create {
        document: Value,
    },
    Replace {
        id: String,
        document: Value,
        if_match: Option<String>,
    },
    Upsert {
        document: Value,
    },
    Delete {
        id: String,
    },
}

impl BatchOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Replace { .. } => "replace",
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperationResult {
    pub id: String,
    /// Stored document; `None` for deletes.
    pub document: Option<Value>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    pub results: Vec<BatchOperationResult>,
    pub request_charge: f64,
}

/// Entry point of a document database.
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    /// Returns the named container, creating it with `properties` when
    /// absent. Existing containers keep their stored properties.
    async fn create_container_if_not_exists(
        &self,
        properties: ContainerProperties,
    ) -> StoreResult<Arc<dyn Container>>;

    /// Overwrites the stored properties of an existing container.
    async fn replace_container_properties(&self, properties: ContainerProperties)
        -> StoreResult<()>;
}

/// Handle to one container.
#[async_trait]
pub trait Container: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Snapshot of the current container properties.
    fn properties(&self) -> ContainerProperties;

    /// Inserts a new document. Existing `(partition_key, id)` → `Conflict`.
    async fn create_item(&self, partition_key: &str, document: Value)
        -> StoreResult<ItemResponse>;

    async fn read_item(&self, id: &str, partition_key: &str) -> StoreResult<ItemResponse>;

    /// Replaces an existing document; `if_match` mismatch → `PreconditionFailed`.
    async fn replace_item(
        &self,
        id: &str,
        partition_key: &str,
        document: Value,
        if_match: Option<&str>,
    ) -> StoreResult<ItemResponse>;

    async fn upsert_item(
        &self,
        partition_key: &str,
        document: Value,
        if_match: Option<&str>,
    ) -> StoreResult<ItemResponse>;

    /// Deletes a document and returns the request charge.
    async fn delete_item(&self, id: &str, partition_key: &str) -> StoreResult<f64>;

    async fn query_page(
        &self,
        query: &QueryDefinition,
        options: &QueryOptions,
        continuation: Option<&str>,
    ) -> StoreResult<QueryPage>;

    /// Applies `operations` atomically inside one logical partition. The
    /// first failing operation aborts the batch and its error kind is
    /// returned.
    async fn execute_batch(
        &self,
        partition_key: &str,
        operations: Vec<BatchOperation>,
    ) -> StoreResult<BatchResponse>;
}
