//! Typed repository contract and its default engine.
//!
//! # Responsibility
//! - Define the use-case oriented data access surface (`Repository<T>`).
//! - Race every operation against a caller-supplied cancellation token.
//!
//! # Invariants
//! - Writes validate id and partition key before any store call.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`,
//!   `ConcurrencyConflict`) in addition to store transport errors.
//! - A cancelled operation resolves to `Cancelled` and its in-flight store
//!   call is dropped.

pub mod default_repo;

use crate::error::{RepoError, RepoResult};
use crate::model::item::Item;
use crate::processors::Page;
use crate::query::{Filter, QueryDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub use default_repo::DefaultRepository;

/// One vector similarity match, addressable by `(id, partition_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchHit {
    pub id: String,
    pub partition_key: String,
    pub score: f64,
}

/// Resolves `future` unless `cancel` fires first.
///
/// An already-cancelled token wins without polling `future`.
pub async fn with_cancellation<F, R>(
    operation: &'static str,
    cancel: &CancellationToken,
    future: F,
) -> RepoResult<R>
where
    F: Future<Output = RepoResult<R>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepoError::Cancelled { operation }),
        result = future => result,
    }
}

/// Data access contract for one item type.
///
/// `partition_key` arguments default to the item id when `None`.
#[async_trait]
pub trait Repository<T: Item>: Send + Sync {
    /// Inserts `item`; an existing id in the same partition is a `Conflict`.
    async fn create(&self, item: T, cancel: &CancellationToken) -> RepoResult<T>;

    /// Creates every item concurrently. Successful creates are kept even
    /// when others fail; failures are reported together as `Aggregate`.
    async fn create_many(&self, items: Vec<T>, cancel: &CancellationToken) -> RepoResult<Vec<T>>;

    /// Computes the item's embedding from its text, then creates it.
    async fn create_with_embeddings(&self, item: T, cancel: &CancellationToken) -> RepoResult<T>;

    async fn get(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<T>;

    /// Like [`Repository::get`] but maps `NotFound` to `None`.
    async fn try_get(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<Option<T>>;

    /// Items of this type matching `filter`, across partitions.
    async fn get_where(&self, filter: Filter, cancel: &CancellationToken) -> RepoResult<Vec<T>>;

    /// Executes `query` verbatim; no discriminator is injected.
    ///
    /// Rows still pass the strict type check, so with strict checking
    /// enabled a row of another type fails the call with `TypeMismatch`.
    /// Add `c.type = @type` to the query to read a shared container.
    async fn get_by_query(
        &self,
        query: QueryDefinition,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<T>>;

    /// Ids, partition keys and scores of the `top` items of this type most
    /// similar to `text`. Items without an embedding never match.
    async fn get_vector_search_hits(
        &self,
        text: &str,
        top: usize,
        force_index_scan: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<VectorSearchHit>>;

    /// The `top` items most similar to `text`, most similar first.
    async fn get_vector_search_results(
        &self,
        text: &str,
        top: usize,
        force_index_scan: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<T>>;

    /// Replaces `item`, guarded by its etag unless `ignore_etag` is set.
    async fn update(&self, item: T, ignore_etag: bool, cancel: &CancellationToken)
        -> RepoResult<T>;

    /// Creates or replaces `item`; an etag on the item guards the replace
    /// unless `ignore_etag` is set.
    async fn upsert(&self, item: T, ignore_etag: bool, cancel: &CancellationToken)
        -> RepoResult<T>;

    async fn delete(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<()>;

    /// Idempotent delete; `false` when nothing was there.
    async fn try_delete(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<bool>;

    async fn exists(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<bool>;

    async fn exists_where(&self, filter: Filter, cancel: &CancellationToken) -> RepoResult<bool>;

    async fn count_where(&self, filter: Filter, cancel: &CancellationToken) -> RepoResult<u64>;

    /// One page of matching items; feed `continuation` back for the next.
    async fn page_where(
        &self,
        filter: Filter,
        page_size: usize,
        continuation: Option<String>,
        cancel: &CancellationToken,
    ) -> RepoResult<Page<T>>;
}
