//! Default `Repository<T>` engine over a resolved container.
//!
//! # Responsibility
//! - Stamp timestamps, validate identity and translate store statuses for
//!   every CRUD call.
//! - Scope typed queries to the item discriminator and drain store pages.
//! - Run the embed → similarity query → fetch flow for vector search.
//!
//! # Invariants
//! - `createdTimeUtc` is only written when absent; `updatedTimeUtc` is
//!   stamped on every write.
//! - Conditional writes forward the item etag as `if-match`.
//! - Vector results keep the similarity order of the hits.

use super::{with_cancellation, Repository, VectorSearchHit};
use crate::error::{AggregateError, BatchFailure, ErrorContext, RepoError, RepoResult};
use crate::logging::summarize_document;
use crate::model::item::{validate_item, Item};
use crate::options::ContainerOptions;
use crate::processors::embedding::{embed_checked, EmbeddingBackend};
use crate::processors::{Page, QueryIterationProcessor};
use crate::providers::vector_search::PARTITION_KEY_ALIAS;
use crate::providers::{ContainerProvider, ExpressionProvider, VectorSearchProvider};
use crate::query::{Filter, QueryDefinition};
use crate::store::{Container, ItemResponse, QueryOptions};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, warn};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct DefaultRepository<T: Item> {
    provider: Arc<ContainerProvider>,
    options: ContainerOptions,
    expressions: ExpressionProvider<T>,
    processor: QueryIterationProcessor,
    vector_search: VectorSearchProvider,
    embeddings: Option<Arc<dyn EmbeddingBackend>>,
}

impl<T: Item> fmt::Debug for DefaultRepository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultRepository")
            .field("type_name", &T::TYPE_NAME)
            .field("container", &self.options.container_name)
            .field("strict", &self.expressions.is_strict())
            .field("embeddings", &self.embeddings.is_some())
            .finish()
    }
}

impl<T: Item> DefaultRepository<T> {
    /// Builds the repository for `T`.
    ///
    /// # Errors
    /// - `Configuration` when `T` has no registered container options.
    pub fn new(
        provider: Arc<ContainerProvider>,
        embeddings: Option<Arc<dyn EmbeddingBackend>>,
    ) -> RepoResult<Self> {
        let options = provider.container_options(T::TYPE_NAME)?.clone();
        Ok(Self {
            expressions: ExpressionProvider::new(options.strict_type_checking),
            processor: QueryIterationProcessor,
            vector_search: provider.vector_search().clone(),
            provider,
            options,
            embeddings,
        })
    }

    pub fn container_options(&self) -> &ContainerOptions {
        &self.options
    }

    pub fn expressions(&self) -> &ExpressionProvider<T> {
        &self.expressions
    }

    /// Resolves the container backing `T`, creating it on first use.
    pub async fn container(&self) -> RepoResult<Arc<dyn Container>> {
        self.provider.get_container_for::<T>().await
    }

    fn context<'a>(&self, id: &'a str, partition_key: &'a str) -> ErrorContext<'a> {
        ErrorContext {
            type_name: T::TYPE_NAME,
            id,
            partition_key,
        }
    }

    fn unsupported(&self, operation: &'static str, reason: &str) -> RepoError {
        RepoError::Unsupported {
            type_name: T::TYPE_NAME.to_string(),
            operation,
            reason: reason.to_string(),
        }
    }

    fn validate(&self, item: &T) -> RepoResult<String> {
        validate_item(item).map_err(|err| RepoError::invalid_item(T::TYPE_NAME, err))
    }

    fn backend(&self, operation: &'static str) -> RepoResult<&dyn EmbeddingBackend> {
        self.embeddings
            .as_deref()
            .ok_or_else(|| self.unsupported(operation, "no embedding backend is configured"))
    }

    fn prepare_write(&self, item: &mut T, stamp_created: bool) {
        let header = item.header_mut();
        if header.item_type.is_empty() {
            header.item_type = T::TYPE_NAME.to_string();
        }
        let now = Utc::now();
        if let Some(timestamps) = item.timestamps_mut() {
            if stamp_created && timestamps.created_time_utc.is_none() {
                timestamps.created_time_utc = Some(now);
            }
            timestamps.updated_time_utc = Some(now);
        }
    }

    fn encode(&self, operation: &str, item: &T) -> RepoResult<Value> {
        let document = serde_json::to_value(item)?;
        debug!(
            "event=item_encode module=repository status=ok op={} type={} id={} body={}",
            operation,
            T::TYPE_NAME,
            item.id(),
            summarize_document(&document)
        );
        Ok(document)
    }

    fn decode(&self, operation: &str, response: ItemResponse) -> RepoResult<T> {
        debug!(
            "event=store_response module=repository status=ok op={} type={} etag={} charge={}",
            operation,
            T::TYPE_NAME,
            response.etag,
            response.request_charge
        );
        Ok(serde_json::from_value(response.document)?)
    }

    fn log_outcome<R>(
        &self,
        operation: &'static str,
        target: &str,
        started_at: Instant,
        result: &RepoResult<R>,
    ) {
        let duration_ms = started_at.elapsed().as_millis();
        match result {
            Ok(_) => debug!(
                "event=repo_op module=repository status=ok op={} type={} target={} duration_ms={}",
                operation,
                T::TYPE_NAME,
                target,
                duration_ms
            ),
            Err(err) if err.is_not_found() || matches!(err, RepoError::Cancelled { .. }) => warn!(
                "event=repo_op module=repository status=error op={} type={} target={} duration_ms={} error_code={}",
                operation,
                T::TYPE_NAME,
                target,
                duration_ms,
                err.code()
            ),
            Err(err) => error!(
                "event=repo_op module=repository status=error op={} type={} target={} duration_ms={} error_code={} error={}",
                operation,
                T::TYPE_NAME,
                target,
                duration_ms,
                err.code(),
                err
            ),
        }
    }

    fn log_recovered(&self, operation: &'static str, target: &str, started_at: Instant) {
        warn!(
            "event=repo_op module=repository status=recovered op={} type={} target={} duration_ms={} error_code=not_found",
            operation,
            T::TYPE_NAME,
            target,
            started_at.elapsed().as_millis()
        );
    }

    async fn create_item(&self, mut item: T) -> RepoResult<T> {
        let partition_key = self.validate(&item)?;
        self.prepare_write(&mut item, true);
        let document = self.encode("create", &item)?;

        let container = self.container().await?;
        let response = container
            .create_item(&partition_key, document)
            .await
            .map_err(|err| RepoError::from_store(err, self.context(item.id(), &partition_key)))?;
        self.decode("create", response)
    }

    async fn create_items(&self, items: Vec<T>) -> RepoResult<Vec<T>> {
        let ids = items
            .iter()
            .map(|item| item.id().to_string())
            .collect::<Vec<_>>();
        let attempted = items.len();
        let outcomes = join_all(items.into_iter().map(|item| self.create_item(item))).await;

        let mut created = Vec::with_capacity(attempted);
        let mut failures = Vec::new();
        for (index, (id, outcome)) in ids.into_iter().zip(outcomes).enumerate() {
            match outcome {
                Ok(item) => created.push(item),
                Err(error) => failures.push(BatchFailure { index, id, error }),
            }
        }

        if failures.is_empty() {
            Ok(created)
        } else {
            Err(AggregateError {
                type_name: T::TYPE_NAME.to_string(),
                attempted,
                failures,
            }
            .into())
        }
    }

    fn vector_dimensions(&self, operation: &'static str) -> RepoResult<usize> {
        self.vector_search
            .vector_options(T::TYPE_NAME)
            .map(|(options, _)| options.dimensions)
            .ok_or_else(|| self.unsupported(operation, "no vector search options are registered"))
    }

    async fn create_embedded(&self, mut item: T) -> RepoResult<T> {
        let backend = self.backend("create_with_embeddings")?;
        let text = item
            .as_vector_search()
            .map(|source| source.text())
            .ok_or_else(|| {
                self.unsupported(
                    "create_with_embeddings",
                    "item type does not expose vector search text",
                )
            })?;
        let dimensions = self
            .vector_search
            .vector_options(T::TYPE_NAME)
            .map(|(options, _)| options.dimensions);

        let vector = embed_checked(backend, &text, dimensions).await?;
        if let Some(target) = item.as_vector_search_mut() {
            target.set_embeddings(vector);
        }
        self.create_item(item).await
    }

    async fn read(&self, id: &str, partition_key: Option<&str>) -> RepoResult<T> {
        let partition_key = partition_key.unwrap_or(id);
        let container = self.container().await?;
        let response = container
            .read_item(id, partition_key)
            .await
            .map_err(|err| RepoError::from_store(err, self.context(id, partition_key)))?;
        let item = self.decode("get", response)?;
        self.expressions.check_item(&item)?;
        Ok(item)
    }

    async fn query_items(&self, query: &QueryDefinition, check: bool) -> RepoResult<Vec<T>> {
        let container = self.container().await?;
        let (items, charge) = self
            .processor
            .iterate::<T>(container.as_ref(), query, &QueryOptions::default())
            .await?;
        debug!(
            "event=repo_query module=repository status=ok type={} rows={} charge={}",
            T::TYPE_NAME,
            items.len(),
            charge
        );
        if check {
            for item in &items {
                self.expressions.check_item(item)?;
            }
        }
        Ok(items)
    }

    async fn vector_hits(
        &self,
        text: &str,
        top: usize,
        force_index_scan: bool,
    ) -> RepoResult<Vec<VectorSearchHit>> {
        let backend = self.backend("vector_search")?;
        let dimensions = self.vector_dimensions("vector_search")?;
        if top == 0 {
            return Ok(Vec::new());
        }

        let vector = embed_checked(backend, text, Some(dimensions)).await?;
        let query =
            self.vector_search
                .similarity_query(T::TYPE_NAME, &vector, top, force_index_scan)?;
        let container = self.container().await?;
        let (rows, charge) = self
            .processor
            .iterate_values(container.as_ref(), &query, &QueryOptions::default())
            .await?;

        // Rows without a score belong to documents that carry no embedding.
        let hits = rows.iter().filter_map(hit_from_row).collect::<Vec<_>>();
        debug!(
            "event=vector_search module=repository status=ok type={} top={} hits={} charge={}",
            T::TYPE_NAME,
            top,
            hits.len(),
            charge
        );
        Ok(hits)
    }

    async fn vector_results(
        &self,
        text: &str,
        top: usize,
        force_index_scan: bool,
    ) -> RepoResult<Vec<T>> {
        let hits = self.vector_hits(text, top, force_index_scan).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let container = self.container().await?;
        let reads = join_all(
            hits.iter()
                .map(|hit| container.read_item(&hit.id, &hit.partition_key)),
        )
        .await;

        let mut items = Vec::with_capacity(hits.len());
        for (hit, read) in hits.iter().zip(reads) {
            match read {
                Ok(response) => {
                    let item = self.decode("vector_fetch", response)?;
                    self.expressions.check_item(&item)?;
                    items.push(item);
                }
                Err(err) => match RepoError::from_store(
                    err,
                    self.context(&hit.id, &hit.partition_key),
                ) {
                    // Deleted between the similarity query and the fetch.
                    RepoError::NotFound { .. } => continue,
                    other => return Err(other),
                },
            }
        }
        Ok(items)
    }

    async fn replace(&self, mut item: T, ignore_etag: bool) -> RepoResult<T> {
        let partition_key = self.validate(&item)?;
        let id = item.id().to_string();
        let if_match = match (ignore_etag, item.etag()) {
            (true, _) => None,
            (false, Some(etag)) => Some(etag.to_string()),
            (false, None) => {
                return Err(RepoError::InvalidItem {
                    type_name: T::TYPE_NAME.to_string(),
                    message: format!(
                        "item `{id}` has no etag; read it first or pass ignore_etag"
                    ),
                })
            }
        };
        self.prepare_write(&mut item, false);
        let document = self.encode("update", &item)?;

        let container = self.container().await?;
        let response = container
            .replace_item(&id, &partition_key, document, if_match.as_deref())
            .await
            .map_err(|err| RepoError::from_store(err, self.context(&id, &partition_key)))?;
        self.decode("update", response)
    }

    async fn upsert_item(&self, mut item: T, ignore_etag: bool) -> RepoResult<T> {
        let partition_key = self.validate(&item)?;
        let id = item.id().to_string();
        let if_match = if ignore_etag {
            None
        } else {
            item.etag().map(str::to_string)
        };
        self.prepare_write(&mut item, true);
        let document = self.encode("upsert", &item)?;

        let container = self.container().await?;
        let response = container
            .upsert_item(&partition_key, document, if_match.as_deref())
            .await
            .map_err(|err| RepoError::from_store(err, self.context(&id, &partition_key)))?;
        self.decode("upsert", response)
    }

    async fn remove(&self, id: &str, partition_key: Option<&str>) -> RepoResult<()> {
        let partition_key = partition_key.unwrap_or(id);
        let container = self.container().await?;
        let charge = container
            .delete_item(id, partition_key)
            .await
            .map_err(|err| RepoError::from_store(err, self.context(id, partition_key)))?;
        debug!(
            "event=store_response module=repository status=ok op=delete type={} id={} charge={}",
            T::TYPE_NAME,
            id,
            charge
        );
        Ok(())
    }

    async fn probe(&self, id: &str, partition_key: Option<&str>) -> RepoResult<bool> {
        let partition_key = partition_key.unwrap_or(id);
        let container = self.container().await?;
        match container.read_item(id, partition_key).await {
            Ok(response) => {
                if !self.expressions.is_strict() {
                    return Ok(true);
                }
                let item_type = response.document.get("type").and_then(Value::as_str);
                Ok(item_type == Some(T::TYPE_NAME))
            }
            Err(err) => match RepoError::from_store(err, self.context(id, partition_key)) {
                RepoError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn any(&self, filter: Filter) -> RepoResult<bool> {
        let query = self.expressions.build_query(filter).top(1).to_definition();
        let container = self.container().await?;
        let (rows, _) = self
            .processor
            .iterate_values(container.as_ref(), &query, &QueryOptions::default())
            .await?;
        Ok(!rows.is_empty())
    }

    async fn count(&self, filter: Filter) -> RepoResult<u64> {
        let query = self.expressions.build_query(filter).to_count_definition();
        let container = self.container().await?;
        let (rows, _) = self
            .processor
            .iterate_values(container.as_ref(), &query, &QueryOptions::default())
            .await?;
        Ok(rows.iter().filter_map(Value::as_u64).sum())
    }

    async fn page(
        &self,
        filter: Filter,
        page_size: usize,
        continuation: Option<String>,
    ) -> RepoResult<Page<T>> {
        if page_size == 0 {
            return Err(RepoError::Configuration(
                "page size must be greater than zero".to_string(),
            ));
        }
        let query = self.expressions.build_query(filter).to_definition();
        let options = QueryOptions::default().with_max_item_count(page_size);
        let container = self.container().await?;
        self.processor
            .page::<T>(container.as_ref(), &query, &options, continuation.as_deref())
            .await
    }
}

/// Reads one similarity row; `None` when it carries no numeric score.
fn hit_from_row(row: &Value) -> Option<VectorSearchHit> {
    let score = row.get("score")?.as_f64()?;
    let id = row.get("id")?.as_str()?.to_string();
    let partition_key = match row.get(PARTITION_KEY_ALIAS) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Null) | None => id.clone(),
        Some(other) => other.to_string(),
    };
    Some(VectorSearchHit {
        id,
        partition_key,
        score,
    })
}

#[async_trait]
impl<T: Item> Repository<T> for DefaultRepository<T> {
    async fn create(&self, item: T, cancel: &CancellationToken) -> RepoResult<T> {
        let started_at = Instant::now();
        let id = item.id().to_string();
        let result = with_cancellation("create", cancel, self.create_item(item)).await;
        self.log_outcome("create", &id, started_at, &result);
        result
    }

    async fn create_many(&self, items: Vec<T>, cancel: &CancellationToken) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let target = format!("{}_items", items.len());
        let result = with_cancellation("create_many", cancel, self.create_items(items)).await;
        self.log_outcome("create_many", &target, started_at, &result);
        result
    }

    async fn create_with_embeddings(&self, item: T, cancel: &CancellationToken) -> RepoResult<T> {
        let started_at = Instant::now();
        let id = item.id().to_string();
        let result =
            with_cancellation("create_with_embeddings", cancel, self.create_embedded(item)).await;
        self.log_outcome("create_with_embeddings", &id, started_at, &result);
        result
    }

    async fn get(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let result = with_cancellation("get", cancel, self.read(id, partition_key)).await;
        self.log_outcome("get", id, started_at, &result);
        result
    }

    async fn try_get(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<Option<T>> {
        let started_at = Instant::now();
        let result = match with_cancellation("try_get", cancel, self.read(id, partition_key)).await {
            Ok(item) => Ok(Some(item)),
            Err(err) if err.is_not_found() => {
                self.log_recovered("try_get", id, started_at);
                return Ok(None);
            }
            Err(err) => Err(err),
        };
        self.log_outcome("try_get", id, started_at, &result);
        result
    }

    async fn get_where(&self, filter: Filter, cancel: &CancellationToken) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let query = self.expressions.build_query(filter).to_definition();
        let result = with_cancellation("get_where", cancel, self.query_items(&query, false)).await;
        self.log_outcome("get_where", "query", started_at, &result);
        result
    }

    async fn get_by_query(
        &self,
        query: QueryDefinition,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let result = with_cancellation("get_by_query", cancel, self.query_items(&query, true)).await;
        self.log_outcome("get_by_query", "query", started_at, &result);
        result
    }

    async fn get_vector_search_hits(
        &self,
        text: &str,
        top: usize,
        force_index_scan: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<VectorSearchHit>> {
        let started_at = Instant::now();
        let result = with_cancellation(
            "get_vector_search_hits",
            cancel,
            self.vector_hits(text, top, force_index_scan),
        )
        .await;
        self.log_outcome("get_vector_search_hits", "vector", started_at, &result);
        result
    }

    async fn get_vector_search_results(
        &self,
        text: &str,
        top: usize,
        force_index_scan: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<Vec<T>> {
        let started_at = Instant::now();
        let result = with_cancellation(
            "get_vector_search_results",
            cancel,
            self.vector_results(text, top, force_index_scan),
        )
        .await;
        self.log_outcome("get_vector_search_results", "vector", started_at, &result);
        result
    }

    async fn update(
        &self,
        item: T,
        ignore_etag: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let id = item.id().to_string();
        let result = with_cancellation("update", cancel, self.replace(item, ignore_etag)).await;
        self.log_outcome("update", &id, started_at, &result);
        result
    }

    async fn upsert(
        &self,
        item: T,
        ignore_etag: bool,
        cancel: &CancellationToken,
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let id = item.id().to_string();
        let result = with_cancellation("upsert", cancel, self.upsert_item(item, ignore_etag)).await;
        self.log_outcome("upsert", &id, started_at, &result);
        result
    }

    async fn delete(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = with_cancellation("delete", cancel, self.remove(id, partition_key)).await;
        self.log_outcome("delete", id, started_at, &result);
        result
    }

    async fn try_delete(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<bool> {
        let started_at = Instant::now();
        let result = match with_cancellation("try_delete", cancel, self.remove(id, partition_key)).await
        {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => {
                self.log_recovered("try_delete", id, started_at);
                return Ok(false);
            }
            Err(err) => Err(err),
        };
        self.log_outcome("try_delete", id, started_at, &result);
        result
    }

    async fn exists(
        &self,
        id: &str,
        partition_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> RepoResult<bool> {
        let started_at = Instant::now();
        let result = with_cancellation("exists", cancel, self.probe(id, partition_key)).await;
        self.log_outcome("exists", id, started_at, &result);
        result
    }

    async fn exists_where(&self, filter: Filter, cancel: &CancellationToken) -> RepoResult<bool> {
        let started_at = Instant::now();
        let result = with_cancellation("exists_where", cancel, self.any(filter)).await;
        self.log_outcome("exists_where", "query", started_at, &result);
        result
    }

    async fn count_where(&self, filter: Filter, cancel: &CancellationToken) -> RepoResult<u64> {
        let started_at = Instant::now();
        let result = with_cancellation("count_where", cancel, self.count(filter)).await;
        self.log_outcome("count_where", "query", started_at, &result);
        result
    }

    async fn page_where(
        &self,
        filter: Filter,
        page_size: usize,
        continuation: Option<String>,
        cancel: &CancellationToken,
    ) -> RepoResult<Page<T>> {
        let started_at = Instant::now();
        let result = with_cancellation(
            "page_where",
            cancel,
            self.page(filter, page_size, continuation),
        )
        .await;
        self.log_outcome("page_where", "query", started_at, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::{hit_from_row, DefaultRepository};
    use crate::error::RepoError;
    use crate::model::item::{Item, ItemHeader, Timestamps};
    use crate::options::{ContainerOptions, RepositoryOptions};
    use crate::providers::ContainerProvider;
    use crate::repo::Repository;
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Ticket {
        #[serde(flatten)]
        header: ItemHeader,
        #[serde(flatten)]
        timestamps: Timestamps,
        #[serde(default)]
        queue: String,
    }

    impl Item for Ticket {
        const TYPE_NAME: &'static str = "Ticket";

        fn header(&self) -> &ItemHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut ItemHeader {
            &mut self.header
        }

        fn partition_key_value(&self) -> String {
            self.queue.clone()
        }

        fn timestamps(&self) -> Option<&Timestamps> {
            Some(&self.timestamps)
        }

        fn timestamps_mut(&mut self) -> Option<&mut Timestamps> {
            Some(&mut self.timestamps)
        }
    }

    fn ticket(id: &str, queue: &str) -> Ticket {
        Ticket {
            header: ItemHeader::with_id::<Ticket>(id),
            timestamps: Timestamps::default(),
            queue: queue.to_string(),
        }
    }

    fn repository(strict: bool) -> DefaultRepository<Ticket> {
        let options = RepositoryOptions::builder("desk")
            .container::<Ticket>(
                ContainerOptions::new("tickets")
                    .with_partition_key_path("/queue")
                    .with_strict_type_checking(strict),
            )
            .build()
            .expect("valid options");
        let provider = ContainerProvider::new(Arc::new(MemoryStore::new()), Arc::new(options));
        DefaultRepository::new(Arc::new(provider), None).expect("registered type")
    }

    #[test]
    fn unregistered_type_fails_at_construction() {
        let options = RepositoryOptions::builder("desk").build().expect("empty options");
        let provider = ContainerProvider::new(Arc::new(MemoryStore::new()), Arc::new(options));
        let err = DefaultRepository::<Ticket>::new(Arc::new(provider), None)
            .expect_err("no container options");
        assert!(matches!(err, RepoError::Configuration(_)));
    }

    #[tokio::test]
    async fn create_stamps_both_timestamps_and_returns_etag() {
        let repo = repository(true);
        let cancel = CancellationToken::new();

        let created = repo
            .create(ticket("t1", "support"), &cancel)
            .await
            .expect("create ticket");
        assert!(created.header.etag.is_some());
        assert!(created.timestamps.created_time_utc.is_some());
        assert_eq!(
            created.timestamps.created_time_utc,
            created.timestamps.updated_time_utc
        );
    }

    #[tokio::test]
    async fn invalid_identity_is_rejected_before_store_call() {
        let repo = repository(true);
        let cancel = CancellationToken::new();

        let err = repo
            .create(ticket("t1", " "), &cancel)
            .await
            .expect_err("blank partition key");
        assert!(matches!(err, RepoError::InvalidItem { .. }));
        assert!(repo.provider.cached_containers().is_empty());
    }

    #[tokio::test]
    async fn update_without_etag_requires_opt_out() {
        let repo = repository(true);
        let cancel = CancellationToken::new();
        repo.create(ticket("t1", "support"), &cancel)
            .await
            .expect("create ticket");

        let err = repo
            .update(ticket("t1", "support"), false, &cancel)
            .await
            .expect_err("etag required");
        assert!(matches!(err, RepoError::InvalidItem { .. }));

        let forced = repo
            .update(ticket("t1", "support"), true, &cancel)
            .await
            .expect("ignore_etag overwrites");
        assert!(forced.header.etag.is_some());
    }

    #[tokio::test]
    async fn strict_checking_rejects_foreign_discriminator() {
        let cancel = CancellationToken::new();
        for strict in [true, false] {
            let repo = repository(strict);
            let container = repo.container().await.expect("container");
            container
                .create_item("support", json!({"id": "r1", "type": "Refund", "queue": "support"}))
                .await
                .expect("seed foreign document");

            let result = repo.get("r1", Some("support"), &cancel).await;
            let exists = repo
                .exists("r1", Some("support"), &cancel)
                .await
                .expect("exists");
            if strict {
                assert!(matches!(result, Err(RepoError::TypeMismatch { .. })));
                assert!(!exists);
            } else {
                assert_eq!(result.expect("lenient read").header.item_type, "Refund");
                assert!(exists);
            }
        }
    }

    #[tokio::test]
    async fn page_size_zero_is_rejected() {
        let repo = repository(true);
        let err = repo
            .page_where(crate::query::Filter::All, 0, None, &CancellationToken::new())
            .await
            .expect_err("zero page size");
        assert!(matches!(err, RepoError::Configuration(_)));
    }

    #[test]
    fn similarity_rows_carry_their_partition_key() {
        let hit = hit_from_row(&json!({"id": "t1", "partitionKey": "support", "score": 0.5}))
            .expect("scored row");
        assert_eq!(hit.partition_key, "support");
        assert_eq!(hit.score, 0.5);

        let numeric = hit_from_row(&json!({"id": "t2", "partitionKey": 7, "score": 0.1}))
            .expect("scored row");
        assert_eq!(numeric.partition_key, "7");

        let routed_by_id = hit_from_row(&json!({"id": "t3", "score": 0.1})).expect("scored row");
        assert_eq!(routed_by_id.partition_key, "t3");

        assert!(hit_from_row(&json!({"id": "t4", "partitionKey": "support"})).is_none());
    }

    #[tokio::test]
    async fn try_variants_recover_missing_items() {
        let repo = repository(true);
        let cancel = CancellationToken::new();

        let missing = repo
            .try_get("t9", Some("support"), &cancel)
            .await
            .expect("missing item is recovered");
        assert!(missing.is_none());
        assert!(!repo
            .try_delete("t9", Some("support"), &cancel)
            .await
            .expect("missing delete is recovered"));
        assert_eq!(
            repo.count_where(crate::query::Filter::All, &cancel)
                .await
                .expect("count"),
            0
        );
    }
}
