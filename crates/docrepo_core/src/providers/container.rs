//! Lazy, process-wide container resolution.
//!
//! # Responsibility
//! - Map an item type to its container and create the container on first
//!   use with properties derived from options.
//! - Cache handles by container name so types sharing a container share
//!   one handle.
//!
//! # Invariants
//! - Concurrent first use runs a single initializer; the others await it.
//! - A failed or cancelled initialization leaves the slot empty so the
//!   next caller retries.

use super::vector_search::VectorSearchProvider;
use crate::error::{RepoError, RepoResult};
use crate::model::item::Item;
use crate::options::{ContainerOptions, RepositoryOptions};
use crate::store::{Container, ContainerProperties, DocumentStore};
use dashmap::DashMap;
use log::{error, info};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

type ContainerSlot = Arc<OnceCell<Arc<dyn Container>>>;

pub struct ContainerProvider {
    store: Arc<dyn DocumentStore>,
    options: Arc<RepositoryOptions>,
    vector_search: VectorSearchProvider,
    cache: DashMap<String, ContainerSlot>,
}

impl fmt::Debug for ContainerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerProvider")
            .field("database_id", &self.options.database_id())
            .field("cached", &self.cached_containers())
            .finish()
    }
}

impl ContainerProvider {
    pub fn new(store: Arc<dyn DocumentStore>, options: Arc<RepositoryOptions>) -> Self {
        Self {
            vector_search: VectorSearchProvider::new(Arc::clone(&options)),
            store,
            options,
            cache: DashMap::new(),
        }
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn vector_search(&self) -> &VectorSearchProvider {
        &self.vector_search
    }

    /// Options registered for `type_name`.
    ///
    /// # Errors
    /// - `Configuration` when the type was never registered.
    pub fn container_options(&self, type_name: &str) -> RepoResult<&ContainerOptions> {
        self.options.container_options(type_name).ok_or_else(|| {
            RepoError::Configuration(format!(
                "item type `{type_name}` has no registered container options"
            ))
        })
    }

    pub async fn get_container_for<T: Item>(&self) -> RepoResult<Arc<dyn Container>> {
        self.get_container(T::TYPE_NAME).await
    }

    /// Resolves (creating when absent) the container for `type_name`.
    pub async fn get_container(&self, type_name: &str) -> RepoResult<Arc<dyn Container>> {
        let options = self.container_options(type_name)?;
        let slot = Arc::clone(
            self.cache
                .entry(options.container_name.clone())
                .or_default()
                .value(),
        );

        let container = slot
            .get_or_try_init(|| self.initialize(type_name, options))
            .await?;
        Ok(Arc::clone(container))
    }

    /// Names of containers whose initialization has completed.
    pub fn cached_containers(&self) -> Vec<String> {
        let mut names = self
            .cache
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    fn properties_for(&self, type_name: &str, options: &ContainerOptions) -> ContainerProperties {
        let (embedding, indexing) = self.vector_search.get_vector_search_configuration(type_name);
        ContainerProperties::from_options(options).with_vector_configuration(embedding, indexing)
    }

    async fn initialize(
        &self,
        type_name: &str,
        options: &ContainerOptions,
    ) -> RepoResult<Arc<dyn Container>> {
        let started_at = Instant::now();
        let properties = self.properties_for(type_name, options);
        info!(
            "event=container_init module=container_provider status=start type={} container={}",
            type_name, options.container_name
        );

        let result = async {
            let container = self
                .store
                .create_container_if_not_exists(properties.clone())
                .await?;
            if options.sync_container_properties && container.properties() != properties {
                self.store.replace_container_properties(properties).await?;
            }
            Ok::<_, RepoError>(container)
        }
        .await;

        match &result {
            Ok(_) => info!(
                "event=container_init module=container_provider status=ok type={} container={} duration_ms={}",
                type_name,
                options.container_name,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=container_init module=container_provider status=error type={} container={} duration_ms={} error_code={} error={}",
                type_name,
                options.container_name,
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::ContainerProvider;
    use crate::error::RepoError;
    use crate::options::{ContainerOptions, RepositoryOptions, VectorSearchOptions};
    use crate::store::{DocumentStore, MemoryStore};
    use std::sync::Arc;

    fn options() -> Arc<RepositoryOptions> {
        Arc::new(
            RepositoryOptions::builder("shop")
                .container_for(
                    "Order",
                    ContainerOptions::new("sales").with_partition_key_path("/customerId"),
                )
                .container_for(
                    "Invoice",
                    ContainerOptions::new("sales").with_partition_key_path("/customerId"),
                )
                .container_for(
                    "Product",
                    ContainerOptions::new("products")
                        .with_vector_search("/embeddings", VectorSearchOptions::default())
                        .expect("valid vector options"),
                )
                .build()
                .expect("valid options"),
        )
    }

    #[tokio::test]
    async fn unregistered_type_is_a_configuration_error() {
        let provider = ContainerProvider::new(Arc::new(MemoryStore::new()), options());
        let err = provider
            .get_container("Ghost")
            .await
            .expect_err("unregistered type");
        assert!(matches!(err, RepoError::Configuration(_)));
        assert!(provider.cached_containers().is_empty());
    }

    #[tokio::test]
    async fn types_sharing_a_container_share_the_handle() {
        let store = Arc::new(MemoryStore::new());
        let provider = ContainerProvider::new(store.clone(), options());

        let orders = provider.get_container("Order").await.expect("order container");
        let invoices = provider
            .get_container("Invoice")
            .await
            .expect("invoice container");

        assert!(Arc::ptr_eq(&orders, &invoices));
        assert_eq!(store.container_requests(), 1);
        assert_eq!(provider.cached_containers(), vec!["sales".to_string()]);
        assert_eq!(orders.properties().partition_key_path, "/customerId");
    }

    #[tokio::test]
    async fn vector_policies_reach_the_store() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let provider = ContainerProvider::new(store, options());

        let products = provider
            .get_container("Product")
            .await
            .expect("product container");
        let properties = products.properties();
        let embedding = properties
            .vector_embedding_policy
            .expect("embedding policy attached");
        assert_eq!(embedding.embeddings[0].path, "/embeddings");
        assert_eq!(embedding.embeddings[0].dimensions, 4096);
        let indexing = properties.indexing_policy.expect("indexing policy attached");
        assert_eq!(indexing.excluded_paths[0].path, "/embeddings/*");
    }
}
