//! Wiring for repositories that share one store and one container cache.
//!
//! # Responsibility
//! - Freeze `RepositoryOptions` once and hand the same `ContainerProvider`
//!   to every repository built here.
//!
//! # Invariants
//! - Repositories for types mapped to the same container reuse one handle.

use crate::error::RepoResult;
use crate::model::item::Item;
use crate::options::RepositoryOptions;
use crate::processors::EmbeddingBackend;
use crate::providers::{ContainerProvider, VectorSearchProvider};
use crate::repo::DefaultRepository;
use crate::store::DocumentStore;
use log::info;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct RepositoryFactory {
    provider: Arc<ContainerProvider>,
    embeddings: Option<Arc<dyn EmbeddingBackend>>,
}

impl fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("provider", &self.provider)
            .field("embeddings", &self.embeddings.is_some())
            .finish()
    }
}

impl RepositoryFactory {
    pub fn new(store: Arc<dyn DocumentStore>, options: RepositoryOptions) -> Self {
        info!(
            "event=factory_init module=factory status=ok database={} types={}",
            options.database_id(),
            options.registered_types().count()
        );
        Self {
            provider: Arc::new(ContainerProvider::new(store, Arc::new(options))),
            embeddings: None,
        }
    }

    /// Enables `create_with_embeddings` and vector search on every
    /// repository built afterwards.
    pub fn with_embedding_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.embeddings = Some(backend);
        self
    }

    /// Repository for `T`.
    ///
    /// # Errors
    /// - `Configuration` when `T` was never registered.
    pub fn repository<T: Item>(&self) -> RepoResult<DefaultRepository<T>> {
        DefaultRepository::new(Arc::clone(&self.provider), self.embeddings.clone())
    }

    pub fn container_provider(&self) -> &Arc<ContainerProvider> {
        &self.provider
    }

    pub fn vector_search_provider(&self) -> &VectorSearchProvider {
        self.provider.vector_search()
    }

    pub fn options(&self) -> &RepositoryOptions {
        self.provider.options()
    }
}
