//! Typed repository layer over a partitioned document store.
//!
//! Items are plain serde types implementing [`Item`]; a [`RepositoryFactory`]
//! resolves their containers lazily and hands out [`DefaultRepository`]
//! instances that speak the store's query dialect.

pub mod db;
pub mod error;
pub mod factory;
pub mod logging;
pub mod model;
pub mod options;
pub mod processors;
pub mod providers;
pub mod query;
pub mod repo;
pub mod store;

pub use error::{AggregateError, BatchFailure, ErrorContext, RepoError, RepoResult};
pub use factory::RepositoryFactory;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::item::{
    validate_item, Item, ItemHeader, ItemValidationError, Timestamps, VectorSearchItem,
};
pub use options::{
    ChangeFeedOptions, ContainerOptions, DistanceFunction, OptionsError, RepositoryOptions,
    ThroughputProperties, UniqueKeyPolicy, VectorIndexType, VectorSearchOptions,
};
pub use processors::{EmbeddingBackend, EmbeddingError, FnEmbeddingBackend, Page};
pub use query::{field, Filter, Query, QueryDefinition, SortOrder};
pub use repo::{with_cancellation, DefaultRepository, Repository, VectorSearchHit};
pub use store::{Container, DocumentStore, MemoryStore, SqliteStore, StoreError, StoreErrorKind};
pub use tokio_util::sync::CancellationToken;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
