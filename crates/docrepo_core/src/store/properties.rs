//! Container provisioning properties sent to `create_container_if_not_exists`.
//!
//! Field names follow the store's wire format so properties round-trip
//! through the SQLite `containers` table unchanged.

use crate::options::{
    ContainerOptions, DistanceFunction, ThroughputProperties, UniqueKeyPolicy, VectorIndexType,
};
use serde::{Deserialize, Serialize};

/// Element type of stored vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDataType {
    #[default]
    Float32,
}

/// One embedding declaration inside a vector embedding policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    pub path: String,
    pub data_type: VectorDataType,
    pub distance_function: DistanceFunction,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEmbeddingPolicy {
    pub embeddings: Vec<Embedding>,
}

impl VectorEmbeddingPolicy {
    pub fn embedding_for(&self, path: &str) -> Option<&Embedding> {
        self.embeddings.iter().find(|embedding| embedding.path == path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPath {
    pub path: String,
}

impl IndexPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexPath {
    pub path: String,
    #[serde(rename = "type")]
    pub index_type: VectorIndexType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingPolicy {
    #[serde(default)]
    pub included_paths: Vec<IndexPath>,
    #[serde(default)]
    pub excluded_paths: Vec<IndexPath>,
    #[serde(default)]
    pub vector_indexes: Vec<VectorIndexPath>,
}

/// Everything a store needs to provision one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerProperties {
    #[serde(rename = "id")]
    pub name: String,
    pub partition_key_path: String,
    #[serde(default)]
    pub unique_key_policy: UniqueKeyPolicy,
    /// `None` disables expiry; `-1` enables per-item `ttl` without a default.
    #[serde(default)]
    pub default_time_to_live: Option<i32>,
    #[serde(default)]
    pub throughput: Option<ThroughputProperties>,
    #[serde(default)]
    pub vector_embedding_policy: Option<VectorEmbeddingPolicy>,
    #[serde(default)]
    pub indexing_policy: Option<IndexingPolicy>,
}

impl ContainerProperties {
    pub fn new(name: impl Into<String>, partition_key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key_path: partition_key_path.into(),
            unique_key_policy: UniqueKeyPolicy::default(),
            default_time_to_live: None,
            throughput: None,
            vector_embedding_policy: None,
            indexing_policy: None,
        }
    }

    /// Derives properties from per-type options; vector policies are
    /// attached separately by the vector search provider.
    pub fn from_options(options: &ContainerOptions) -> Self {
        Self {
            name: options.container_name.clone(),
            partition_key_path: options.partition_key_path.clone(),
            unique_key_policy: options.unique_key_policy.clone(),
            default_time_to_live: Some(options.default_time_to_live),
            throughput: options.throughput,
            vector_embedding_policy: None,
            indexing_policy: None,
        }
    }

    pub fn with_vector_configuration(
        mut self,
        embedding_policy: Option<VectorEmbeddingPolicy>,
        indexing_policy: Option<IndexingPolicy>,
    ) -> Self {
        self.vector_embedding_policy = embedding_policy;
        self.indexing_policy = indexing_policy;
        self
    }
}
