//! Vector search configuration and similarity query construction.
//!
//! # Invariants
//! - Exactly one embedding and one vector index per configured type.
//! - The embedding path is excluded from regular indexing (`<path>/*`).
//! - Types without vector options yield `(None, None)`.

use crate::error::{RepoError, RepoResult};
use crate::options::{RepositoryOptions, VectorSearchOptions};
use crate::query::filter::render_path;
use crate::query::QueryDefinition;
use crate::store::{
    Embedding, IndexPath, IndexingPolicy, VectorDataType, VectorEmbeddingPolicy, VectorIndexPath,
};
use serde_json::Value;
use std::sync::Arc;

/// Name of the query parameter carrying the probe vector.
pub const VECTOR_PARAMETER: &str = "@vector";
/// Name of the query parameter carrying the item discriminator.
pub const TYPE_PARAMETER: &str = "@type";
/// Alias under which each hit reports its partition key value.
pub const PARTITION_KEY_ALIAS: &str = "partitionKey";

#[derive(Debug, Clone)]
pub struct VectorSearchProvider {
    options: Arc<RepositoryOptions>,
}

impl VectorSearchProvider {
    pub fn new(options: Arc<RepositoryOptions>) -> Self {
        Self { options }
    }

    /// Vector options and embedding path registered for `type_name`.
    pub fn vector_options(&self, type_name: &str) -> Option<(&VectorSearchOptions, &str)> {
        let vector = self.options.container_options(type_name)?.vector_search.as_ref()?;
        let path = vector.path()?;
        Some((vector, path))
    }

    /// Embedding and indexing policies for the container of `type_name`.
    pub fn get_vector_search_configuration(
        &self,
        type_name: &str,
    ) -> (Option<VectorEmbeddingPolicy>, Option<IndexingPolicy>) {
        match self.vector_options(type_name) {
            Some((vector, path)) => {
                let (embedding, indexing) = vector_configuration(vector, path);
                (Some(embedding), Some(indexing))
            }
            None => (None, None),
        }
    }

    /// Builds the top-`top` similarity query for `type_name`, scoped to
    /// documents carrying that discriminator.
    ///
    /// # Errors
    /// - `Unsupported` when the type has no vector search options.
    pub fn similarity_query(
        &self,
        type_name: &str,
        vector: &[f32],
        top: usize,
        force_index_scan: bool,
    ) -> RepoResult<QueryDefinition> {
        let unsupported = || RepoError::Unsupported {
            type_name: type_name.to_string(),
            operation: "vector_search",
            reason: "no vector search options are registered".to_string(),
        };
        let (_, path) = self.vector_options(type_name).ok_or_else(unsupported)?;
        let partition_key_path = self
            .options
            .container_options(type_name)
            .map(|options| options.partition_key_path.as_str())
            .ok_or_else(unsupported)?;
        Ok(similarity_query(
            type_name,
            path,
            partition_key_path,
            vector,
            top,
            force_index_scan,
        ))
    }
}

/// Policies for one embedding stored at `path`.
pub fn vector_configuration(
    options: &VectorSearchOptions,
    path: &str,
) -> (VectorEmbeddingPolicy, IndexingPolicy) {
    let embedding = VectorEmbeddingPolicy {
        embeddings: vec![Embedding {
            path: path.to_string(),
            data_type: VectorDataType::Float32,
            distance_function: options.distance_function,
            dimensions: options.dimensions,
        }],
    };
    let indexing = IndexingPolicy {
        included_paths: vec![IndexPath::new("/*")],
        excluded_paths: vec![IndexPath::new(format!("{path}/*"))],
        vector_indexes: vec![VectorIndexPath {
            path: path.to_string(),
            index_type: options.vector_index_type,
        }],
    };
    (embedding, indexing)
}

/// `SELECT TOP k c.id, <pk> AS partitionKey, VectorDistance(...) AS score
/// FROM c WHERE c.type = @type ORDER BY VectorDistance(...)`.
///
/// Ids are only unique within a partition, so every hit carries the
/// partition key needed to point-read it back.
pub fn similarity_query(
    type_name: &str,
    path: &str,
    partition_key_path: &str,
    vector: &[f32],
    top: usize,
    force_index_scan: bool,
) -> QueryDefinition {
    let field = render_path(path);
    let partition_key = render_path(partition_key_path);
    let text = format!(
        "SELECT TOP {top} c.id, {partition_key} AS {PARTITION_KEY_ALIAS}, \
         VectorDistance({field}, {VECTOR_PARAMETER}) AS score FROM c \
         WHERE c.type = {TYPE_PARAMETER} \
         ORDER BY VectorDistance({field}, {VECTOR_PARAMETER}, {force_index_scan})"
    );
    let probe = vector.iter().map(|value| Value::from(*value)).collect::<Vec<_>>();
    QueryDefinition::new(text)
        .with_parameter(VECTOR_PARAMETER, Value::Array(probe))
        .with_parameter(TYPE_PARAMETER, type_name)
}

#[cfg(test)]
mod tests {
    use super::{similarity_query, VectorSearchProvider, TYPE_PARAMETER, VECTOR_PARAMETER};
    use crate::error::RepoError;
    use crate::options::{
        ContainerOptions, DistanceFunction, RepositoryOptions, VectorIndexType,
        VectorSearchOptions,
    };
    use crate::query::parser::parse;
    use crate::store::VectorDataType;
    use serde_json::json;
    use std::sync::Arc;

    fn provider() -> VectorSearchProvider {
        let options = RepositoryOptions::builder("shop")
            .container_for(
                "Product",
                ContainerOptions::new("products")
                    .with_vector_search(
                        "/embeddings",
                        VectorSearchOptions::default()
                            .with_distance_function(DistanceFunction::DotProduct)
                            .with_index_type(VectorIndexType::QuantizedFlat)
                            .with_dimensions(8),
                    )
                    .expect("valid vector options"),
            )
            .container_for("Order", ContainerOptions::new("orders"))
            .build()
            .expect("valid options");
        VectorSearchProvider::new(Arc::new(options))
    }

    #[test]
    fn builds_single_embedding_and_index() {
        let (embedding, indexing) = provider().get_vector_search_configuration("Product");
        let embedding = embedding.expect("embedding policy");
        let indexing = indexing.expect("indexing policy");

        assert_eq!(embedding.embeddings.len(), 1);
        let declared = &embedding.embeddings[0];
        assert_eq!(declared.path, "/embeddings");
        assert_eq!(declared.dimensions, 8);
        assert_eq!(declared.data_type, VectorDataType::Float32);
        assert_eq!(declared.distance_function, DistanceFunction::DotProduct);

        assert_eq!(indexing.included_paths[0].path, "/*");
        assert_eq!(indexing.excluded_paths[0].path, "/embeddings/*");
        assert_eq!(indexing.vector_indexes.len(), 1);
        assert_eq!(indexing.vector_indexes[0].index_type, VectorIndexType::QuantizedFlat);
    }

    #[test]
    fn types_without_vector_options_get_nothing() {
        assert_eq!(provider().get_vector_search_configuration("Order"), (None, None));
        assert_eq!(provider().get_vector_search_configuration("Unknown"), (None, None));
    }

    #[test]
    fn similarity_query_is_valid_and_binds_vector() {
        let definition =
            similarity_query("Product", "/embeddings", "/shop", &[0.5, 1.0], 3, false);
        assert_eq!(
            definition.text(),
            "SELECT TOP 3 c.id, c.shop AS partitionKey, \
             VectorDistance(c.embeddings, @vector) AS score FROM c \
             WHERE c.type = @type \
             ORDER BY VectorDistance(c.embeddings, @vector, false)"
        );
        assert_eq!(definition.parameter(VECTOR_PARAMETER), Some(&json!([0.5, 1.0])));
        assert_eq!(definition.parameter(TYPE_PARAMETER), Some(&json!("Product")));
        parse(definition.text()).expect("generated query parses");
    }

    #[test]
    fn similarity_query_requires_vector_options() {
        let err = provider()
            .similarity_query("Order", &[1.0], 1, true)
            .expect_err("orders have no vector options");
        assert!(matches!(err, RepoError::Unsupported { .. }));
    }
}
