//! Per-type vector search options.
//!
//! # Invariants
//! - `path` is written once during registration and never changes after.
//! - Defaults: cosine distance, DiskANN index, 4096 dimensions.

use super::{is_valid_document_path, OptionsError};
use serde::{Deserialize, Serialize};

/// Flat indexes only support small vectors.
pub const FLAT_INDEX_MAX_DIMENSIONS: usize = 505;
/// Upper bound for quantized-flat and DiskANN indexes.
pub const MAX_VECTOR_DIMENSIONS: usize = 4096;

/// Similarity metric used by `VectorDistance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    #[default]
    Cosine,
    DotProduct,
    Euclidean,
}

impl DistanceFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::DotProduct => "dotproduct",
            Self::Euclidean => "euclidean",
        }
    }

    /// Whether a larger score means "more similar".
    pub fn higher_is_closer(self) -> bool {
        !matches!(self, Self::Euclidean)
    }
}

/// Index structure backing vector queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorIndexType {
    Flat,
    QuantizedFlat,
    #[default]
    DiskAnn,
}

impl VectorIndexType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::QuantizedFlat => "quantizedFlat",
            Self::DiskAnn => "diskANN",
        }
    }

    pub fn max_dimensions(self) -> usize {
        match self {
            Self::Flat => FLAT_INDEX_MAX_DIMENSIONS,
            Self::QuantizedFlat | Self::DiskAnn => MAX_VECTOR_DIMENSIONS,
        }
    }
}

/// Vector search configuration for one item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchOptions {
    #[serde(default)]
    pub distance_function: DistanceFunction,
    #[serde(default)]
    pub vector_index_type: VectorIndexType,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default)]
    path: Option<String>,
}

impl Default for VectorSearchOptions {
    fn default() -> Self {
        Self {
            distance_function: DistanceFunction::Cosine,
            vector_index_type: VectorIndexType::DiskAnn,
            dimensions: MAX_VECTOR_DIMENSIONS,
            path: None,
        }
    }
}

fn default_dimensions() -> usize {
    MAX_VECTOR_DIMENSIONS
}

impl VectorSearchOptions {
    pub fn with_distance_function(mut self, distance_function: DistanceFunction) -> Self {
        self.distance_function = distance_function;
        self
    }

    pub fn with_index_type(mut self, vector_index_type: VectorIndexType) -> Self {
        self.vector_index_type = vector_index_type;
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Document path of the embedding field (for example `/embeddings`).
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Sets the embedding path. Re-setting the same value is a no-op.
    ///
    /// # Errors
    /// - `InvalidPath` for malformed paths.
    /// - `VectorPathAlreadySet` when a different path was already assigned.
    pub(crate) fn assign_path(&mut self, path: &str) -> Result<(), OptionsError> {
        if !is_valid_document_path(path) {
            return Err(OptionsError::InvalidPath {
                field: "vectorSearch.path",
                path: path.to_string(),
            });
        }
        match self.path.as_deref() {
            Some(existing) if existing == path => Ok(()),
            Some(existing) => Err(OptionsError::VectorPathAlreadySet {
                existing: existing.to_string(),
                attempted: path.to_string(),
            }),
            None => {
                self.path = Some(path.to_string());
                Ok(())
            }
        }
    }

    pub(crate) fn validate(&self, type_name: &str) -> Result<(), OptionsError> {
        let Some(path) = self.path.as_deref() else {
            return Err(OptionsError::MissingVectorPath(type_name.to_string()));
        };
        if !is_valid_document_path(path) {
            return Err(OptionsError::InvalidPath {
                field: "vectorSearch.path",
                path: path.to_string(),
            });
        }
        let max = self.vector_index_type.max_dimensions();
        if self.dimensions == 0 || self.dimensions > max {
            return Err(OptionsError::InvalidDimensions {
                dimensions: self.dimensions,
                index_type: self.vector_index_type.as_str(),
                max,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DistanceFunction, VectorIndexType, VectorSearchOptions};
    use crate::options::OptionsError;

    #[test]
    fn defaults_match_documented_values() {
        let options = VectorSearchOptions::default();
        assert_eq!(options.distance_function, DistanceFunction::Cosine);
        assert_eq!(options.vector_index_type, VectorIndexType::DiskAnn);
        assert_eq!(options.dimensions, 4096);
        assert!(options.path().is_none());
    }

    #[test]
    fn path_is_write_once() {
        let mut options = VectorSearchOptions::default();
        options.assign_path("/embeddings").expect("first assignment");
        options
            .assign_path("/embeddings")
            .expect("same value is idempotent");

        let err = options
            .assign_path("/other")
            .expect_err("different path must be rejected");
        assert!(matches!(err, OptionsError::VectorPathAlreadySet { .. }));
        assert_eq!(options.path(), Some("/embeddings"));
    }

    #[test]
    fn flat_index_rejects_large_vectors() {
        let mut options = VectorSearchOptions::default().with_index_type(VectorIndexType::Flat);
        options.assign_path("/embeddings").expect("path");
        let err = options.validate("Doc").expect_err("4096 > flat limit");
        assert!(matches!(err, OptionsError::InvalidDimensions { max: 505, .. }));

        let small = options.with_dimensions(128);
        small.validate("Doc").expect("128 dimensions fit a flat index");
    }

    #[test]
    fn validate_requires_path() {
        let err = VectorSearchOptions::default()
            .validate("Doc")
            .expect_err("path is required");
        assert!(matches!(err, OptionsError::MissingVectorPath(_)));
    }
}
