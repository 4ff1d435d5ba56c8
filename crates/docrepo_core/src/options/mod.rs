//! Repository configuration surface.
//!
//! # Responsibility
//! - Describe per-item-type container settings consumed at startup.
//! - Validate names and document paths before any store call happens.
//!
//! # Invariants
//! - Options are frozen once built; the engine only ever reads them
//!   through `Arc<RepositoryOptions>`.
//! - Each item type is registered at most once.

pub mod vector;

use crate::model::item::Item;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub use vector::{DistanceFunction, VectorIndexType, VectorSearchOptions};

static CONTAINER_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$").expect("container name pattern is valid")
});

static DOCUMENT_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(/[A-Za-z_][A-Za-z0-9_]*)+$").expect("document path pattern is valid")
});

pub(crate) fn is_valid_document_path(path: &str) -> bool {
    DOCUMENT_PATH_RE.is_match(path)
}

/// Configuration errors raised while building options.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid container name `{0}`")]
    InvalidContainerName(String),
    #[error("invalid document path for {field}: `{path}`")]
    InvalidPath { field: &'static str, path: String },
    #[error("vector dimensions {dimensions} out of range for {index_type} index (1..={max})")]
    InvalidDimensions {
        dimensions: usize,
        index_type: &'static str,
        max: usize,
    },
    #[error("vector path already set to `{existing}`; refusing to switch to `{attempted}`")]
    VectorPathAlreadySet { existing: String, attempted: String },
    #[error("vector search for `{0}` requires an embedding path")]
    MissingVectorPath(String),
    #[error("item type `{0}` is registered more than once")]
    DuplicateRegistration(String),
    #[error(
        "types `{first_type}` and `{second_type}` share container `{container}` \
         but disagree on {setting}"
    )]
    ConflictingContainerOptions {
        container: String,
        setting: &'static str,
        first_type: String,
        second_type: String,
    },
    #[error("database id must not be empty")]
    EmptyDatabaseId,
    #[error("invalid options document: {0}")]
    Json(#[from] serde_json::Error),
}

/// One unique-key constraint: the combination of `paths` is unique per partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKey {
    pub paths: Vec<String>,
}

/// Unique-key constraints applied to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueKeyPolicy {
    #[serde(default)]
    pub unique_keys: Vec<UniqueKey>,
}

impl UniqueKeyPolicy {
    pub fn is_empty(&self) -> bool {
        self.unique_keys.is_empty()
    }
}

/// Provisioned throughput requested for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "mode")]
pub enum ThroughputProperties {
    Manual { request_units: u32 },
    Autoscale { max_request_units: u32 },
}

/// Change-feed settings carried for external processors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFeedOptions {
    pub instance_name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

impl ChangeFeedOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Container settings for one item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOptions {
    pub container_name: String,
    #[serde(default = "default_partition_key_path")]
    pub partition_key_path: String,
    #[serde(default)]
    pub unique_key_policy: UniqueKeyPolicy,
    #[serde(default)]
    pub throughput: Option<ThroughputProperties>,
    /// `-1` keeps items forever unless they carry their own `ttl`.
    #[serde(default = "default_time_to_live")]
    pub default_time_to_live: i32,
    #[serde(default)]
    pub sync_container_properties: bool,
    #[serde(default)]
    pub change_feed: Option<ChangeFeedOptions>,
    #[serde(default = "default_strict_type_checking")]
    pub strict_type_checking: bool,
    #[serde(default)]
    pub vector_search: Option<VectorSearchOptions>,
}

fn default_partition_key_path() -> String {
    "/id".to_string()
}

fn default_time_to_live() -> i32 {
    -1
}

fn default_strict_type_checking() -> bool {
    true
}

impl ContainerOptions {
    /// Creates options for `container_name` partitioned by `/id`.
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            partition_key_path: default_partition_key_path(),
            unique_key_policy: UniqueKeyPolicy::default(),
            throughput: None,
            default_time_to_live: default_time_to_live(),
            sync_container_properties: false,
            change_feed: None,
            strict_type_checking: default_strict_type_checking(),
            vector_search: None,
        }
    }

    pub fn with_partition_key_path(mut self, path: impl Into<String>) -> Self {
        self.partition_key_path = path.into();
        self
    }

    pub fn with_unique_key<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_key_policy.unique_keys.push(UniqueKey {
            paths: paths.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_throughput(mut self, throughput: ThroughputProperties) -> Self {
        self.throughput = Some(throughput);
        self
    }

    pub fn with_default_time_to_live(mut self, seconds: i32) -> Self {
        self.default_time_to_live = seconds;
        self
    }

    pub fn with_sync_container_properties(mut self, enabled: bool) -> Self {
        self.sync_container_properties = enabled;
        self
    }

    pub fn with_change_feed(mut self, change_feed: ChangeFeedOptions) -> Self {
        self.change_feed = Some(change_feed);
        self
    }

    pub fn with_strict_type_checking(mut self, enabled: bool) -> Self {
        self.strict_type_checking = enabled;
        self
    }

    /// Enables vector search with the embedding stored at `path`.
    ///
    /// # Errors
    /// - Returns an error when `path` is malformed or a different path was
    ///   already assigned to `options`.
    pub fn with_vector_search(
        mut self,
        path: &str,
        mut options: VectorSearchOptions,
    ) -> Result<Self, OptionsError> {
        options.assign_path(path)?;
        self.vector_search = Some(options);
        Ok(self)
    }

    /// First container-level setting on which `self` and `other` differ.
    ///
    /// Types sharing a container must agree on everything that shapes the
    /// container itself; per-type settings such as strict checking may vary.
    fn conflicting_setting(&self, other: &ContainerOptions) -> Option<&'static str> {
        if self.partition_key_path != other.partition_key_path {
            Some("partitionKeyPath")
        } else if self.unique_key_policy != other.unique_key_policy {
            Some("uniqueKeyPolicy")
        } else if self.throughput != other.throughput {
            Some("throughput")
        } else if self.default_time_to_live != other.default_time_to_live {
            Some("defaultTimeToLive")
        } else if self.sync_container_properties != other.sync_container_properties {
            Some("syncContainerProperties")
        } else if self.vector_search != other.vector_search {
            Some("vectorSearch")
        } else {
            None
        }
    }

    fn validate(&self, type_name: &str) -> Result<(), OptionsError> {
        if !CONTAINER_NAME_RE.is_match(&self.container_name) {
            return Err(OptionsError::InvalidContainerName(
                self.container_name.clone(),
            ));
        }
        if !is_valid_document_path(&self.partition_key_path) {
            return Err(OptionsError::InvalidPath {
                field: "partitionKeyPath",
                path: self.partition_key_path.clone(),
            });
        }
        for key in &self.unique_key_policy.unique_keys {
            for path in &key.paths {
                if !is_valid_document_path(path) {
                    return Err(OptionsError::InvalidPath {
                        field: "uniqueKeyPolicy",
                        path: path.clone(),
                    });
                }
            }
        }
        if let Some(vector) = &self.vector_search {
            vector.validate(type_name)?;
        }
        Ok(())
    }
}

/// Process-wide repository configuration, keyed by item type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryOptions {
    database_id: String,
    #[serde(default)]
    containers: BTreeMap<String, ContainerOptions>,
}

impl RepositoryOptions {
    pub fn builder(database_id: impl Into<String>) -> RepositoryOptionsBuilder {
        RepositoryOptionsBuilder {
            database_id: database_id.into(),
            containers: Vec::new(),
        }
    }

    /// Parses and validates options from a JSON document.
    ///
    /// ```json
    /// { "databaseId": "shop",
    ///   "containers": { "Order": { "containerName": "orders",
    ///                              "partitionKeyPath": "/customerId" } } }
    /// ```
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Options registered for `type_name`, if any.
    pub fn container_options(&self, type_name: &str) -> Option<&ContainerOptions> {
        self.containers.get(type_name)
    }

    pub fn container_options_for<T: Item>(&self) -> Option<&ContainerOptions> {
        self.container_options(T::TYPE_NAME)
    }

    /// Registered item type names, sorted.
    pub fn registered_types(&self) -> impl Iterator<Item = &str> {
        self.containers.keys().map(String::as_str)
    }

    fn validate(&self) -> Result<(), OptionsError> {
        if self.database_id.trim().is_empty() {
            return Err(OptionsError::EmptyDatabaseId);
        }
        let mut owners: BTreeMap<&str, (&str, &ContainerOptions)> = BTreeMap::new();
        for (type_name, options) in &self.containers {
            options.validate(type_name)?;
            match owners.get(options.container_name.as_str()) {
                Some((first_type, first)) => {
                    if let Some(setting) = first.conflicting_setting(options) {
                        return Err(OptionsError::ConflictingContainerOptions {
                            container: options.container_name.clone(),
                            setting,
                            first_type: first_type.to_string(),
                            second_type: type_name.clone(),
                        });
                    }
                }
                None => {
                    owners.insert(options.container_name.as_str(), (type_name.as_str(), options));
                }
            }
        }
        Ok(())
    }
}

/// Collects per-type registrations and validates them once.
#[derive(Debug)]
pub struct RepositoryOptionsBuilder {
    database_id: String,
    containers: Vec<(String, ContainerOptions)>,
}

impl RepositoryOptionsBuilder {
    /// Registers container options for item type `T`.
    pub fn container<T: Item>(self, options: ContainerOptions) -> Self {
        self.container_for(T::TYPE_NAME, options)
    }

    /// Registers container options under an explicit type name.
    pub fn container_for(mut self, type_name: impl Into<String>, options: ContainerOptions) -> Self {
        self.containers.push((type_name.into(), options));
        self
    }

    pub fn build(self) -> Result<RepositoryOptions, OptionsError> {
        let mut containers = BTreeMap::new();
        for (type_name, options) in self.containers {
            if containers.contains_key(&type_name) {
                return Err(OptionsError::DuplicateRegistration(type_name));
            }
            containers.insert(type_name, options);
        }

        let options = RepositoryOptions {
            database_id: self.database_id,
            containers,
        };
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ContainerOptions, OptionsError, RepositoryOptions, ThroughputProperties,
        VectorSearchOptions,
    };

    #[test]
    fn builder_registers_types_with_defaults() {
        let options = RepositoryOptions::builder("shop")
            .container_for("Order", ContainerOptions::new("orders"))
            .build()
            .expect("valid options");

        let order = options.container_options("Order").expect("registered");
        assert_eq!(order.partition_key_path, "/id");
        assert_eq!(order.default_time_to_live, -1);
        assert!(order.strict_type_checking);
        assert!(order.vector_search.is_none());
        assert!(options.container_options("Customer").is_none());
    }

    #[test]
    fn builder_rejects_duplicates_and_bad_paths() {
        let duplicate = RepositoryOptions::builder("shop")
            .container_for("Order", ContainerOptions::new("orders"))
            .container_for("Order", ContainerOptions::new("orders-v2"))
            .build()
            .expect_err("duplicate registration");
        assert!(matches!(duplicate, OptionsError::DuplicateRegistration(_)));

        let bad_path = RepositoryOptions::builder("shop")
            .container_for(
                "Order",
                ContainerOptions::new("orders").with_partition_key_path("customerId"),
            )
            .build()
            .expect_err("partition key path must start with /");
        assert!(matches!(bad_path, OptionsError::InvalidPath { .. }));

        let bad_name = RepositoryOptions::builder("shop")
            .container_for("Order", ContainerOptions::new("orders/2024"))
            .build()
            .expect_err("slash is not allowed in container names");
        assert!(matches!(bad_name, OptionsError::InvalidContainerName(_)));
    }

    #[test]
    fn from_json_applies_defaults_and_validates() {
        let options = RepositoryOptions::from_json(
            r#"{
                "databaseId": "shop",
                "containers": {
                    "Order": {
                        "containerName": "orders",
                        "partitionKeyPath": "/customerId",
                        "throughput": { "mode": "autoscale", "maxRequestUnits": 4000 },
                        "uniqueKeyPolicy": { "uniqueKeys": [ { "paths": ["/number"] } ] },
                        "vectorSearch": { "path": "/embeddings", "dimensions": 3 }
                    }
                }
            }"#,
        )
        .expect("valid json options");

        let order = options.container_options("Order").expect("registered");
        assert_eq!(
            order.throughput,
            Some(ThroughputProperties::Autoscale {
                max_request_units: 4000
            })
        );
        assert_eq!(order.unique_key_policy.unique_keys.len(), 1);
        let vector = order.vector_search.as_ref().expect("vector options");
        assert_eq!(vector.path(), Some("/embeddings"));
        assert_eq!(vector.dimensions, 3);
        assert!(order.strict_type_checking);
    }

    #[test]
    fn from_json_rejects_vector_search_without_path() {
        let err = RepositoryOptions::from_json(
            r#"{ "databaseId": "shop",
                 "containers": { "Doc": { "containerName": "docs", "vectorSearch": {} } } }"#,
        )
        .expect_err("vector search without path");
        assert!(matches!(err, OptionsError::MissingVectorPath(_)));
    }

    #[test]
    fn with_vector_search_assigns_path_once() {
        let options = ContainerOptions::new("docs")
            .with_vector_search("/embeddings", VectorSearchOptions::default())
            .expect("valid path");
        assert_eq!(
            options
                .vector_search
                .as_ref()
                .and_then(VectorSearchOptions::path),
            Some("/embeddings")
        );
    }

    #[test]
    fn shared_container_requires_matching_container_settings() {
        let vector = || {
            ContainerOptions::new("listings")
                .with_partition_key_path("/shop")
                .with_vector_search(
                    "/embeddings",
                    VectorSearchOptions::default().with_dimensions(3),
                )
                .expect("valid vector options")
        };
        let options = RepositoryOptions::builder("shop")
            .container_for("Listing", vector())
            .container_for("Ad", vector().with_strict_type_checking(false))
            .build()
            .expect("per-type settings may differ");
        assert!(!options.container_options("Ad").expect("registered").strict_type_checking);

        let err = RepositoryOptions::builder("shop")
            .container_for("Listing", vector())
            .container_for(
                "Ad",
                ContainerOptions::new("listings").with_partition_key_path("/shop"),
            )
            .build()
            .expect_err("sibling without vector options");
        match err {
            OptionsError::ConflictingContainerOptions {
                container, setting, ..
            } => {
                assert_eq!(container, "listings");
                assert_eq!(setting, "vectorSearch");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = RepositoryOptions::from_json(
            r#"{ "databaseId": "shop",
                 "containers": {
                     "Order": { "containerName": "sales", "partitionKeyPath": "/customerId" },
                     "Invoice": { "containerName": "sales", "partitionKeyPath": "/id" } } }"#,
        )
        .expect_err("partition key paths differ");
        assert!(matches!(
            err,
            OptionsError::ConflictingContainerOptions {
                setting: "partitionKeyPath",
                ..
            }
        ));
    }
}
