//! Item domain model.
//!
//! # Responsibility
//! - Define the document shape every repository-managed type shares.
//! - Expose optional capabilities (timestamps, vector search) as trait
//!   accessors checked at runtime by the repository engine.
//!
//! # Invariants
//! - `id` is non-empty and unique within its partition.
//! - The partition key value is derived by the item and never empty.
//! - `_etag` is owned by the store; callers only echo it back.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Characters the store refuses inside document ids.
const FORBIDDEN_ID_CHARS: &[char] = &['/', '\\', '?', '#'];

/// System and identity properties stored on every document.
///
/// Flatten this into item structs with `#[serde(flatten)]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemHeader {
    /// Document id, unique within one partition.
    pub id: String,
    /// Discriminator used when several types share one container.
    #[serde(rename = "type")]
    pub item_type: String,
    /// Concurrency token assigned by the store on every write.
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Per-item time-to-live in seconds, overriding the container default.
    #[serde(rename = "ttl", default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<i32>,
}

impl ItemHeader {
    /// Creates a header with a generated UUID id for item type `T`.
    pub fn new<T: Item>() -> Self {
        Self::with_id::<T>(Uuid::new_v4().to_string())
    }

    /// Creates a header with a caller-provided id for item type `T`.
    pub fn with_id<T: Item>(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            item_type: T::TYPE_NAME.to_string(),
            etag: None,
            time_to_live: None,
        }
    }
}

/// Creation/update timestamps capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    /// Set once by the first successful create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time_utc: Option<DateTime<Utc>>,
    /// Stamped on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_time_utc: Option<DateTime<Utc>>,
}

/// Vector search capability: a text source and the embedding computed from it.
pub trait VectorSearchItem: Send + Sync {
    /// Text the embedding backend turns into a vector.
    fn text(&self) -> String;
    /// Current embedding, empty until computed.
    fn embeddings(&self) -> &[f32];
    /// Replaces the embedding.
    fn set_embeddings(&mut self, embeddings: Vec<f32>);
}

/// Contract for every type persisted through a repository.
///
/// Capabilities are opt-in: override `timestamps_mut` or
/// `as_vector_search_mut` to expose them to the engine.
pub trait Item: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Discriminator value written into `type` and used for scoping queries.
    const TYPE_NAME: &'static str;

    fn header(&self) -> &ItemHeader;

    fn header_mut(&mut self) -> &mut ItemHeader;

    /// Value routing the item to its physical partition. Defaults to `id`.
    fn partition_key_value(&self) -> String {
        self.header().id.clone()
    }

    fn timestamps(&self) -> Option<&Timestamps> {
        None
    }

    fn timestamps_mut(&mut self) -> Option<&mut Timestamps> {
        None
    }

    fn as_vector_search(&self) -> Option<&dyn VectorSearchItem> {
        None
    }

    fn as_vector_search_mut(&mut self) -> Option<&mut dyn VectorSearchItem> {
        None
    }

    fn id(&self) -> &str {
        &self.header().id
    }

    fn etag(&self) -> Option<&str> {
        self.header().etag.as_deref()
    }

    fn item_type(&self) -> &str {
        &self.header().item_type
    }
}

/// Item-level validation failures detected before any store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemValidationError {
    #[error("item id must not be empty")]
    EmptyId,
    #[error("item id `{0}` contains a forbidden character (/ \\ ? #)")]
    ForbiddenIdCharacter(String),
    #[error("partition key value must not be empty for item `{0}`")]
    EmptyPartitionKey(String),
}

/// Validates identity fields and returns the partition key value to use.
///
/// # Errors
/// - `EmptyId` when `id` is blank.
/// - `ForbiddenIdCharacter` when `id` contains `/`, `\`, `?` or `#`.
/// - `EmptyPartitionKey` when the derived partition key is blank.
pub fn validate_item<T: Item>(item: &T) -> Result<String, ItemValidationError> {
    let id = item.id();
    if id.trim().is_empty() {
        return Err(ItemValidationError::EmptyId);
    }
    if id.contains(FORBIDDEN_ID_CHARS) {
        return Err(ItemValidationError::ForbiddenIdCharacter(id.to_string()));
    }

    let partition_key = item.partition_key_value();
    if partition_key.trim().is_empty() {
        return Err(ItemValidationError::EmptyPartitionKey(id.to_string()));
    }

    Ok(partition_key)
}
