//! Repository-level error surface.
//!
//! # Responsibility
//! - Translate store statuses into semantic variants callers can match on.
//! - Carry the type name, id and partition key of the failing operation.
//!
//! # Invariants
//! - Only `try_get` / `try_delete` swallow `NotFound`; everything else
//!   propagates unchanged.

use crate::model::item::ItemValidationError;
use crate::options::OptionsError;
use crate::processors::embedding::EmbeddingError;
use crate::query::QueryError;
use crate::store::{StoreError, StoreErrorKind};
use std::fmt;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Identity of the item an operation targeted.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub type_name: &'a str,
    pub id: &'a str,
    pub partition_key: &'a str,
}

/// One failed element of a `create_many` fan-out.
#[derive(Debug)]
pub struct BatchFailure {
    /// Position in the input sequence.
    pub index: usize,
    pub id: String,
    pub error: RepoError,
}

/// Every failure of a fan-out that was allowed to run to completion.
#[derive(Debug)]
pub struct AggregateError {
    pub type_name: String,
    pub attempted: usize,
    pub failures: Vec<BatchFailure>,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} `{}` operations failed",
            self.failures.len(),
            self.attempted,
            self.type_name
        )?;
        for failure in &self.failures {
            write!(f, "; [{}] `{}`: {}", failure.index, failure.id, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("`{type_name}` item `{id}` not found in partition `{partition_key}`")]
    NotFound {
        type_name: String,
        id: String,
        partition_key: String,
    },
    #[error("`{type_name}` item `{id}` already exists in partition `{partition_key}`")]
    Conflict {
        type_name: String,
        id: String,
        partition_key: String,
    },
    #[error("`{type_name}` item `{id}` was modified concurrently (etag mismatch)")]
    ConcurrencyConflict {
        type_name: String,
        id: String,
        partition_key: String,
    },
    #[error("item `{id}` has type `{actual}`, expected `{expected}`")]
    TypeMismatch {
        expected: String,
        actual: String,
        id: String,
    },
    #[error("`{operation}` is not supported for `{type_name}`: {reason}")]
    Unsupported {
        type_name: String,
        operation: &'static str,
        reason: String,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Aggregate(AggregateError),
    #[error("invalid `{type_name}` item: {message}")]
    InvalidItem { type_name: String, message: String },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid query: {0}")]
    Query(#[from] QueryError),
    #[error("store request failed (status {}): {source}", .source.kind.status_code())]
    Store {
        #[source]
        source: StoreError,
    },
    #[error("`{operation}` was cancelled")]
    Cancelled { operation: &'static str },
}

impl RepoError {
    /// Maps a store error for the item described by `ctx`.
    pub fn from_store(err: StoreError, ctx: ErrorContext<'_>) -> Self {
        let (type_name, id, partition_key) = (
            ctx.type_name.to_string(),
            ctx.id.to_string(),
            ctx.partition_key.to_string(),
        );
        match err.kind {
            StoreErrorKind::NotFound => Self::NotFound {
                type_name,
                id,
                partition_key,
            },
            StoreErrorKind::Conflict => Self::Conflict {
                type_name,
                id,
                partition_key,
            },
            StoreErrorKind::PreconditionFailed => Self::ConcurrencyConflict {
                type_name,
                id,
                partition_key,
            },
            _ => Self::Store { source: err },
        }
    }

    pub fn invalid_item(type_name: &str, err: ItemValidationError) -> Self {
        Self::InvalidItem {
            type_name: type_name.to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Store status class when the error came from the store transport.
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Self::Store { source } => Some(source.kind),
            _ => None,
        }
    }

    /// Short stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::Unsupported { .. } => "unsupported",
            Self::Configuration(_) => "configuration",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Embedding(_) => "embedding",
            Self::Aggregate(_) => "aggregate",
            Self::InvalidItem { .. } => "invalid_item",
            Self::Serialization(_) => "serialization",
            Self::Query(_) => "query",
            Self::Store { source } => source.kind.as_str(),
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}

impl From<OptionsError> for RepoError {
    fn from(err: OptionsError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<AggregateError> for RepoError {
    fn from(err: AggregateError) -> Self {
        Self::Aggregate(err)
    }
}
