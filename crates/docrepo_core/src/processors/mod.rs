//! Processors that sit between the engine and the store: paged query
//! iteration and embedding generation.

pub mod embedding;
pub mod query;

pub use embedding::{EmbeddingBackend, EmbeddingError, FnEmbeddingBackend};
pub use query::{Page, QueryIterationProcessor};
