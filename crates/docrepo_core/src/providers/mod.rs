//! Providers the repository engine composes: container resolution,
//! discriminator scoping and vector search configuration.

pub mod container;
pub mod expression;
pub mod vector_search;

pub use container::ContainerProvider;
pub use expression::ExpressionProvider;
pub use vector_search::VectorSearchProvider;
