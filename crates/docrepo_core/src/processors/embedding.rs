//! Embedding backend boundary (text in, vector out).

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend failed: {0}")]
    Backend(String),
    #[error("cannot embed empty text")]
    EmptyText,
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Turns text into a vector.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Adapts a synchronous closure into an [`EmbeddingBackend`].
pub struct FnEmbeddingBackend<F> {
    embed: F,
}

impl<F> FnEmbeddingBackend<F>
where
    F: Fn(&str) -> Result<Vec<f32>, EmbeddingError> + Send + Sync,
{
    pub fn new(embed: F) -> Self {
        Self { embed }
    }
}

impl<F> fmt::Debug for FnEmbeddingBackend<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnEmbeddingBackend")
    }
}

#[async_trait]
impl<F> EmbeddingBackend for FnEmbeddingBackend<F>
where
    F: Fn(&str) -> Result<Vec<f32>, EmbeddingError> + Send + Sync,
{
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (self.embed)(text)
    }
}

/// Embeds `text` and checks the vector length against `dimensions`.
pub(crate) async fn embed_checked(
    backend: &dyn EmbeddingBackend,
    text: &str,
    dimensions: Option<usize>,
) -> Result<Vec<f32>, EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::EmptyText);
    }
    let vector = backend.embed(text).await?;
    match dimensions {
        Some(expected) if expected != vector.len() => Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        }),
        _ => Ok(vector),
    }
}

#[cfg(test)]
mod tests {
    use super::{embed_checked, EmbeddingError, FnEmbeddingBackend};

    fn backend() -> FnEmbeddingBackend<impl Fn(&str) -> Result<Vec<f32>, EmbeddingError> + Send + Sync>
    {
        FnEmbeddingBackend::new(|text: &str| Ok(vec![text.len() as f32, 1.0]))
    }

    #[tokio::test]
    async fn checks_dimensions() {
        let vector = embed_checked(&backend(), "abc", Some(2))
            .await
            .expect("two dimensions");
        assert_eq!(vector, vec![3.0, 1.0]);

        let err = embed_checked(&backend(), "abc", Some(3))
            .await
            .expect_err("dimension mismatch");
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn rejects_blank_text() {
        let err = embed_checked(&backend(), "   ", None)
            .await
            .expect_err("blank text");
        assert!(matches!(err, EmbeddingError::EmptyText));
    }
}
